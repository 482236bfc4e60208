//! Numerical helpers shared by the image-processing modules.

pub mod stats;

pub use stats::{median, percentile, quartiles, StatsError};
