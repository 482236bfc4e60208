//! Optimal Fourier-domain difference imaging.
//!
//! Given a science and a reference exposure of the same field, already
//! aligned pixel for pixel, and a PSF for each, this crate computes the
//! statistically optimal difference image, its PSF and a matched-filter
//! image for point-source detection.
//!
//! The main entry points are [`pipeline::subtract`] for prepared images in
//! memory and [`pipeline::run`] for FITS files on disk.

pub mod config;
pub mod difference;
pub mod error;
pub mod matched_filter;
pub mod normalize;
pub mod pipeline;
pub mod prepared;
pub mod shared_args;
mod spectra;
pub mod zero_point;

pub use config::{PreparationConfig, SolverConfig, SubtractionConfig};
pub use difference::{difference, DifferenceResult};
pub use error::SubtractionError;
pub use matched_filter::matched_filter;
pub use normalize::{normalize_difference_image, Normalization};
pub use pipeline::{run, subtract, ExposurePaths, SubtractionOutcome, SubtractionProducts};
pub use prepared::{prepare_image, PreparedImage, RawExposure, REFERENCE_ZERO_POINT};
pub use zero_point::{
    difference_zero_point, difference_zero_point_from_ratio, solve_zero_point, ZeroPointSolution,
};
