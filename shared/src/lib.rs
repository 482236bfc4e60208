//! Shared components and utilities for the difference-imaging workspace.
//!
//! This crate holds the image-level building blocks the subtraction core
//! consumes: Fourier transforms over `ndarray` images, PSF normalization,
//! stamp background statistics, defect masking and FITS I/O.

pub mod algo;
pub mod image_proc;
pub mod image_size;
#[cfg(feature = "fits-io")]
pub mod io;
