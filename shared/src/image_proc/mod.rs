//! Image processing module for difference imaging
//!
//! This module provides the per-image building blocks used before and during
//! Fourier-domain subtraction: 2D transforms, PSF normalization, background
//! statistics and defect handling.

pub mod defects;
pub mod fft;
pub mod noise;
pub mod psf;

use thiserror::Error;

// Re-export key functionality for easier access
pub use defects::{interpolate_bad_pixels, make_pixel_mask, saturation_level};
pub use fft::Fft2d;
pub use noise::{estimate_background, simple_normal_array, BackgroundStats};
pub use psf::{gaussian_psf, normalize_psf};

/// Errors raised by the image-processing primitives.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ImageProcError {
    /// Array dimensions are incompatible with the requested operation
    #[error("Input shape error: {0}")]
    InputShape(String),
    /// The data leaves no numerically meaningful answer
    #[error("Numeric degeneracy: {0}")]
    NumericDegeneracy(String),
}
