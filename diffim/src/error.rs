//! Error type for the subtraction pipeline.

use shared::image_proc::ImageProcError;
use shared::io::FitsError;
use thiserror::Error;

/// Failures of the difference-imaging pipeline.
///
/// Solver non-convergence is not an error; it is reported through
/// [`crate::zero_point::ZeroPointSolution::converged`].
#[derive(Error, Debug)]
pub enum SubtractionError {
    /// Array or kernel dimensions are incompatible
    #[error("Input shape error: {0}")]
    InputShape(String),
    /// An input file could not be read or an output written as FITS
    #[error("FITS format error: {0}")]
    FileFormat(String),
    /// The data leave no numerically meaningful answer
    #[error("Numeric degeneracy: {0}")]
    NumericDegeneracy(String),
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ImageProcError> for SubtractionError {
    fn from(err: ImageProcError) -> Self {
        match err {
            ImageProcError::InputShape(msg) => SubtractionError::InputShape(msg),
            ImageProcError::NumericDegeneracy(msg) => SubtractionError::NumericDegeneracy(msg),
        }
    }
}

impl From<FitsError> for SubtractionError {
    fn from(err: FitsError) -> Self {
        match err {
            FitsError::Io(io) => SubtractionError::Io(io),
            other => SubtractionError::FileFormat(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SubtractionError {
    fn from(err: serde_json::Error) -> Self {
        SubtractionError::Config(err.to_string())
    }
}
