//! Photometric normalization of difference images.
//!
//! The raw optimal difference is in units where the noise is white with
//! unit-ish variance. Dividing by its zero point and multiplying by one of
//! the input zero points puts it back on that input's flux scale.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::prepared::PreparedImage;
use crate::zero_point::difference_zero_point;

/// Flux scale a difference image is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Normalization {
    /// Reference image flux units
    #[default]
    Reference,
    /// Science image flux units
    Science,
    /// Raw difference, no rescaling
    None,
}

impl Normalization {
    /// Resolve a user-supplied mode name.
    ///
    /// `reference` or `t` select the reference scale, `science` or `i` the
    /// science scale. Any other value leaves the difference unscaled.
    pub fn parse(value: &str) -> Self {
        match value {
            "reference" | "t" => Normalization::Reference,
            "science" | "i" => Normalization::Science,
            "none" => Normalization::None,
            other => {
                log::warn!("Unrecognized normalization '{other}', difference image left unscaled");
                Normalization::None
            }
        }
    }

    /// Canonical name, as written to output headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Normalization::Reference => "reference",
            Normalization::Science => "science",
            Normalization::None => "none",
        }
    }

    /// Factor applied to a raw difference image.
    pub fn scale(&self, science: &PreparedImage, reference: &PreparedImage) -> f64 {
        match self {
            Normalization::Reference => {
                reference.zero_point() / difference_zero_point(science, reference)
            }
            Normalization::Science => {
                science.zero_point() / difference_zero_point(science, reference)
            }
            Normalization::None => 1.0,
        }
    }
}

impl From<String> for Normalization {
    fn from(value: String) -> Self {
        Normalization::parse(&value)
    }
}

impl From<Normalization> for String {
    fn from(value: Normalization) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rescale a raw difference image to the requested photometric convention.
///
/// [`Normalization::None`] returns the input values unchanged.
pub fn normalize_difference_image(
    raw: &Array2<f64>,
    science: &PreparedImage,
    reference: &PreparedImage,
    mode: Normalization,
) -> Array2<f64> {
    match mode {
        Normalization::None => raw.clone(),
        _ => raw * mode.scale(science, reference),
    }
}
