//! Image dimensions and size utilities

use ndarray::{Array2, ArrayBase, Data, Ix2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Image dimensions structure
///
/// Represents the width and height of an image or PSF kernel.
/// Arrays follow the row-major `ndarray` convention, so the array shape of
/// an image of this size is `(height, width)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    /// Image width in pixels
    pub width: usize,
    /// Image height in pixels
    pub height: usize,
}

impl ImageSize {
    /// Create a new ImageSize
    pub fn from_width_height(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Create from an `ndarray` shape tuple `(rows, cols)`
    pub fn from_shape(shape: (usize, usize)) -> Self {
        Self {
            width: shape.1,
            height: shape.0,
        }
    }

    /// Size of an existing 2D array
    pub fn of<S: Data>(array: &ArrayBase<S, Ix2>) -> Self {
        Self::from_shape(array.dim())
    }

    /// Shape tuple `(height, width)` as used by `ndarray`
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Create an empty array with this size
    ///
    /// Returns an ndarray Array2 of zeros with shape (height, width).
    /// Note the row-major ordering convention: rows (height) come first.
    pub fn empty_array<T>(&self) -> Array2<T>
    where
        T: ndarray::NdFloat + Default,
    {
        Array2::default(self.shape())
    }

    /// Get total number of pixels
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// True when either dimension is zero
    pub fn is_empty(&self) -> bool {
        self.pixel_count() == 0
    }

    /// True if an image of this size fits inside `other` along both axes
    pub fn fits_within(&self, other: &ImageSize) -> bool {
        self.width <= other.width && self.height <= other.height
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_is_row_major() {
        let size = ImageSize::from_width_height(20, 10);
        assert_eq!(size.shape(), (10, 20));
        assert_eq!(ImageSize::from_shape((10, 20)), size);

        let array = size.empty_array::<f64>();
        assert_eq!(array.dim(), (10, 20));
        assert_eq!(ImageSize::of(&array), size);
    }

    #[test]
    fn test_fits_within() {
        let kernel = ImageSize::from_width_height(15, 15);
        let image = ImageSize::from_width_height(64, 32);
        assert!(kernel.fits_within(&image));
        assert!(!image.fits_within(&kernel));
        assert!(!ImageSize::from_width_height(65, 1).fits_within(&image));
    }

    #[test]
    fn test_display_and_empty() {
        assert_eq!(ImageSize::from_width_height(64, 48).to_string(), "64x48");
        assert!(ImageSize::from_width_height(0, 5).is_empty());
        assert_eq!(ImageSize::from_width_height(4, 5).pixel_count(), 20);
    }
}
