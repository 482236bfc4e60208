//! PSF kernel preparation for Fourier-domain convolution.
//!
//! A PSF read from disk is a small stamp with its peak near the middle. To be
//! multiplied pointwise with an image spectrum it has to live on the same
//! grid as the image, with its peak at index (0, 0) so that convolving with
//! it does not shift the image. Normalizing to unit sum keeps fluxes
//! unchanged by the convolution.

use ndarray::{Array2, ArrayBase, Data, Ix2};

use super::ImageProcError;
use crate::image_size::ImageSize;

/// Resize a PSF kernel to `target`, recenter it and normalize it to unit sum.
///
/// The kernel is zero-padded into the top-left corner of a `target`-sized
/// array, then cyclically shifted so that its brightest pixel lands at
/// (0, 0). The first maximum in row-major order wins ties.
///
/// # Errors
/// * `InputShape` if the kernel is empty or larger than `target` along
///   either axis
/// * `NumericDegeneracy` if the kernel contains non-finite values or does
///   not sum to a positive flux
pub fn normalize_psf<S>(
    raw_psf: &ArrayBase<S, Ix2>,
    target: ImageSize,
) -> Result<Array2<f64>, ImageProcError>
where
    S: Data<Elem = f64>,
{
    let kernel_size = ImageSize::of(raw_psf);

    if kernel_size.is_empty() {
        return Err(ImageProcError::InputShape("PSF kernel is empty".to_string()));
    }
    if !kernel_size.fits_within(&target) {
        return Err(ImageProcError::InputShape(format!(
            "PSF kernel of {kernel_size} does not fit in a {target} image"
        )));
    }
    if raw_psf.iter().any(|v| !v.is_finite()) {
        return Err(ImageProcError::NumericDegeneracy(
            "PSF kernel contains non-finite values".to_string(),
        ));
    }

    let total: f64 = raw_psf.sum();
    if total <= 0.0 {
        return Err(ImageProcError::NumericDegeneracy(format!(
            "PSF kernel sums to {total}, expected a positive flux"
        )));
    }

    let (peak_row, peak_col) = peak_position(raw_psf);
    let (height, width) = target.shape();

    let mut psf = target.empty_array::<f64>();
    for ((row, col), &value) in raw_psf.indexed_iter() {
        let dst_row = (row + height - peak_row) % height;
        let dst_col = (col + width - peak_col) % width;
        psf[[dst_row, dst_col]] = value / total;
    }

    Ok(psf)
}

/// Location of the brightest pixel, first in row-major order on ties.
fn peak_position<S>(array: &ArrayBase<S, Ix2>) -> (usize, usize)
where
    S: Data<Elem = f64>,
{
    let mut best = (0, 0);
    let mut best_value = f64::NEG_INFINITY;
    for (idx, &value) in array.indexed_iter() {
        if value > best_value {
            best_value = value;
            best = idx;
        }
    }
    best
}

/// Circular Gaussian PSF of unit flux, centered at index (0, 0).
///
/// Distances wrap around the array edges, giving the same layout that
/// [`normalize_psf`] produces. Used to build synthetic image pairs.
pub fn gaussian_psf(size: ImageSize, sigma: f64) -> Result<Array2<f64>, ImageProcError> {
    if size.is_empty() {
        return Err(ImageProcError::InputShape("PSF size is empty".to_string()));
    }
    if !(sigma.is_finite() && sigma > 0.0) {
        return Err(ImageProcError::NumericDegeneracy(format!(
            "Gaussian PSF sigma must be positive, got {sigma}"
        )));
    }

    let (height, width) = size.shape();
    let wrap = |i: usize, n: usize| -> f64 {
        let d = i as f64;
        if i > n / 2 {
            d - n as f64
        } else {
            d
        }
    };

    let two_sigma2 = 2.0 * sigma * sigma;
    let psf = Array2::from_shape_fn((height, width), |(row, col)| {
        let dy = wrap(row, height);
        let dx = wrap(col, width);
        (-(dx * dx + dy * dy) / two_sigma2).exp()
    });

    let total = psf.sum();
    Ok(psf / total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn centered_kernel(size: usize, sigma: f64) -> Array2<f64> {
        let c = (size / 2) as f64;
        Array2::from_shape_fn((size, size), |(y, x)| {
            let dx = x as f64 - c;
            let dy = y as f64 - c;
            (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp()
        })
    }

    #[test]
    fn test_normalize_moves_peak_to_origin() {
        let kernel = centered_kernel(11, 1.5);
        let psf = normalize_psf(&kernel, ImageSize::from_width_height(32, 24)).unwrap();

        assert_eq!(psf.dim(), (24, 32));
        assert_eq!(peak_position(&psf), (0, 0));
        assert_relative_eq!(psf.sum(), 1.0, epsilon = 1e-12);

        // Neighbours of the peak wrap around the array edges
        assert_relative_eq!(psf[[0, 1]], psf[[0, 31]], epsilon = 1e-15);
        assert_relative_eq!(psf[[1, 0]], psf[[23, 0]], epsilon = 1e-15);
    }

    #[test]
    fn test_normalize_off_center_peak() {
        let mut kernel = Array2::zeros((5, 5));
        kernel[[1, 3]] = 4.0;
        kernel[[2, 3]] = 1.0;

        let psf = normalize_psf(&kernel, ImageSize::from_width_height(8, 8)).unwrap();
        assert_relative_eq!(psf[[0, 0]], 0.8);
        assert_relative_eq!(psf[[1, 0]], 0.2);
    }

    #[test]
    fn test_normalize_rejects_oversized_kernel() {
        let kernel = centered_kernel(9, 1.0);
        let result = normalize_psf(&kernel, ImageSize::from_width_height(8, 16));
        assert!(matches!(result, Err(ImageProcError::InputShape(_))));
    }

    #[test]
    fn test_normalize_rejects_empty_and_bad_flux() {
        let empty = Array2::<f64>::zeros((0, 3));
        assert!(matches!(
            normalize_psf(&empty, ImageSize::from_width_height(8, 8)),
            Err(ImageProcError::InputShape(_))
        ));

        let zero = Array2::<f64>::zeros((3, 3));
        assert!(matches!(
            normalize_psf(&zero, ImageSize::from_width_height(8, 8)),
            Err(ImageProcError::NumericDegeneracy(_))
        ));

        let mut nan = Array2::<f64>::ones((3, 3));
        nan[[1, 1]] = f64::NAN;
        assert!(matches!(
            normalize_psf(&nan, ImageSize::from_width_height(8, 8)),
            Err(ImageProcError::NumericDegeneracy(_))
        ));
    }

    #[test]
    fn test_gaussian_psf_matches_normalized_kernel() {
        let size = ImageSize::from_width_height(64, 64);
        let synthetic = gaussian_psf(size, 2.0).unwrap();
        let from_kernel = normalize_psf(&centered_kernel(31, 2.0), size).unwrap();

        assert_relative_eq!(synthetic.sum(), 1.0, epsilon = 1e-12);
        assert_eq!(peak_position(&synthetic), (0, 0));
        assert_relative_eq!(synthetic[[0, 0]], from_kernel[[0, 0]], epsilon = 1e-6);
        assert_relative_eq!(synthetic[[2, 62]], from_kernel[[2, 62]], epsilon = 1e-6);
    }

    #[test]
    fn test_gaussian_psf_rejects_bad_sigma() {
        let size = ImageSize::from_width_height(8, 8);
        assert!(gaussian_psf(size, 0.0).is_err());
        assert!(gaussian_psf(size, f64::NAN).is_err());
    }
}
