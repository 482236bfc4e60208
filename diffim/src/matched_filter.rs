//! Matched filtering of difference images.

use ndarray::{Array2, Zip};
use shared::image_proc::Fft2d;
use shared::image_size::ImageSize;

use crate::error::SubtractionError;
use crate::prepared::PreparedImage;
use crate::zero_point::difference_zero_point;

/// Correlate a difference image with its own PSF.
///
/// Computes `F⁻¹[Z_d·Î_Δ·|P̂_Δ|]`, where `Z_d` is the difference zero point of
/// the pair. Peaks of the result mark point-source candidates, with heights
/// proportional to their flux on the difference zero-point scale.
///
/// # Arguments
/// * `science`, `reference` - The pair the difference was computed from,
///   with the science zero point already solved
/// * `difference_image` - Raw (unnormalized) difference image
/// * `difference_psf` - Difference PSF on the same grid
pub fn matched_filter(
    science: &PreparedImage,
    reference: &PreparedImage,
    difference_image: &Array2<f64>,
    difference_psf: &Array2<f64>,
) -> Result<Array2<f64>, SubtractionError> {
    if difference_image.dim() != difference_psf.dim() {
        return Err(SubtractionError::InputShape(format!(
            "difference PSF of {} does not match difference image of {}",
            ImageSize::of(difference_psf),
            ImageSize::of(difference_image)
        )));
    }

    let fft = Fft2d::new(ImageSize::of(difference_image))?;
    let zd = difference_zero_point(science, reference);

    let mut spectrum = fft.forward(difference_image)?;
    let psf_spectrum = fft.forward(difference_psf)?;
    Zip::from(&mut spectrum)
        .and(&psf_spectrum)
        .for_each(|v, p| *v *= zd * p.norm());

    Ok(fft.inverse_real(spectrum)?)
}
