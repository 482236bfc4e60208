//! Fourier-domain optimal subtraction.
//!
//! Each image is convolved with the other's PSF so both share the same
//! effective PSF, the science image is scaled by the flux ratio, and the
//! difference is whitened by the combined noise spectrum:
//!
//! ```text
//! D(f) = σ_s²·r²·|P̂_s|² + σ_r²·|P̂_r|²
//! Δ̂(f) = (Î_s·P̂_r − r·Î_r·P̂_s) / √D
//! ```
//!
//! The result has white noise and a point source in it has the shape of the
//! difference PSF `P̂_Δ = r·P̂_s·P̂_r / (Z_d·√D)`.

use ndarray::{Array2, Zip};
use num_complex::Complex64;

use crate::error::SubtractionError;
use crate::normalize::{normalize_difference_image, Normalization};
use crate::prepared::PreparedImage;
use crate::spectra::PairSpectra;
use crate::zero_point::difference_zero_point_from_ratio;

/// Output of one optimal subtraction.
#[derive(Debug, Clone)]
pub struct DifferenceResult {
    /// Difference image, real valued
    pub image: Array2<f64>,
    /// Difference PSF, peak at (0, 0), when requested
    pub psf: Option<Array2<f64>>,
    /// Science/reference flux ratio used
    pub zero_point_ratio: f64,
    /// Photometric convention `image` is expressed in
    pub normalization: Normalization,
}

impl DifferenceResult {
    /// Rescale the image to `mode` (see [`normalize_difference_image`]).
    ///
    /// Expects a raw result as produced by [`difference`].
    pub fn normalized(
        self,
        science: &PreparedImage,
        reference: &PreparedImage,
        mode: Normalization,
    ) -> Self {
        let image = normalize_difference_image(&self.image, science, reference, mode);
        Self {
            image,
            normalization: mode,
            ..self
        }
    }
}

/// Compute the optimal difference `science − reference`.
///
/// # Arguments
/// * `science`, `reference` - Prepared images of identical shape
/// * `zero_point_ratio` - Science/reference flux ratio `r`
/// * `propagate_psf` - Also compute the difference PSF
///
/// # Errors
/// * `InputShape` if the images differ in shape
/// * `NumericDegeneracy` if `r` is not positive and finite or the noise
///   spectrum is not finite
///
/// Frequencies where both PSFs carry no power contribute 0.
pub fn difference(
    science: &PreparedImage,
    reference: &PreparedImage,
    zero_point_ratio: f64,
    propagate_psf: bool,
) -> Result<DifferenceResult, SubtractionError> {
    let spectra = PairSpectra::new(science, reference)?;
    let weights = spectra.inverse_noise(
        science.background_std(),
        reference.background_std(),
        zero_point_ratio,
    )?;
    let r = zero_point_ratio;

    let mut diff_spectrum = Array2::<Complex64>::zeros(weights.dim());
    Zip::from(&mut diff_spectrum)
        .and(&spectra.science_image)
        .and(&spectra.reference_image)
        .and(&spectra.science_psf)
        .and(&spectra.reference_psf)
        .and(&weights)
        .for_each(|out, &is, &ir, &ps, &pr, &w| {
            *out = (is * pr - ir * ps * r) * w;
        });
    let image = spectra.fft.inverse_real(diff_spectrum)?;

    let psf = if propagate_psf {
        let zd = difference_zero_point_from_ratio(
            science.background_std(),
            reference.background_std(),
            r,
        );
        let mut psf_spectrum = Array2::<Complex64>::zeros(weights.dim());
        Zip::from(&mut psf_spectrum)
            .and(&spectra.science_psf)
            .and(&spectra.reference_psf)
            .and(&weights)
            .for_each(|out, &ps, &pr, &w| {
                *out = ps * pr * (r * w / zd);
            });
        Some(spectra.fft.inverse_real(psf_spectrum)?)
    } else {
        None
    };

    log::debug!(
        "Difference image computed for {} pair, ratio={r:.6}, psf={}",
        science.size(),
        propagate_psf
    );

    Ok(DifferenceResult {
        image,
        psf,
        zero_point_ratio: r,
        normalization: Normalization::None,
    })
}
