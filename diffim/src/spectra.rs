//! Fourier transforms of an image pair and the noise weighting shared by the
//! solver and the difference engine.

use ndarray::{Array2, Zip};
use num_complex::Complex64;
use shared::image_proc::Fft2d;

use crate::error::SubtractionError;
use crate::prepared::PreparedImage;

/// Spectra of a science/reference pair and their PSFs.
pub(crate) struct PairSpectra {
    pub fft: Fft2d,
    pub science_image: Array2<Complex64>,
    pub reference_image: Array2<Complex64>,
    pub science_psf: Array2<Complex64>,
    pub reference_psf: Array2<Complex64>,
}

impl PairSpectra {
    pub fn new(
        science: &PreparedImage,
        reference: &PreparedImage,
    ) -> Result<Self, SubtractionError> {
        if science.size() != reference.size() {
            return Err(SubtractionError::InputShape(format!(
                "science image is {} but reference image is {}",
                science.size(),
                reference.size()
            )));
        }

        let fft = Fft2d::new(science.size())?;
        Ok(Self {
            science_image: fft.forward(science.pixels())?,
            reference_image: fft.forward(reference.pixels())?,
            science_psf: fft.forward(science.psf())?,
            reference_psf: fft.forward(reference.psf())?,
            fft,
        })
    }

    /// `1 / √D(f)` with `D = σ_s²·r²·|P̂_s|² + σ_r²·|P̂_r|²`.
    ///
    /// Frequencies where `D` underflows below the smallest normal `f64` carry
    /// no signal in either PSF; their weight is 0 so that the quotient
    /// `0 / 0` resolves to 0.
    pub fn inverse_noise(
        &self,
        science_std: f64,
        reference_std: f64,
        ratio: f64,
    ) -> Result<Array2<f64>, SubtractionError> {
        if !(ratio.is_finite() && ratio > 0.0) {
            return Err(SubtractionError::NumericDegeneracy(format!(
                "flux ratio must be positive and finite, got {ratio}"
            )));
        }

        let science_var = science_std * science_std * ratio * ratio;
        let reference_var = reference_std * reference_std;

        let mut guarded = 0usize;
        let mut non_finite = false;
        let mut weights = Array2::zeros(self.science_psf.dim());
        Zip::from(&mut weights)
            .and(&self.science_psf)
            .and(&self.reference_psf)
            .for_each(|w, ps, pr| {
                let d = science_var * ps.norm_sqr() + reference_var * pr.norm_sqr();
                if !d.is_finite() {
                    non_finite = true;
                } else if d < f64::MIN_POSITIVE {
                    guarded += 1;
                } else {
                    *w = 1.0 / d.sqrt();
                }
            });

        if non_finite {
            return Err(SubtractionError::NumericDegeneracy(
                "noise power spectrum is not finite".to_string(),
            ));
        }
        if guarded > 0 {
            log::debug!("{guarded} frequencies with zero noise power set to 0");
        }

        Ok(weights)
    }
}
