//! Flux zero points.
//!
//! The science zero point is solved relative to the reference (whose zero
//! point is fixed at [`crate::prepared::REFERENCE_ZERO_POINT`]) by fitting the
//! cross-convolved, noise-whitened images against each other. The fit needs
//! the noise weighting, which itself depends on the ratio being solved for,
//! so the two are iterated to a fixed point.

use ndarray::{Array2, Zip};
use num_complex::Complex64;
use shared::algo::stats::median;

use crate::config::SolverConfig;
use crate::error::SubtractionError;
use crate::prepared::PreparedImage;
use crate::spectra::PairSpectra;

/// Converts a median absolute deviation into a normal standard deviation.
const MAD_TO_SIGMA: f64 = 1.0 / 0.6745;

/// Inner IRLS iterations per outer solver step.
const MAX_IRLS_ITERATIONS: usize = 50;

/// Result of [`solve_zero_point`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZeroPointSolution {
    /// Science zero point on the reference scale
    pub zero_point: f64,
    /// Outer iterations performed
    pub iterations: usize,
    /// False if the iteration cap was hit or the fit degenerated
    pub converged: bool,
}

/// Flux zero point of a difference image, from the two noise levels and the
/// science/reference flux ratio.
///
/// `Z_d = r / √(σ_s² + σ_r²·r²)`
pub fn difference_zero_point_from_ratio(science_std: f64, reference_std: f64, ratio: f64) -> f64 {
    ratio / (science_std * science_std + reference_std * reference_std * ratio * ratio).sqrt()
}

/// Flux zero point of the difference of `science` and `reference`.
pub fn difference_zero_point(science: &PreparedImage, reference: &PreparedImage) -> f64 {
    let ratio = science.zero_point() / reference.zero_point();
    difference_zero_point_from_ratio(science.background_std(), reference.background_std(), ratio)
}

/// Solve for the science zero point.
///
/// Each step builds the noise-whitened cross-convolutions
/// `S = F⁻¹[Î_s·P̂_r/√D]` and `R = F⁻¹[Î_r·P̂_s/√D]` for the current ratio
/// `r`, then fits `S = r'·R` with a Huber regression through the origin over
/// pixels that are not defects in either image. The loop stops once the
/// relative change in `r` falls below `config.tolerance`.
///
/// Hitting `config.max_iterations`, or a fit with nothing to fit, returns the
/// last estimate with `converged == false` and logs a warning.
pub fn solve_zero_point(
    science: &PreparedImage,
    reference: &PreparedImage,
    config: &SolverConfig,
) -> Result<ZeroPointSolution, SubtractionError> {
    let spectra = PairSpectra::new(science, reference)?;

    let usable = Zip::from(science.defect_mask())
        .and(reference.defect_mask())
        .map_collect(|&s, &r| !(s || r));

    let finish = |ratio: f64, iterations: usize, converged: bool| ZeroPointSolution {
        zero_point: ratio * reference.zero_point(),
        iterations,
        converged,
    };

    let mut ratio = config.initial_ratio;
    for iteration in 1..=config.max_iterations {
        let weights = spectra.inverse_noise(
            science.background_std(),
            reference.background_std(),
            ratio,
        )?;

        let whitened = |image: &Array2<Complex64>, psf: &Array2<Complex64>| {
            let mut spectrum = image * psf;
            Zip::from(&mut spectrum)
                .and(&weights)
                .for_each(|v, &w| *v *= w);
            spectrum
        };
        let s = spectra.fft.inverse_real(whitened(
            &spectra.science_image,
            &spectra.reference_psf,
        ))?;
        let r = spectra.fft.inverse_real(whitened(
            &spectra.reference_image,
            &spectra.science_psf,
        ))?;

        let (x, y) = Zip::from(&r).and(&s).and(&usable).fold(
            (Vec::new(), Vec::new()),
            |(mut x, mut y), &rv, &sv, &ok| {
                if ok {
                    x.push(rv);
                    y.push(sv);
                }
                (x, y)
            },
        );

        let Some(new_ratio) = huber_slope(&x, &y, config.huber_threshold, config.tolerance) else {
            log::warn!(
                "Zero-point fit degenerate at iteration {iteration}, keeping ratio {ratio:.6}"
            );
            return Ok(finish(ratio, iteration, false));
        };

        let change = (new_ratio - ratio).abs() / new_ratio.abs();
        log::debug!("Zero-point iteration {iteration}: ratio={new_ratio:.8}, change={change:.3e}");
        ratio = new_ratio;

        if change < config.tolerance {
            log::info!("Zero point converged to {ratio:.6} after {iteration} iterations");
            return Ok(finish(ratio, iteration, true));
        }
    }

    log::warn!(
        "Zero point did not converge in {} iterations, using {ratio:.6}",
        config.max_iterations
    );
    Ok(finish(ratio, config.max_iterations, false))
}

/// Huber M-estimate of the slope of `y = b·x`, by iteratively reweighted
/// least squares.
///
/// Starts from the ordinary least-squares slope. Residuals are scaled by
/// their MAD-based standard deviation and points beyond `threshold` scaled
/// units get weight `threshold / |u|`. Returns `None` when there are no
/// points, `x` has no variance, or the slope is not a positive finite number.
pub(crate) fn huber_slope(x: &[f64], y: &[f64], threshold: f64, tolerance: f64) -> Option<f64> {
    let sxx: f64 = x.iter().map(|v| v * v).sum();
    if x.is_empty() || sxx <= f64::MIN_POSITIVE {
        return None;
    }
    let sxy: f64 = x.iter().zip(y).map(|(a, b)| a * b).sum();
    let mut slope = sxy / sxx;

    for _ in 0..MAX_IRLS_ITERATIONS {
        let residuals: Vec<f64> = x.iter().zip(y).map(|(a, b)| b - slope * a).collect();
        let center = median(&residuals).ok()?;
        let deviations: Vec<f64> = residuals.iter().map(|r| (r - center).abs()).collect();
        let scale = median(&deviations).ok()? * MAD_TO_SIGMA;

        // Exact fit, nothing left to reweight
        if !(scale > f64::MIN_POSITIVE) {
            break;
        }

        let (mut wxy, mut wxx) = (0.0, 0.0);
        for ((a, b), r) in x.iter().zip(y).zip(&residuals) {
            let u = (r / scale).abs();
            let w = if u <= threshold { 1.0 } else { threshold / u };
            wxy += w * a * b;
            wxx += w * a * a;
        }
        if wxx <= f64::MIN_POSITIVE {
            return None;
        }

        let next = wxy / wxx;
        let change = (next - slope).abs() / next.abs();
        slope = next;
        if change < tolerance {
            break;
        }
    }

    (slope.is_finite() && slope > 0.0).then_some(slope)
}
