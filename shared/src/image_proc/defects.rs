//! Saturation and invalid-pixel handling.
//!
//! Defective pixels are flagged in a boolean mask and replaced by the local
//! median of their good neighbours before any Fourier transform, since a
//! single saturated or NaN pixel would otherwise spread across the whole
//! spectrum.

use ndarray::{Array2, ArrayBase, Data, Ix2, Zip};
use rayon::prelude::*;

use super::ImageProcError;
use crate::algo::stats::median;

/// Minimum number of pixels sharing the image maximum for that maximum to
/// be treated as a clipped (saturated) plateau.
pub const SATURATION_PLATEAU_PIXELS: usize = 3;

/// Initial half-width of the neighbourhood searched when interpolating.
pub const INTERPOLATION_HALF_WIDTH: usize = 3;

/// Saturation threshold for an image.
///
/// The header value wins when present. Otherwise the image maximum is used
/// if at least [`SATURATION_PLATEAU_PIXELS`] finite pixels share it and it
/// lies above the median, which is what a detector clipping at full well
/// produces. Without such a plateau nothing is considered saturated and
/// `f64::INFINITY` is returned.
pub fn saturation_level<S>(image: &ArrayBase<S, Ix2>, header_value: Option<f64>) -> f64
where
    S: Data<Elem = f64>,
{
    if let Some(level) = header_value.filter(|v| !v.is_nan()) {
        return level;
    }

    let finite: Vec<f64> = image.iter().copied().filter(|v| v.is_finite()).collect();
    let Some(max) = finite.iter().copied().reduce(f64::max) else {
        return f64::INFINITY;
    };

    let at_max = finite.iter().filter(|&&v| v == max).count();
    let Ok(med) = median(&finite) else {
        return f64::INFINITY;
    };

    if at_max >= SATURATION_PLATEAU_PIXELS && max > med {
        log::debug!("Saturation plateau of {at_max} pixels at {max}");
        max
    } else {
        f64::INFINITY
    }
}

/// Flag saturated and invalid pixels.
///
/// A pixel is masked when its value is at or above `saturation` or when it
/// is NaN or infinite.
pub fn make_pixel_mask<S>(image: &ArrayBase<S, Ix2>, saturation: f64) -> Array2<bool>
where
    S: Data<Elem = f64>,
{
    image.mapv(|v| !v.is_finite() || v >= saturation)
}

/// Replace masked pixels by the median of nearby good pixels.
///
/// For each masked pixel a square window of half-width
/// [`INTERPOLATION_HALF_WIDTH`] is searched for unmasked finite pixels; the
/// window doubles until at least one is found. Replacement values are taken
/// from the input only, so masked pixels are filled independently (in
/// parallel).
///
/// # Errors
/// * `InputShape` if `mask` does not match the image shape
/// * `NumericDegeneracy` if no pixel is usable
pub fn interpolate_bad_pixels<S, M>(
    image: &ArrayBase<S, Ix2>,
    mask: &ArrayBase<M, Ix2>,
) -> Result<Array2<f64>, ImageProcError>
where
    S: Data<Elem = f64>,
    M: Data<Elem = bool>,
{
    if image.dim() != mask.dim() {
        return Err(ImageProcError::InputShape(format!(
            "mask shape {:?} does not match image shape {:?}",
            mask.dim(),
            image.dim()
        )));
    }

    let usable = |value: f64, masked: bool| !masked && value.is_finite();
    let has_usable = Zip::from(image)
        .and(mask)
        .fold(false, |acc, &v, &m| acc || usable(v, m));
    if !has_usable {
        return Err(ImageProcError::NumericDegeneracy(
            "every pixel is masked, nothing to interpolate from".to_string(),
        ));
    }

    let (image, mask) = (image.view(), mask.view());
    let (height, width) = image.dim();
    let masked: Vec<(usize, usize)> = mask
        .indexed_iter()
        .filter_map(|(idx, &m)| m.then_some(idx))
        .collect();

    let replacements: Vec<f64> = masked
        .par_iter()
        .map(|&(row, col)| {
            let mut half_width = INTERPOLATION_HALF_WIDTH;
            loop {
                let y0 = row.saturating_sub(half_width);
                let y1 = (row + half_width + 1).min(height);
                let x0 = col.saturating_sub(half_width);
                let x1 = (col + half_width + 1).min(width);

                let neighbours: Vec<f64> = Zip::from(image.slice(ndarray::s![y0..y1, x0..x1]))
                    .and(mask.slice(ndarray::s![y0..y1, x0..x1]))
                    .fold(Vec::new(), |mut acc, &v, &m| {
                        if usable(v, m) {
                            acc.push(v);
                        }
                        acc
                    });

                if let Ok(value) = median(&neighbours) {
                    return value;
                }
                // A usable pixel exists somewhere, so the window eventually reaches it
                half_width *= 2;
            }
        })
        .collect();

    let mut output = image.to_owned();
    for (&idx, value) in masked.iter().zip(replacements) {
        output[idx] = value;
    }
    let replaced = masked.len();

    log::debug!("Interpolated {replaced} masked pixels");
    Ok(output)
}
