//! Exposure preparation.
//!
//! A [`PreparedImage`] is a background-subtracted, defect-free pixel array
//! together with a PSF on the same grid and the noise statistics the
//! subtraction needs. It can only be built through validating constructors,
//! so the engine never sees mismatched shapes or non-finite pixels.

use ndarray::Array2;
use shared::image_proc::{
    estimate_background, interpolate_bad_pixels, make_pixel_mask, normalize_psf,
    saturation_level,
};
use shared::image_size::ImageSize;

use crate::config::PreparationConfig;
use crate::error::SubtractionError;

/// Zero point assigned to images unless a solved value is supplied.
///
/// The reference image defines the flux scale, so its zero point stays at
/// this value and the science zero point is expressed relative to it.
pub const REFERENCE_ZERO_POINT: f64 = 1.0;

/// Raw inputs for one exposure as read from disk.
#[derive(Debug, Clone)]
pub struct RawExposure {
    /// Image pixels, top row first
    pub pixels: Array2<f64>,
    /// PSF kernel, typically a small stamp with its peak near the middle
    pub psf: Array2<f64>,
    /// Saturation threshold recorded in the image header
    pub header_saturation: Option<f64>,
}

impl RawExposure {
    pub fn new(pixels: Array2<f64>, psf: Array2<f64>) -> Self {
        Self {
            pixels,
            psf,
            header_saturation: None,
        }
    }

    pub fn with_header_saturation(mut self, saturation: Option<f64>) -> Self {
        self.header_saturation = saturation;
        self
    }
}

/// One exposure ready for differencing.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pixels: Array2<f64>,
    psf: Array2<f64>,
    zero_point: f64,
    background_std: f64,
    background_level: f64,
    saturation_level: f64,
    defect_mask: Array2<bool>,
}

impl PreparedImage {
    /// Build a prepared image from already processed parts.
    ///
    /// The background level defaults to 0, the saturation level to infinity,
    /// the defect mask to all clear and the zero point to
    /// [`REFERENCE_ZERO_POINT`].
    ///
    /// # Errors
    /// * `InputShape` if the arrays are empty or their shapes differ
    /// * `NumericDegeneracy` if a pixel or PSF value is non-finite, or
    ///   `background_std` is not a positive finite number
    pub fn from_parts(
        pixels: Array2<f64>,
        psf: Array2<f64>,
        background_std: f64,
    ) -> Result<Self, SubtractionError> {
        let size = ImageSize::of(&pixels);
        if size.is_empty() {
            return Err(SubtractionError::InputShape(
                "image has no pixels".to_string(),
            ));
        }
        if psf.dim() != pixels.dim() {
            return Err(SubtractionError::InputShape(format!(
                "PSF of {} does not match image of {size}",
                ImageSize::of(&psf)
            )));
        }
        if pixels.iter().any(|v| !v.is_finite()) {
            return Err(SubtractionError::NumericDegeneracy(
                "prepared pixels must be finite".to_string(),
            ));
        }
        if psf.iter().any(|v| !v.is_finite()) {
            return Err(SubtractionError::NumericDegeneracy(
                "prepared PSF must be finite".to_string(),
            ));
        }
        if !(background_std.is_finite() && background_std > 0.0) {
            return Err(SubtractionError::NumericDegeneracy(format!(
                "background noise must be positive and finite, got {background_std}"
            )));
        }

        let defect_mask = Array2::from_elem(pixels.dim(), false);
        Ok(Self {
            pixels,
            psf,
            zero_point: REFERENCE_ZERO_POINT,
            background_std,
            background_level: 0.0,
            saturation_level: f64::INFINITY,
            defect_mask,
        })
    }

    /// Same image with a different flux zero point.
    pub fn with_zero_point(self, zero_point: f64) -> Result<Self, SubtractionError> {
        if !(zero_point.is_finite() && zero_point > 0.0) {
            return Err(SubtractionError::NumericDegeneracy(format!(
                "zero point must be positive and finite, got {zero_point}"
            )));
        }
        Ok(Self { zero_point, ..self })
    }

    /// Record the background level and saturation threshold the pixels were
    /// corrected with.
    pub fn with_background(self, background_level: f64, saturation_level: f64) -> Self {
        Self {
            background_level,
            saturation_level,
            ..self
        }
    }

    /// Attach the mask of pixels that were interpolated over.
    pub fn with_defect_mask(self, defect_mask: Array2<bool>) -> Result<Self, SubtractionError> {
        if defect_mask.dim() != self.pixels.dim() {
            return Err(SubtractionError::InputShape(format!(
                "defect mask of {} does not match image of {}",
                ImageSize::of(&defect_mask),
                self.size()
            )));
        }
        Ok(Self {
            defect_mask,
            ..self
        })
    }

    pub fn pixels(&self) -> &Array2<f64> {
        &self.pixels
    }

    /// PSF on the image grid, unit sum, peak at (0, 0).
    pub fn psf(&self) -> &Array2<f64> {
        &self.psf
    }

    pub fn zero_point(&self) -> f64 {
        self.zero_point
    }

    pub fn background_std(&self) -> f64 {
        self.background_std
    }

    pub fn background_level(&self) -> f64 {
        self.background_level
    }

    pub fn saturation_level(&self) -> f64 {
        self.saturation_level
    }

    /// Pixels that were saturated or invalid before interpolation.
    pub fn defect_mask(&self) -> &Array2<bool> {
        &self.defect_mask
    }

    pub fn size(&self) -> ImageSize {
        ImageSize::of(&self.pixels)
    }
}

/// Turn a raw exposure into a [`PreparedImage`].
///
/// # Steps
/// 1. Resize and recenter the PSF onto the image grid
/// 2. Estimate background level and noise over a stamp grid
/// 3. Determine the saturation level from the header or the image
/// 4. Mask saturated and non-finite pixels
/// 5. Interpolate over the mask and subtract the background level
///
/// The zero point of the result is [`REFERENCE_ZERO_POINT`].
pub fn prepare_image(
    raw: &RawExposure,
    config: &PreparationConfig,
) -> Result<PreparedImage, SubtractionError> {
    let target = ImageSize::of(&raw.pixels);
    if target.is_empty() {
        return Err(SubtractionError::InputShape(
            "image has no pixels".to_string(),
        ));
    }

    let psf = normalize_psf(&raw.psf, target)?;
    let background = estimate_background(&raw.pixels, config.n_stamps)?;
    if !(background.std_dev.is_finite() && background.std_dev > 0.0) {
        return Err(SubtractionError::NumericDegeneracy(format!(
            "background noise estimate is {}, image has no measurable noise",
            background.std_dev
        )));
    }

    let saturation = saturation_level(&raw.pixels, raw.header_saturation);
    let mask = make_pixel_mask(&raw.pixels, saturation);
    let masked = mask.iter().filter(|&&m| m).count();

    let mut pixels = interpolate_bad_pixels(&raw.pixels, &mask)?;
    pixels -= background.level;

    log::debug!(
        "Prepared {target} image: level={:.4}, std={:.4}, saturation={}, {masked} masked pixels",
        background.level,
        background.std_dev,
        saturation
    );

    Ok(PreparedImage::from_parts(pixels, psf, background.std_dev)?
        .with_background(background.level, saturation)
        .with_defect_mask(mask)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use shared::image_proc::{gaussian_psf, simple_normal_array};

    fn stamp_psf() -> Array2<f64> {
        Array2::from_shape_fn((9, 9), |(y, x)| {
            let dx = x as f64 - 4.0;
            let dy = y as f64 - 4.0;
            (-(dx * dx + dy * dy) / 8.0).exp()
        })
    }

    #[test]
    fn test_from_parts_validates_invariants() {
        let size = ImageSize::from_width_height(16, 16);
        let psf = gaussian_psf(size, 1.5).unwrap();
        let pixels = Array2::zeros((16, 16));

        let image = PreparedImage::from_parts(pixels.clone(), psf.clone(), 2.0).unwrap();
        assert_eq!(image.zero_point(), REFERENCE_ZERO_POINT);
        assert_eq!(image.size(), size);
        assert!(image.defect_mask().iter().all(|&m| !m));

        assert!(matches!(
            PreparedImage::from_parts(Array2::zeros((16, 8)), psf.clone(), 2.0),
            Err(SubtractionError::InputShape(_))
        ));
        assert!(matches!(
            PreparedImage::from_parts(pixels.clone(), psf.clone(), 0.0),
            Err(SubtractionError::NumericDegeneracy(_))
        ));

        let mut bad = pixels;
        bad[[2, 2]] = f64::NAN;
        assert!(matches!(
            PreparedImage::from_parts(bad, psf, 2.0),
            Err(SubtractionError::NumericDegeneracy(_))
        ));
    }

    #[test]
    fn test_with_zero_point_builds_new_value() {
        let size = ImageSize::from_width_height(8, 8);
        let image =
            PreparedImage::from_parts(Array2::zeros((8, 8)), gaussian_psf(size, 1.0).unwrap(), 1.0)
                .unwrap();

        let scaled = image.clone().with_zero_point(2.5).unwrap();
        assert_eq!(scaled.zero_point(), 2.5);
        assert_eq!(image.zero_point(), 1.0);
        assert!(image.with_zero_point(-1.0).is_err());
    }

    #[test]
    fn test_prepare_removes_background() {
        let pixels = simple_normal_array((64, 64), 250.0, 4.0, 17).unwrap();
        let raw = RawExposure::new(pixels, stamp_psf());

        let prepared = prepare_image(&raw, &PreparationConfig::default()).unwrap();

        assert_relative_eq!(prepared.background_level(), 250.0, epsilon = 0.5);
        assert_relative_eq!(prepared.background_std(), 4.0, epsilon = 0.5);
        assert_relative_eq!(prepared.pixels().mean().unwrap(), 0.0, epsilon = 0.5);
        assert_relative_eq!(prepared.psf().sum(), 1.0, epsilon = 1e-12);
        assert!(prepared.psf()[[0, 0]] >= prepared.psf()[[0, 1]]);
        assert_eq!(prepared.saturation_level(), f64::INFINITY);
    }

    #[test]
    fn test_prepare_leaves_pixels_finite() {
        let mut pixels = simple_normal_array((64, 64), 100.0, 5.0, 23).unwrap();
        pixels[[10, 10]] = f64::NAN;
        pixels[[20, 30]] = f64::INFINITY;
        pixels[[40, 40]] = 60000.0;
        pixels[[40, 41]] = 60000.0;

        let raw = RawExposure::new(pixels, stamp_psf()).with_header_saturation(Some(50000.0));
        let prepared = prepare_image(&raw, &PreparationConfig::default()).unwrap();

        assert!(prepared.pixels().iter().all(|v| v.is_finite()));
        assert_eq!(prepared.saturation_level(), 50000.0);
        assert_eq!(prepared.defect_mask().iter().filter(|&&m| m).count(), 4);
        assert!(prepared.pixels()[[40, 40]].abs() < 50.0);
    }

    #[test]
    fn test_prepare_rejects_oversized_psf() {
        let raw = RawExposure::new(Array2::zeros((8, 8)), stamp_psf());
        assert!(matches!(
            prepare_image(&raw, &PreparationConfig { n_stamps: 1 }),
            Err(SubtractionError::InputShape(_))
        ));
    }

    #[test]
    fn test_prepare_rejects_too_many_stamps() {
        let pixels = simple_normal_array((32, 32), 0.0, 1.0, 2).unwrap();
        let raw = RawExposure::new(pixels, stamp_psf());
        assert!(matches!(
            prepare_image(&raw, &PreparationConfig { n_stamps: 16 }),
            Err(SubtractionError::InputShape(_))
        ));
    }

    #[test]
    fn test_prepare_noise_free_image_is_degenerate() {
        let raw = RawExposure::new(Array2::from_elem((32, 32), 10.0), stamp_psf());
        assert!(matches!(
            prepare_image(&raw, &PreparationConfig::default()),
            Err(SubtractionError::NumericDegeneracy(_))
        ));
    }
}
