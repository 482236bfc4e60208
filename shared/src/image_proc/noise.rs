//! Background and noise statistics for astronomical images.
//!
//! Provides the noise characterization needed before optimal subtraction:
//! - Stamp-based estimation of the background level and per-pixel noise
//! - Deterministic Gaussian noise fields for tests and synthetic data
//!
//! # Stamp Statistics
//!
//! The image is divided into an `n_stamps × n_stamps` grid of disjoint
//! stamps. Each stamp yields a median (background level) and a robust
//! standard deviation from its interquartile range. Taking the median over
//! stamps keeps a large-scale gradient or a bright source in one corner from
//! dominating the estimate.

use ndarray::{Array2, ArrayBase, Data, Ix2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, NormalError};

use super::ImageProcError;
use crate::algo::stats::{median, quartiles};

/// Ratio between the standard deviation of a normal distribution and its
/// interquartile range (1 / 1.349).
pub const IQR_TO_SIGMA: f64 = 0.7413;

/// Smallest stamp side length, in pixels, accepted by [`estimate_background`].
pub const MIN_STAMP_SIZE: usize = 4;

/// Background statistics of an image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackgroundStats {
    /// Per-pixel noise standard deviation
    pub std_dev: f64,
    /// Background (sky) level
    pub level: f64,
}

/// Generate a 2D array of normally distributed values for testing purposes.
///
/// This function creates a deterministic array filled with values sampled from
/// a normal (Gaussian) distribution. It's specifically designed for unit tests
/// and synthetic image pairs where reproducible noise patterns are needed.
///
/// # Arguments
/// * `size` - Tuple of (height, width) for the output array dimensions
/// * `mean` - Mean value of the normal distribution
/// * `std_dev` - Standard deviation of the normal distribution
/// * `seed` - Random seed for deterministic output
///
/// # Returns
/// A 2D array with values sampled from Normal(mean, std_dev), or the
/// distribution error for a negative or non-finite `std_dev`
///
/// # Example
/// ```
/// use shared::image_proc::noise::simple_normal_array;
///
/// // Create 10x10 array with mean=100, std_dev=10, seed=42
/// let noise = simple_normal_array((10, 10), 100.0, 10.0, 42).unwrap();
/// assert_eq!(noise.dim(), (10, 10));
/// ```
pub fn simple_normal_array(
    size: (usize, usize),
    mean: f64,
    std_dev: f64,
    seed: u64,
) -> Result<Array2<f64>, NormalError> {
    // Normal::new only rejects a non-finite deviation
    if !(std_dev >= 0.0 && std_dev.is_finite()) {
        return Err(NormalError::BadVariance);
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let normal_dist = Normal::new(mean, std_dev)?;
    Ok(Array2::from_shape_fn(size, |_| normal_dist.sample(&mut rng)))
}

/// Estimate background level and noise over a grid of stamps.
///
/// # Algorithm
/// 1. Split the image into `n_stamps` rows and `n_stamps` columns of stamps;
///    stamp boundaries are `k * extent / n_stamps`, so stamps tile the image
///    exactly and differ in size by at most one pixel
/// 2. For every stamp, take the finite pixels and compute the median and
///    `IQR_TO_SIGMA * (q75 - q25)`
/// 3. Return the median of the stamp noise values and of the stamp medians
///
/// # Arguments
/// * `image` - Raw image (non-finite pixels are ignored)
/// * `n_stamps` - Number of stamps along each axis
///
/// # Errors
/// * `InputShape` if `n_stamps` is zero or a stamp would be smaller than
///   [`MIN_STAMP_SIZE`] pixels on a side
/// * `NumericDegeneracy` if no stamp contains a finite pixel
pub fn estimate_background<S>(
    image: &ArrayBase<S, Ix2>,
    n_stamps: usize,
) -> Result<BackgroundStats, ImageProcError>
where
    S: Data<Elem = f64>,
{
    let (height, width) = image.dim();

    if n_stamps == 0 {
        return Err(ImageProcError::InputShape(
            "stamp count must be at least 1".to_string(),
        ));
    }
    if height / n_stamps < MIN_STAMP_SIZE || width / n_stamps < MIN_STAMP_SIZE {
        return Err(ImageProcError::InputShape(format!(
            "{n_stamps}x{n_stamps} stamps do not fit a {width}x{height} image \
             (stamps must be at least {MIN_STAMP_SIZE} pixels wide)"
        )));
    }

    let mut stamp_levels = Vec::with_capacity(n_stamps * n_stamps);
    let mut stamp_sigmas = Vec::with_capacity(n_stamps * n_stamps);

    for y_stamp in 0..n_stamps {
        let y0 = y_stamp * height / n_stamps;
        let y1 = (y_stamp + 1) * height / n_stamps;
        for x_stamp in 0..n_stamps {
            let x0 = x_stamp * width / n_stamps;
            let x1 = (x_stamp + 1) * width / n_stamps;

            let values: Vec<f64> = image
                .slice(ndarray::s![y0..y1, x0..x1])
                .iter()
                .copied()
                .filter(|v| v.is_finite())
                .collect();

            // A stamp made entirely of defects carries no information
            let Ok((q25, med, q75)) = quartiles(&values) else {
                continue;
            };
            stamp_levels.push(med);
            stamp_sigmas.push(IQR_TO_SIGMA * (q75 - q25));
        }
    }

    let degenerate =
        |_| ImageProcError::NumericDegeneracy("no stamp contains a finite pixel".to_string());
    let stats = BackgroundStats {
        std_dev: median(&stamp_sigmas).map_err(degenerate)?,
        level: median(&stamp_levels).map_err(degenerate)?,
    };

    log::debug!(
        "Background from {} usable stamps: level={:.4}, std={:.4}",
        stamp_levels.len(),
        stats.level,
        stats.std_dev
    );

    Ok(stats)
}
