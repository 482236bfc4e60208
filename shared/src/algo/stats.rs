//! Order statistics for robust background and residual estimates.
//!
//! All functions ignore NaN samples but keep infinities, so a caller that
//! wants finite-only statistics should filter before calling.

use thiserror::Error;

/// Errors raised by the order-statistic helpers.
#[derive(Error, Debug, PartialEq)]
pub enum StatsError {
    #[error("Insufficient data: {total} values supplied, none usable (all NaN)")]
    NoValidData { total: usize },
    #[error("Percentile {0} is outside [0, 100]")]
    InvalidPercentile(f64),
}

fn sorted_valid(values: &[f64]) -> Result<Vec<f64>, StatsError> {
    let mut valid: Vec<f64> = values.iter().filter(|v| !v.is_nan()).copied().collect();
    if valid.is_empty() {
        return Err(StatsError::NoValidData {
            total: values.len(),
        });
    }
    valid.sort_by(f64::total_cmp);
    Ok(valid)
}

/// Calculate median of a slice of f64 values
///
/// NaN values are dropped. For even-length data the average of the two
/// middle values is returned.
pub fn median(values: &[f64]) -> Result<f64, StatsError> {
    let valid = sorted_valid(values)?;
    let mid = valid.len() / 2;

    if valid.len() % 2 == 0 {
        Ok((valid[mid - 1] + valid[mid]) / 2.0)
    } else {
        Ok(valid[mid])
    }
}

/// Percentile with linear interpolation between closest ranks.
///
/// Matches the common "linear" definition: rank `p/100 * (n - 1)` is
/// interpolated between its floor and ceiling order statistics.
///
/// # Arguments
/// * `values` - Samples (NaN entries are ignored)
/// * `p` - Percentile in the closed range [0, 100]
pub fn percentile(values: &[f64], p: f64) -> Result<f64, StatsError> {
    if !(0.0..=100.0).contains(&p) {
        return Err(StatsError::InvalidPercentile(p));
    }
    let valid = sorted_valid(values)?;
    Ok(percentile_of_sorted(&valid, p))
}

/// Percentile of an already sorted, NaN-free slice.
pub(crate) fn percentile_of_sorted(sorted: &[f64], p: f64) -> f64 {
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

/// Median, first and third quartile in one sort.
pub fn quartiles(values: &[f64]) -> Result<(f64, f64, f64), StatsError> {
    let valid = sorted_valid(values)?;
    Ok((
        percentile_of_sorted(&valid, 25.0),
        percentile_of_sorted(&valid, 50.0),
        percentile_of_sorted(&valid, 75.0),
    ))
}
