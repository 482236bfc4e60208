//! Run configuration.
//!
//! Every field has a default, so a JSON file only needs to name the values
//! it changes:
//!
//! ```json
//! { "normalization": "science", "solver": { "tolerance": 1e-8 } }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::SubtractionError;
use crate::normalize::Normalization;

/// Default number of background stamps along each image axis.
pub const DEFAULT_N_STAMPS: usize = 4;

/// Default output file name.
pub const DEFAULT_OUTPUT: &str = "output.fits";

/// Settings for turning a raw exposure into a prepared image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreparationConfig {
    /// Background stamps along each axis (the grid is `n_stamps × n_stamps`)
    pub n_stamps: usize,
}

impl Default for PreparationConfig {
    fn default() -> Self {
        Self {
            n_stamps: DEFAULT_N_STAMPS,
        }
    }
}

/// Settings for the iterative zero-point solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Relative change in the flux ratio below which the solver stops
    pub tolerance: f64,
    /// Cap on outer iterations
    pub max_iterations: usize,
    /// Huber threshold, in units of the robust residual scale
    pub huber_threshold: f64,
    /// Starting science/reference flux ratio
    pub initial_ratio: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            max_iterations: 20,
            huber_threshold: 1.345,
            initial_ratio: 1.0,
        }
    }
}

/// Complete configuration of one subtraction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtractionConfig {
    /// Photometric convention of the written difference image
    pub normalization: Normalization,
    /// Path of the difference image
    pub output: PathBuf,
    /// Also write the difference PSF
    pub find_psf: bool,
    /// Also write the matched-filter image
    pub matched_filter: bool,
    pub preparation: PreparationConfig,
    pub solver: SolverConfig,
}

impl Default for SubtractionConfig {
    fn default() -> Self {
        Self {
            normalization: Normalization::Reference,
            output: PathBuf::from(DEFAULT_OUTPUT),
            find_psf: false,
            matched_filter: false,
            preparation: PreparationConfig::default(),
            solver: SolverConfig::default(),
        }
    }
}

impl SubtractionConfig {
    /// Load a configuration from a JSON file, filling missing fields with defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SubtractionError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SubtractionError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// True when the pipeline has to propagate the difference PSF.
    pub fn needs_difference_psf(&self) -> bool {
        self.find_psf || self.matched_filter
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), SubtractionError> {
        let solver = &self.solver;
        if self.preparation.n_stamps == 0 {
            return Err(SubtractionError::Config(
                "n_stamps must be at least 1".to_string(),
            ));
        }
        if !(solver.tolerance.is_finite() && solver.tolerance > 0.0) {
            return Err(SubtractionError::Config(format!(
                "solver tolerance must be positive, got {}",
                solver.tolerance
            )));
        }
        if solver.max_iterations == 0 {
            return Err(SubtractionError::Config(
                "solver max_iterations must be at least 1".to_string(),
            ));
        }
        if !(solver.huber_threshold.is_finite() && solver.huber_threshold > 0.0) {
            return Err(SubtractionError::Config(format!(
                "Huber threshold must be positive, got {}",
                solver.huber_threshold
            )));
        }
        if !(solver.initial_ratio.is_finite() && solver.initial_ratio > 0.0) {
            return Err(SubtractionError::Config(format!(
                "initial flux ratio must be positive, got {}",
                solver.initial_ratio
            )));
        }
        if self.output.as_os_str().is_empty() {
            return Err(SubtractionError::Config("output path is empty".to_string()));
        }
        Ok(())
    }
}
