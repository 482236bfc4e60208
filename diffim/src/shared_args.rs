use crate::config::SubtractionConfig;
use crate::error::SubtractionError;
use crate::normalize::Normalization;
use clap::Parser;
use std::path::PathBuf;

/// Parse a normalization mode name; unknown names select no rescaling
fn parse_normalization(s: &str) -> Result<Normalization, String> {
    Ok(Normalization::parse(s.trim()))
}

/// Subtraction options shared by the command-line tool and the demos
///
/// Options left unset keep the value from `--config` if one is given, or the
/// built-in default otherwise.
#[derive(Parser, Debug, Clone, Default)]
pub struct SubtractionArgs {
    /// JSON configuration file; command-line options override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Photometric normalization: reference (t), science (i) or none [default: reference]
    #[arg(long, value_parser = parse_normalization)]
    pub normalization: Option<Normalization>,

    /// Difference image output path [default: output.fits]
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Also write the difference PSF (<output>.psf.<ext>)
    #[arg(long, default_value_t = false)]
    pub find_psf: bool,

    /// Also write the matched-filter image (<output>.match.<ext>)
    #[arg(long, default_value_t = false)]
    pub matched_filter: bool,

    /// Background stamps along each image axis [default: 4]
    #[arg(long)]
    pub n_stamps: Option<usize>,

    /// Relative convergence tolerance of the zero-point solver [default: 1e-6]
    #[arg(long)]
    pub tolerance: Option<f64>,

    /// Iteration cap of the zero-point solver [default: 20]
    #[arg(long)]
    pub max_iterations: Option<usize>,
}

impl SubtractionArgs {
    /// Build the run configuration: file (or defaults) first, then flags.
    pub fn to_config(&self) -> Result<SubtractionConfig, SubtractionError> {
        let mut config = match &self.config {
            Some(path) => SubtractionConfig::load(path)?,
            None => SubtractionConfig::default(),
        };

        if let Some(normalization) = self.normalization {
            config.normalization = normalization;
        }
        if let Some(output) = &self.output {
            config.output = output.clone();
        }
        config.find_psf |= self.find_psf;
        config.matched_filter |= self.matched_filter;
        if let Some(n_stamps) = self.n_stamps {
            config.preparation.n_stamps = n_stamps;
        }
        if let Some(tolerance) = self.tolerance {
            config.solver.tolerance = tolerance;
        }
        if let Some(max_iterations) = self.max_iterations {
            config.solver.max_iterations = max_iterations;
        }

        config.validate()?;
        Ok(config)
    }
}
