//! End-to-end subtraction of an image pair.
//!
//! [`subtract`] works on prepared images in memory; [`run`] adds reading the
//! exposures and PSFs from FITS files and writing the products next to the
//! configured output path.

use ndarray::Array2;
use shared::io::{read_fits_image, read_psf_file, write_fits_image, FitsHeader};
use std::path::{Path, PathBuf};

use crate::config::SubtractionConfig;
use crate::difference::{difference, DifferenceResult};
use crate::error::SubtractionError;
use crate::matched_filter::matched_filter;
use crate::normalize::Normalization;
use crate::prepared::{prepare_image, PreparedImage, RawExposure};
use crate::zero_point::{difference_zero_point, solve_zero_point, ZeroPointSolution};

/// Tag inserted into the output name for the difference PSF.
pub const PSF_TAG: &str = "psf";
/// Tag inserted into the output name for the matched-filter image.
pub const MATCH_TAG: &str = "match";

/// Image and PSF files of one exposure.
#[derive(Debug, Clone)]
pub struct ExposurePaths {
    pub image: PathBuf,
    pub psf: PathBuf,
}

impl ExposurePaths {
    pub fn new(image: impl Into<PathBuf>, psf: impl Into<PathBuf>) -> Self {
        Self {
            image: image.into(),
            psf: psf.into(),
        }
    }
}

/// In-memory products of [`subtract`].
#[derive(Debug, Clone)]
pub struct SubtractionProducts {
    /// Normalized difference image, with the difference PSF when requested
    pub difference: DifferenceResult,
    /// Matched-filter image, when requested
    pub matched_filter: Option<Array2<f64>>,
    pub zero_point: ZeroPointSolution,
    /// Flux zero point of the raw difference image
    pub difference_zero_point: f64,
}

/// Files written by [`run`].
#[derive(Debug, Clone)]
pub struct SubtractionOutcome {
    pub difference_path: PathBuf,
    pub psf_path: Option<PathBuf>,
    pub matched_filter_path: Option<PathBuf>,
    pub zero_point: ZeroPointSolution,
    pub difference_zero_point: f64,
}

/// `output` with `.<tag>` inserted before its extension.
///
/// `diff.fits` becomes `diff.<tag>.fits`; a name without an extension gets
/// `.<tag>` appended.
pub fn derived_output_path(output: &Path, tag: &str) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match output.extension() {
        Some(ext) => format!("{stem}.{tag}.{}", ext.to_string_lossy()),
        None => format!("{stem}.{tag}"),
    };
    output.with_file_name(name)
}

pub fn psf_output_path(output: &Path) -> PathBuf {
    derived_output_path(output, PSF_TAG)
}

pub fn matched_filter_output_path(output: &Path) -> PathBuf {
    derived_output_path(output, MATCH_TAG)
}

/// Subtract `reference` from `science`.
///
/// Solves the science zero point, computes the optimal difference (with its
/// PSF if `find_psf` or `matched_filter` is set), applies the matched filter
/// to the raw difference if requested and finally normalizes the difference
/// image.
pub fn subtract(
    science: &PreparedImage,
    reference: &PreparedImage,
    config: &SubtractionConfig,
) -> Result<SubtractionProducts, SubtractionError> {
    config.validate()?;

    let solution = solve_zero_point(science, reference, &config.solver)?;
    let science = science.clone().with_zero_point(solution.zero_point)?;
    let ratio = science.zero_point() / reference.zero_point();
    let zd = difference_zero_point(&science, reference);

    let raw = difference(&science, reference, ratio, config.needs_difference_psf())?;

    let filtered = match (&raw.psf, config.matched_filter) {
        (Some(psf), true) => Some(matched_filter(&science, reference, &raw.image, psf)?),
        _ => None,
    };

    let mut normalized = raw.normalized(&science, reference, config.normalization);
    if !config.find_psf {
        normalized.psf = None;
    }

    log::info!(
        "Subtracted {} pair: ratio={ratio:.6}, Z_d={zd:.6}, normalization={}",
        science.size(),
        config.normalization
    );

    Ok(SubtractionProducts {
        difference: normalized,
        matched_filter: filtered,
        zero_point: solution,
        difference_zero_point: zd,
    })
}

fn load_exposure(
    paths: &ExposurePaths,
    config: &SubtractionConfig,
) -> Result<(PreparedImage, FitsHeader), SubtractionError> {
    let image = read_fits_image(&paths.image)?;
    let psf = read_psf_file(&paths.psf)?;
    let saturation = image.header.saturation();

    let raw = RawExposure::new(image.data, psf).with_header_saturation(saturation);
    let prepared = prepare_image(&raw, &config.preparation)?;
    log::info!(
        "Prepared {} ({}, noise {:.4})",
        paths.image.display(),
        prepared.size(),
        prepared.background_std()
    );
    Ok((prepared, image.header))
}

/// Read, subtract and write one image pair.
///
/// The difference image is written to `config.output` with the science
/// header plus the normalization (`PHOTNORM`, `CONVOL00`), the solved flux
/// ratio (`ZPRATIO`) and the difference zero point (`DIFFZP`). The
/// difference PSF and matched-filter image go to paths derived from the
/// output name.
pub fn run(
    science_paths: &ExposurePaths,
    reference_paths: &ExposurePaths,
    config: &SubtractionConfig,
) -> Result<SubtractionOutcome, SubtractionError> {
    config.validate()?;

    let (science, science_header) = load_exposure(science_paths, config)?;
    let (reference, _) = load_exposure(reference_paths, config)?;

    let products = subtract(&science, &reference, config)?;

    let mut header = science_header;
    header.set("PHOTNORM", config.normalization.as_str());
    header.set("CONVOL00", config.normalization.as_str());
    header.set("ZPRATIO", products.difference.zero_point_ratio);
    header.set("DIFFZP", products.difference_zero_point);

    let difference_path = config.output.clone();
    write_fits_image(&difference_path, "DIFFERENCE", &products.difference.image, &header)?;
    log::info!("Wrote difference image to {}", difference_path.display());

    let psf_path = match &products.difference.psf {
        Some(psf) => {
            let path = psf_output_path(&config.output);
            let mut psf_header = FitsHeader::new();
            psf_header.set("ZPRATIO", products.difference.zero_point_ratio);
            psf_header.set("DIFFZP", products.difference_zero_point);
            write_fits_image(&path, "DIFFPSF", psf, &psf_header)?;
            log::info!("Wrote difference PSF to {}", path.display());
            Some(path)
        }
        None => None,
    };

    let matched_filter_path = match &products.matched_filter {
        Some(image) => {
            let path = matched_filter_output_path(&config.output);
            // Filtered from the raw difference, so never normalized
            let mut match_header = header.clone();
            match_header.set("PHOTNORM", Normalization::None.as_str());
            match_header.set("CONVOL00", Normalization::None.as_str());
            write_fits_image(&path, "MATCHED", image, &match_header)?;
            log::info!("Wrote matched-filter image to {}", path.display());
            Some(path)
        }
        None => None,
    };

    Ok(SubtractionOutcome {
        difference_path,
        psf_path,
        matched_filter_path,
        zero_point: products.zero_point,
        difference_zero_point: products.difference_zero_point,
    })
}
