//! End-to-end subtraction on synthetic image pairs.
//!
//! These tests build science/reference pairs with known content, run them
//! through the in-memory and file pipelines and check the products.

use approx::assert_relative_eq;
use diffim::pipeline::{matched_filter_output_path, psf_output_path};
use diffim::{
    run, subtract, ExposurePaths, Normalization, PreparedImage, SubtractionConfig,
    SubtractionError,
};
use ndarray::Array2;
use shared::image_proc::{gaussian_psf, simple_normal_array};
use shared::image_size::ImageSize;
use shared::io::{read_fits_header, read_fits_image, write_fits_image, FitsHeader};
use std::path::Path;
use tempfile::TempDir;

const SIZE: usize = 64;
const CENTER: (usize, usize) = (32, 32);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn argmax(array: &Array2<f64>) -> (usize, usize) {
    array
        .indexed_iter()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(idx, _)| idx)
        .unwrap()
}

/// Unit-flux PSF centered on `position`
fn point_source(psf: &Array2<f64>, position: (usize, usize), flux: f64) -> Array2<f64> {
    let (h, w) = psf.dim();
    let mut source = Array2::zeros((h, w));
    for ((y, x), &v) in psf.indexed_iter() {
        source[[(y + position.0) % h, (x + position.1) % w]] = flux * v;
    }
    source
}

/// A few bright stars so the zero-point fit has signal to work with
fn star_field(psf: &Array2<f64>) -> Array2<f64> {
    [((10, 12), 30000.0), ((50, 20), 45000.0), ((15, 50), 25000.0), ((48, 52), 40000.0)]
        .into_iter()
        .fold(Array2::zeros((SIZE, SIZE)), |acc, (pos, flux)| {
            acc + point_source(psf, pos, flux)
        })
}

fn unnormalized() -> SubtractionConfig {
    SubtractionConfig {
        normalization: Normalization::None,
        ..SubtractionConfig::default()
    }
}

#[test]
fn test_identical_flat_images_subtract_to_zero() {
    init_logging();
    let psf = gaussian_psf(ImageSize::from_width_height(SIZE, SIZE), 2.0).unwrap();
    let pixels = simple_normal_array((SIZE, SIZE), 100.0, 5.0, 42).unwrap() - 100.0;

    let science = PreparedImage::from_parts(pixels.clone(), psf.clone(), 5.0).unwrap();
    let reference = PreparedImage::from_parts(pixels, psf, 5.0).unwrap();

    let products = subtract(&science, &reference, &unnormalized()).unwrap();

    assert!(products.zero_point.converged);
    assert_relative_eq!(products.zero_point.zero_point, 1.0, epsilon = 1e-9);
    assert_relative_eq!(products.difference_zero_point, 1.0 / 50f64.sqrt(), epsilon = 1e-9);
    assert!(products.difference.image.iter().all(|v| v.abs() < 1e-6));
    assert!(products.difference.psf.is_none());
    assert!(products.matched_filter.is_none());
}

#[test]
fn test_point_source_is_recovered_at_its_position() {
    init_logging();
    let psf = gaussian_psf(ImageSize::from_width_height(SIZE, SIZE), 2.0).unwrap();
    let reference_pixels = simple_normal_array((SIZE, SIZE), 0.0, 5.0, 7).unwrap() + star_field(&psf);
    let science_pixels = &reference_pixels + &point_source(&psf, CENTER, 3000.0);

    let science = PreparedImage::from_parts(science_pixels, psf.clone(), 5.0).unwrap();
    let reference = PreparedImage::from_parts(reference_pixels, psf, 5.0).unwrap();

    let config = SubtractionConfig {
        find_psf: true,
        matched_filter: true,
        ..SubtractionConfig::default()
    };
    let products = subtract(&science, &reference, &config).unwrap();

    assert_relative_eq!(products.zero_point.zero_point, 1.0, epsilon = 1e-3);
    assert_eq!(products.difference.normalization, Normalization::Reference);
    assert_eq!(argmax(&products.difference.image), CENTER);

    let diff_psf = products.difference.psf.as_ref().unwrap();
    assert_eq!(argmax(diff_psf), (0, 0));

    let filtered = products.matched_filter.as_ref().unwrap();
    assert_eq!(argmax(filtered), CENTER);
}

#[test]
fn test_matched_filter_peak_scales_with_flux() {
    init_logging();
    let psf = gaussian_psf(ImageSize::from_width_height(SIZE, SIZE), 2.0).unwrap();
    let reference_pixels = simple_normal_array((SIZE, SIZE), 0.0, 5.0, 19).unwrap() + star_field(&psf);

    let config = SubtractionConfig {
        matched_filter: true,
        ..unnormalized()
    };
    let peak_for = |flux: f64| {
        let science_pixels = &reference_pixels + &point_source(&psf, CENTER, flux);
        let science = PreparedImage::from_parts(science_pixels, psf.clone(), 5.0).unwrap();
        let reference = PreparedImage::from_parts(reference_pixels.clone(), psf.clone(), 5.0).unwrap();
        let products = subtract(&science, &reference, &config).unwrap();
        // Only the matched filter was requested, so no PSF is handed back
        assert!(products.difference.psf.is_none());
        products.matched_filter.unwrap()[[CENTER.0, CENTER.1]]
    };

    let faint = peak_for(2000.0);
    let bright = peak_for(4000.0);
    assert!(faint > 0.0);
    assert_relative_eq!(bright / faint, 2.0, max_relative = 1e-2);
}

#[test]
fn test_unrecognized_normalization_leaves_difference_unscaled() {
    init_logging();
    let psf = gaussian_psf(ImageSize::from_width_height(SIZE, SIZE), 2.0).unwrap();
    let reference_pixels = simple_normal_array((SIZE, SIZE), 0.0, 5.0, 3).unwrap() + star_field(&psf);
    let science_pixels = &reference_pixels + &point_source(&psf, CENTER, 1000.0);
    let science = PreparedImage::from_parts(science_pixels, psf.clone(), 5.0).unwrap();
    let reference = PreparedImage::from_parts(reference_pixels, psf, 5.0).unwrap();

    let raw = subtract(&science, &reference, &unnormalized()).unwrap();
    let config: SubtractionConfig = serde_json::from_str(r#"{ "normalization": "flux" }"#).unwrap();
    let unknown = subtract(&science, &reference, &config).unwrap();

    assert_eq!(unknown.difference.normalization, Normalization::None);
    assert_eq!(unknown.difference.image, raw.difference.image);
}

/// Centered Gaussian stamp as a PSF file would hold it
fn psf_stamp(sigma: f64) -> Array2<f64> {
    Array2::from_shape_fn((15, 15), |(y, x)| {
        let dx = x as f64 - 7.0;
        let dy = y as f64 - 7.0;
        (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp()
    })
}

struct SyntheticPair {
    _dir: TempDir,
    science: ExposurePaths,
    reference: ExposurePaths,
    output: std::path::PathBuf,
}

fn write_pair(science: &Array2<f64>, reference: &Array2<f64>) -> SyntheticPair {
    let dir = TempDir::new().unwrap();
    let path = |name: &str| dir.path().join(name);

    let mut header = FitsHeader::new();
    header.set("OBJECT", "synthetic");
    header.set("EXPTIME", 30.0);
    header.set("SATURATE", 60000.0);
    header.set("CCDTEMP", -40.25);

    write_fits_image(path("sci.fits"), "SCIENCE", science, &header).unwrap();
    write_fits_image(path("ref.fits"), "REFERENCE", reference, &header).unwrap();
    write_fits_image(path("sci_psf.fits"), "PSF", &psf_stamp(2.0), &FitsHeader::new()).unwrap();
    write_fits_image(path("ref_psf.fits"), "PSF", &psf_stamp(2.0), &FitsHeader::new()).unwrap();

    SyntheticPair {
        science: ExposurePaths::new(path("sci.fits"), path("sci_psf.fits")),
        reference: ExposurePaths::new(path("ref.fits"), path("ref_psf.fits")),
        output: path("diff.fits"),
        _dir: dir,
    }
}

fn sky_field(seed: u64) -> Array2<f64> {
    let psf = gaussian_psf(ImageSize::from_width_height(SIZE, SIZE), 2.0).unwrap();
    simple_normal_array((SIZE, SIZE), 500.0, 5.0, seed).unwrap() + star_field(&psf)
}

#[test]
fn test_file_pipeline_writes_all_products() {
    init_logging();
    let reference = sky_field(11);
    let psf = gaussian_psf(ImageSize::from_width_height(SIZE, SIZE), 2.0).unwrap();
    let science = &reference + &point_source(&psf, CENTER, 5000.0);
    let pair = write_pair(&science, &reference);

    let config = SubtractionConfig {
        output: pair.output.clone(),
        find_psf: true,
        matched_filter: true,
        ..SubtractionConfig::default()
    };
    let outcome = run(&pair.science, &pair.reference, &config).unwrap();

    assert_eq!(outcome.difference_path, pair.output);
    assert_eq!(outcome.psf_path, Some(psf_output_path(&pair.output)));
    assert_eq!(
        outcome.matched_filter_path,
        Some(matched_filter_output_path(&pair.output))
    );
    assert!(pair.output.with_file_name("diff.psf.fits").exists());
    assert!(pair.output.with_file_name("diff.match.fits").exists());

    let diff = read_fits_image(&pair.output).unwrap();
    assert_eq!(diff.data.dim(), (SIZE, SIZE));
    assert!(diff.data.iter().all(|v| v.is_finite()));
    assert_eq!(argmax(&diff.data), CENTER);

    // Science header carried over, pipeline keywords added
    assert_eq!(diff.header.get_f64("EXPTIME"), Some(30.0));
    assert_eq!(diff.header.get_f64("CCDTEMP"), Some(-40.25));
    let keys = read_fits_header(&pair.output, &["PHOTNORM", "CONVOL00", "ZPRATIO", "DIFFZP"])
        .unwrap();
    assert_eq!(keys.get("PHOTNORM"), keys.get("CONVOL00"));
    assert_eq!(
        keys.get("PHOTNORM").map(|v| v.to_string()),
        Some("'reference'".to_string())
    );
    assert_relative_eq!(
        keys.get_f64("DIFFZP").unwrap(),
        outcome.difference_zero_point,
        epsilon = 1e-12
    );

    let filtered = read_fits_image(matched_filter_output_path(&pair.output)).unwrap();
    assert_eq!(argmax(&filtered.data), CENTER);

    // The matched filter runs on the raw difference
    assert_eq!(
        filtered.header.get("PHOTNORM").map(|v| v.to_string()),
        Some("'none'".to_string())
    );
    assert_eq!(filtered.header.get("PHOTNORM"), filtered.header.get("CONVOL00"));
    assert_relative_eq!(
        filtered.header.get_f64("DIFFZP").unwrap(),
        outcome.difference_zero_point,
        epsilon = 1e-12
    );
}

#[test]
fn test_file_pipeline_overwrites_previous_output() {
    init_logging();
    let reference = sky_field(21);
    let pair = write_pair(&reference, &reference);

    let config = SubtractionConfig {
        output: pair.output.clone(),
        ..SubtractionConfig::default()
    };
    run(&pair.science, &pair.reference, &config).unwrap();
    run(&pair.science, &pair.reference, &config).unwrap();

    let diff = read_fits_image(&pair.output).unwrap();
    assert!(diff.data.iter().all(|v| v.abs() < 1e-6));
    assert!(!psf_output_path(&pair.output).exists());
    assert!(!Path::new(&format!("{}.partial", pair.output.display())).exists());
}

#[test]
fn test_file_pipeline_handles_defective_pixels() {
    init_logging();
    let reference = sky_field(31);
    let mut science = reference.clone();
    science[[5, 5]] = f64::NAN;
    science[[40, 8]] = 65000.0;
    science[[41, 8]] = 65000.0;
    let pair = write_pair(&science, &reference);

    let config = SubtractionConfig {
        output: pair.output.clone(),
        matched_filter: true,
        ..SubtractionConfig::default()
    };
    let outcome = run(&pair.science, &pair.reference, &config).unwrap();

    let diff = read_fits_image(&outcome.difference_path).unwrap();
    assert!(diff.data.iter().all(|v| v.is_finite()));
}

#[test]
fn test_file_pipeline_rejects_mismatched_sizes() {
    init_logging();
    let reference = sky_field(41);
    let science = simple_normal_array((SIZE, SIZE / 2), 500.0, 5.0, 42).unwrap();
    let pair = write_pair(&science, &reference);

    let config = SubtractionConfig {
        output: pair.output.clone(),
        ..SubtractionConfig::default()
    };
    assert!(matches!(
        run(&pair.science, &pair.reference, &config),
        Err(SubtractionError::InputShape(_))
    ));
    assert!(!pair.output.exists());
}

#[test]
fn test_file_pipeline_missing_input_is_file_error() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let missing = ExposurePaths::new(dir.path().join("a.fits"), dir.path().join("a_psf.fits"));
    let config = SubtractionConfig {
        output: dir.path().join("diff.fits"),
        ..SubtractionConfig::default()
    };
    assert!(matches!(
        run(&missing, &missing, &config),
        Err(SubtractionError::FileFormat(_)) | Err(SubtractionError::Io(_))
    ));
}
