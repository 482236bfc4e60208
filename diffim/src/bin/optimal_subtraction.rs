//! Optimal difference imaging of a science/reference exposure pair
//!
//! Reads two aligned FITS images and their PSFs, solves the relative flux
//! scale and writes the optimal difference image. Optionally also writes the
//! difference PSF and a matched-filter image for source detection.
//!
//! ```bash
//! optimal_subtraction science.fits reference.fits \
//!     --science-psf science.psf.fits --reference-psf reference.psf.fits \
//!     --output diff.fits --matched-filter
//! ```

use clap::Parser;
use diffim::pipeline::{run, ExposurePaths};
use diffim::shared_args::SubtractionArgs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "Optimal Subtraction",
    about = "Computes the optimal Fourier-domain difference of two aligned exposures",
    long_about = None
)]
struct Args {
    /// Science image (FITS)
    science: PathBuf,

    /// Reference image (FITS)
    reference: PathBuf,

    /// PSF of the science image (FITS)
    #[arg(long)]
    science_psf: PathBuf,

    /// PSF of the reference image (FITS)
    #[arg(long)]
    reference_psf: PathBuf,

    #[command(flatten)]
    subtraction: SubtractionArgs,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let config = args.subtraction.to_config()?;

    let science = ExposurePaths::new(&args.science, &args.science_psf);
    let reference = ExposurePaths::new(&args.reference, &args.reference_psf);

    let outcome = run(&science, &reference, &config)?;

    println!("Difference image: {}", outcome.difference_path.display());
    if let Some(path) = &outcome.psf_path {
        println!("Difference PSF:   {}", path.display());
    }
    if let Some(path) = &outcome.matched_filter_path {
        println!("Matched filter:   {}", path.display());
    }
    println!(
        "Science zero point: {:.6} ({} iterations{})",
        outcome.zero_point.zero_point,
        outcome.zero_point.iterations,
        if outcome.zero_point.converged {
            ""
        } else {
            ", not converged"
        }
    );
    println!("Difference zero point: {:.6}", outcome.difference_zero_point);

    Ok(())
}
