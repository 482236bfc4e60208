//! File input and output.

pub mod fits;

pub use fits::{
    read_fits_header, read_fits_image, read_psf_file, write_fits_image, FitsError, FitsHeader,
    FitsImage, HeaderValue,
};
