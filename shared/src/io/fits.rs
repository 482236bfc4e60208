//! FITS reading and writing for single-image exposures.
//!
//! Images are read from the first HDU holding two-dimensional data and
//! converted to `f64`. FITS stores the bottom row first; arrays are flipped
//! on read so that row 0 is the top of the image, and flipped back on write.
//!
//! Every valued, non-structural card of the image HDU is carried through a
//! read/write cycle (see [`STRUCTURAL_KEYWORDS`]), so a difference image
//! inherits the science frame's identity, astrometry and instrument cards.
//! Written images always sit in the primary HDU.

use fitsio::compat::fitsfile::FitsFile;
use fitsio::compat::hdu::FitsHdu;
use fitsio::compat::images::ReadImage;
use fitsio::image::{build_image_hdu, ImageData};
use fitsio::value::Value;
use ndarray::Array2;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during FITS file operations
#[derive(Error, Debug)]
pub enum FitsError {
    #[error("FITS I/O error: {0}")]
    FitsIo(#[from] fitsio::compat::errors::Error),
    #[error("FITS encoding error: {0}")]
    Encoding(#[from] fitsio::Error),
    #[error("No 2D image data in {0}")]
    NoImageData(String),
    #[error("Invalid data type in HDU: {0}")]
    InvalidDataType(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Keywords describing the data layout, regenerated on every write.
pub const STRUCTURAL_KEYWORDS: &[&str] = &[
    "SIMPLE", "XTENSION", "BITPIX", "NAXIS", "EXTEND", "PCOUNT", "GCOUNT", "EXTNAME", "BSCALE",
    "BZERO", "BLANK", "CHECKSUM", "DATASUM", "END",
];

fn is_structural(key: &str) -> bool {
    STRUCTURAL_KEYWORDS.contains(&key)
        || key
            .strip_prefix("NAXIS")
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Keywords describing the saturation threshold, in order of preference.
const SATURATION_KEYWORDS: &[&str] = &["SATURATE", "SATLEVEL"];

/// Value of a single header card.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Real(f64),
    Integer(i64),
    Logical(bool),
    Text(String),
}

impl HeaderValue {
    /// Numeric value, if the card holds one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HeaderValue::Real(v) => Some(*v),
            HeaderValue::Integer(v) => Some(*v as f64),
            HeaderValue::Logical(_) | HeaderValue::Text(_) => None,
        }
    }
}

impl From<f64> for HeaderValue {
    fn from(value: f64) -> Self {
        HeaderValue::Real(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Integer(value)
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        HeaderValue::Logical(value)
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Text(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Text(value)
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HeaderValue::Real(v) => write!(f, "{v}"),
            HeaderValue::Integer(v) => write!(f, "{v}"),
            HeaderValue::Logical(v) => write!(f, "{}", if *v { "T" } else { "F" }),
            HeaderValue::Text(s) => write!(f, "'{s}'"),
        }
    }
}

/// Ordered collection of header cards.
///
/// Keys are unique; setting an existing key replaces its value in place so
/// the original card order is kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitsHeader {
    cards: Vec<(String, HeaderValue)>,
}

impl FitsHeader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a card.
    pub fn set(&mut self, key: &str, value: impl Into<HeaderValue>) {
        let value = value.into();
        match self.cards.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value,
            None => self.cards.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.cards.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Numeric value of a card, `None` if absent or textual.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(HeaderValue::as_f64)
    }

    /// Saturation threshold recorded by the instrument, if any.
    pub fn saturation(&self) -> Option<f64> {
        SATURATION_KEYWORDS.iter().find_map(|key| self.get_f64(key))
    }

    /// Copy of this header restricted to `keys`, in header order.
    pub fn select(&self, keys: &[&str]) -> FitsHeader {
        FitsHeader {
            cards: self
                .cards
                .iter()
                .filter(|(k, _)| keys.contains(&k.as_str()))
                .cloned()
                .collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.cards.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

/// Pixel data plus the header cards carried alongside it.
#[derive(Debug, Clone)]
pub struct FitsImage {
    pub data: Array2<f64>,
    pub header: FitsHeader,
}

/// Header card value as a [`HeaderValue`], skipping complex numbers.
fn header_value(value: &Value) -> Option<HeaderValue> {
    match value {
        Value::Float(v) => Some(HeaderValue::Real(*v)),
        Value::Integer(v) => Some(HeaderValue::Integer(*v)),
        Value::Logical(v) => Some(HeaderValue::Logical(*v)),
        Value::String(s) => Some(HeaderValue::Text(s.trim().to_string())),
        Value::ComplexInt(..) | Value::ComplexFloat(..) => None,
    }
}

/// First HDU holding a two-dimensional image, with its index.
fn first_image_hdu(fptr: &FitsFile) -> Option<(usize, FitsHdu)> {
    let mut hdu_idx = 0;
    while let Ok(hdu) = fptr.hdu(hdu_idx) {
        if hdu.read_key::<i64>(fptr, "NAXIS").unwrap_or(0) == 2 {
            return Some((hdu_idx, hdu));
        }
        hdu_idx += 1;
    }
    None
}

/// Valued, non-structural cards of one HDU in file order.
fn read_cards(fptr: &FitsFile, hdu_idx: usize) -> Result<FitsHeader, FitsError> {
    let fits_data = fptr.parsed()?;
    let mut header = FitsHeader::new();
    let Some(hdu) = fits_data.get(hdu_idx) else {
        return Ok(header);
    };

    for card in &hdu.cards {
        let key = card.keyword_str();
        if key.is_empty() || is_structural(key) {
            continue;
        }
        if let Some(value) = card.value.as_ref().and_then(header_value) {
            header.set(key, value);
        }
    }
    Ok(header)
}

/// Read the first two-dimensional image in a FITS file with its header.
///
/// # Arguments
/// * `path` - Path to the FITS file
///
/// # Returns
/// The image flipped into top-row-first order, and every valued card of the
/// image HDU other than the [`STRUCTURAL_KEYWORDS`]
///
/// # Errors
/// * `NoImageData` if no HDU holds a 2D image
/// * `InvalidDataType` if the pixel count does not match NAXIS1 × NAXIS2
pub fn read_fits_image<P: AsRef<Path>>(path: P) -> Result<FitsImage, FitsError> {
    let fptr = FitsFile::open(&path)?;
    let (hdu_idx, hdu) = first_image_hdu(&fptr)
        .ok_or_else(|| FitsError::NoImageData(path.as_ref().display().to_string()))?;

    let naxis1 = hdu.read_key::<i64>(&fptr, "NAXIS1").unwrap_or(0) as usize;
    let naxis2 = hdu.read_key::<i64>(&fptr, "NAXIS2").unwrap_or(0) as usize;
    let image_data = f64::read_image(&fptr, &hdu)?;

    let fits_array = Array2::from_shape_vec((naxis2, naxis1), image_data).map_err(|_| {
        FitsError::InvalidDataType(format!(
            "Cannot reshape image data of HDU {hdu_idx} in {}",
            path.as_ref().display()
        ))
    })?;

    // Flip vertically to match ndarray convention (FITS origin is bottom-left)
    let data = fits_array.slice(ndarray::s![..;-1, ..]).to_owned();
    let header = read_cards(&fptr, hdu_idx)?;

    log::debug!(
        "Read {}x{} image from {} ({} header cards)",
        naxis1,
        naxis2,
        path.as_ref().display(),
        header.len()
    );

    Ok(FitsImage { data, header })
}

/// Read selected keywords from the first two-dimensional image HDU.
///
/// Keywords missing from the file are left out of the returned header.
pub fn read_fits_header<P: AsRef<Path>>(path: P, keys: &[&str]) -> Result<FitsHeader, FitsError> {
    let fptr = FitsFile::open(&path)?;
    let (hdu_idx, _) = first_image_hdu(&fptr)
        .ok_or_else(|| FitsError::NoImageData(path.as_ref().display().to_string()))?;
    Ok(read_cards(&fptr, hdu_idx)?.select(keys))
}

/// Read a PSF kernel stored as the first 2D image of a FITS file.
pub fn read_psf_file<P: AsRef<Path>>(path: P) -> Result<Array2<f64>, FitsError> {
    Ok(read_fits_image(path)?.data)
}

/// Sibling path used while a file is being written.
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

/// Write a 2D image and its header cards to a FITS file.
///
/// The data and every card go into the primary HDU, which is tagged with
/// `EXTNAME = extname`. Structural keywords in `header` are ignored. The
/// file is first written next to its destination with a `.partial` suffix
/// and renamed into place once complete; an existing file at `path` is
/// replaced.
pub fn write_fits_image<P: AsRef<Path>>(
    path: P,
    extname: &str,
    data: &Array2<f64>,
    header: &FitsHeader,
) -> Result<(), FitsError> {
    let path = path.as_ref();
    let staging = partial_path(path);

    let result = write_image_file(&staging, extname, data, header)
        .and_then(|()| std::fs::rename(&staging, path).map_err(FitsError::from));

    if result.is_err() {
        let _ = std::fs::remove_file(&staging);
    } else {
        log::debug!("Wrote {} ({} header cards)", path.display(), header.len());
    }
    result
}

fn write_image_file(
    path: &Path,
    extname: &str,
    data: &Array2<f64>,
    header: &FitsHeader,
) -> Result<(), FitsError> {
    let mut fptr = FitsFile::create(path).overwrite().open()?;

    let (height, width) = data.dim();
    let flat_data: Vec<f64> = data.slice(ndarray::s![..;-1, ..]).iter().copied().collect();
    fptr.set_data(build_image_hdu(-64, &[width, height], &ImageData::F64(flat_data))?);

    let hdu = fptr.primary_hdu()?;
    hdu.write_key(&mut fptr, "EXTNAME", &extname.to_string())?;

    for (key, value) in header.iter().filter(|(key, _)| !is_structural(key)) {
        match value {
            HeaderValue::Real(v) => hdu.write_key(&mut fptr, key, v)?,
            HeaderValue::Integer(v) => hdu.write_key(&mut fptr, key, v)?,
            HeaderValue::Logical(v) => hdu.write_key(&mut fptr, key, v)?,
            HeaderValue::Text(s) => hdu.write_key(&mut fptr, key, s)?,
        }
    }

    fptr.flush()?;
    Ok(())
}
