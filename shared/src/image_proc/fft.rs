//! Two-dimensional discrete Fourier transforms over `ndarray` images.
//!
//! Transforms are computed by row-column decomposition: a 1D FFT over every
//! row followed by a 1D FFT over every column. Lanes are processed in
//! parallel with rayon. The forward transform is unnormalized and the
//! inverse divides by the pixel count, so `inverse(forward(x)) == x`.
//!
//! Arrays are transformed at their native size with no padding or
//! windowing; convolutions built on these transforms are circular.

use ndarray::parallel::prelude::*;
use ndarray::{Array2, ArrayBase, Axis, Data, Ix2};
use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

use super::ImageProcError;
use crate::image_size::ImageSize;

/// Planned 2D FFT for a fixed image size.
///
/// Plans are built once and reused for every array of the same shape, which
/// matters when the same pair of images and PSFs is transformed repeatedly
/// (for instance inside the zero-point iteration).
pub struct Fft2d {
    size: ImageSize,
    row_forward: Arc<dyn Fft<f64>>,
    row_inverse: Arc<dyn Fft<f64>>,
    col_forward: Arc<dyn Fft<f64>>,
    col_inverse: Arc<dyn Fft<f64>>,
}

impl Fft2d {
    /// Plan transforms for images of the given size.
    pub fn new(size: ImageSize) -> Result<Self, ImageProcError> {
        if size.is_empty() {
            return Err(ImageProcError::InputShape(format!(
                "cannot plan a Fourier transform for an empty {size} image"
            )));
        }

        let mut planner = FftPlanner::new();
        Ok(Self {
            size,
            row_forward: planner.plan_fft_forward(size.width),
            row_inverse: planner.plan_fft_inverse(size.width),
            col_forward: planner.plan_fft_forward(size.height),
            col_inverse: planner.plan_fft_inverse(size.height),
        })
    }

    /// Image size these plans were built for.
    pub fn size(&self) -> ImageSize {
        self.size
    }

    fn check_shape(&self, shape: (usize, usize)) -> Result<(), ImageProcError> {
        if shape != self.size.shape() {
            return Err(ImageProcError::InputShape(format!(
                "array of {} does not match the planned {} transform",
                ImageSize::from_shape(shape),
                self.size
            )));
        }
        Ok(())
    }

    /// Forward transform of a real image.
    pub fn forward<S>(&self, image: &ArrayBase<S, Ix2>) -> Result<Array2<Complex64>, ImageProcError>
    where
        S: Data<Elem = f64>,
    {
        self.check_shape(image.dim())?;
        let mut spectrum = image.mapv(|v| Complex64::new(v, 0.0));
        transform_lanes(&mut spectrum, Axis(0), &self.row_forward);
        transform_lanes(&mut spectrum, Axis(1), &self.col_forward);
        Ok(spectrum)
    }

    /// Inverse transform, normalized by the number of pixels.
    pub fn inverse(&self, mut spectrum: Array2<Complex64>) -> Result<Array2<Complex64>, ImageProcError> {
        self.check_shape(spectrum.dim())?;
        transform_lanes(&mut spectrum, Axis(0), &self.row_inverse);
        transform_lanes(&mut spectrum, Axis(1), &self.col_inverse);

        let scale = 1.0 / self.size.pixel_count() as f64;
        spectrum.par_mapv_inplace(|v| v * scale);
        Ok(spectrum)
    }

    /// Inverse transform keeping only the real component.
    ///
    /// For spectra of real images the imaginary part is floating-point
    /// residue and is discarded.
    pub fn inverse_real(&self, spectrum: Array2<Complex64>) -> Result<Array2<f64>, ImageProcError> {
        Ok(self.inverse(spectrum)?.mapv(|v| v.re))
    }
}

/// Apply a 1D transform to every lane obtained by iterating along `axis`.
///
/// Iterating along `Axis(0)` yields rows, along `Axis(1)` yields columns.
fn transform_lanes(data: &mut Array2<Complex64>, axis: Axis, fft: &Arc<dyn Fft<f64>>) {
    data.axis_iter_mut(axis).into_par_iter().for_each(|mut lane| {
        let mut buffer = lane.to_vec();
        fft.process(&mut buffer);
        lane.iter_mut()
            .zip(buffer)
            .for_each(|(dst, value)| *dst = value);
    });
}
