use super::FilterBank;
use crate::error::{Error, Result};
use burn::prelude::*;
use burn::tensor::module::{conv2d, conv_transpose2d};
use burn::tensor::ops::{ConvOptions, ConvTransposeOptions};

/// Forward wavelet transform over `levels` levels.
///
/// Each level convolves every channel with the four analysis kernels (stride 2) and lays the
/// resulting bands out as quadrants of the input plane: LL top-left, LH top-right, HL
/// bottom-left and HH bottom-right. Deeper levels recurse into the LL quadrant.
///
/// # Shapes
///
/// - images: `[batch_size, channels, height, width]`
/// - output: `[batch_size, channels, height, width]`
///
/// # Panics
///
/// If `levels` is zero or the spatial dims are not divisible by `2^levels`.
pub fn wt<B: Backend>(images: Tensor<B, 4>, filters: &FilterBank<B>, levels: usize) -> Tensor<B, 4> {
    try_wt(images, filters, levels).unwrap_or_else(|err| panic!("{err}"))
}

/// Inverse of [wt](wt).
///
/// # Panics
///
/// If `levels` is zero or the spatial dims are not divisible by `2^levels`.
pub fn iwt<B: Backend>(
    coefficients: Tensor<B, 4>,
    inv_filters: &FilterBank<B>,
    levels: usize,
) -> Tensor<B, 4> {
    try_iwt(coefficients, inv_filters, levels).unwrap_or_else(|err| panic!("{err}"))
}

/// Fallible version of [wt](wt).
pub fn try_wt<B: Backend>(
    images: Tensor<B, 4>,
    filters: &FilterBank<B>,
    levels: usize,
) -> Result<Tensor<B, 4>> {
    check_levels(images.dims(), levels)?;

    Ok(analysis(images, filters, levels))
}

/// Fallible version of [iwt](iwt).
pub fn try_iwt<B: Backend>(
    coefficients: Tensor<B, 4>,
    inv_filters: &FilterBank<B>,
    levels: usize,
) -> Result<Tensor<B, 4>> {
    check_levels(coefficients.dims(), levels)?;

    Ok(synthesis(coefficients, inv_filters, levels))
}

fn check_levels(dims: [usize; 4], levels: usize) -> Result<()> {
    let [_, _, height, width] = dims;

    if levels == 0 {
        return Err(Error::InvalidShape(
            "The wavelet transform needs at least one level".to_string(),
        ));
    }

    let factor = 1usize.checked_shl(levels as u32).unwrap_or(0);
    if factor == 0 || height % factor != 0 || width % factor != 0 || height < factor {
        return Err(Error::InvalidShape(format!(
            "Spatial dims {height}x{width} are not divisible by 2^{levels}"
        )));
    }

    Ok(())
}

fn analysis<B: Backend>(images: Tensor<B, 4>, filters: &FilterBank<B>, levels: usize) -> Tensor<B, 4> {
    let [batch_size, channels, height, width] = images.dims();
    let planes = batch_size * channels;
    let padding = filters.padding();

    let input = images.reshape([planes, 1, height, width]);
    let mut bands = conv2d(
        input,
        filters.kernels(),
        None,
        ConvOptions::new([2, 2], [padding, padding], [1, 1], 1),
    );

    if levels > 1 {
        let ranges = [0..planes, 0..1, 0..height / 2, 0..width / 2];
        let low = analysis(bands.clone().slice(ranges.clone()), filters, levels - 1);
        bands = bands.slice_assign(ranges, low);
    }

    bands_to_plane(bands).reshape([batch_size, channels, height, width])
}

fn synthesis<B: Backend>(
    coefficients: Tensor<B, 4>,
    inv_filters: &FilterBank<B>,
    levels: usize,
) -> Tensor<B, 4> {
    let [batch_size, channels, height, width] = coefficients.dims();
    let planes = batch_size * channels;
    let padding = inv_filters.padding();

    let mut bands = plane_to_bands(coefficients.reshape([planes, 1, height, width]));

    if levels > 1 {
        let ranges = [0..planes, 0..1, 0..height / 2, 0..width / 2];
        let low = synthesis(bands.clone().slice(ranges.clone()), inv_filters, levels - 1);
        bands = bands.slice_assign(ranges, low);
    }

    conv_transpose2d(
        bands,
        inv_filters.kernels(),
        None,
        ConvTransposeOptions::new([2, 2], [padding, padding], [0, 0], [1, 1], 1),
    )
    .reshape([batch_size, channels, height, width])
}

/// `[n, 4, h, w]` bands to a `[n, 1, 2h, 2w]` plane of quadrants.
fn bands_to_plane<B: Backend>(bands: Tensor<B, 4>) -> Tensor<B, 4> {
    let [planes, _, height, width] = bands.dims();

    bands
        .reshape([planes, 2, 2, height, width])
        .swap_dims(2, 3)
        .reshape([planes, 1, height * 2, width * 2])
}

/// `[n, 1, 2h, 2w]` plane of quadrants to `[n, 4, h, w]` bands.
fn plane_to_bands<B: Backend>(plane: Tensor<B, 4>) -> Tensor<B, 4> {
    let [planes, _, height, width] = plane.dims();
    let (height, width) = (height / 2, width / 2);

    plane
        .reshape([planes, 2, height, 2, width])
        .swap_dims(2, 3)
        .reshape([planes, 4, height, width])
}

/// Forward transform bound to its filters, the trainable-free counterpart of a model.
#[derive(Clone, Debug)]
pub struct WaveletTransform<B: Backend> {
    filters: FilterBank<B>,
    levels: usize,
}

impl<B: Backend> WaveletTransform<B> {
    /// Create a new transform.
    pub fn new(filters: FilterBank<B>, levels: usize) -> Self {
        Self { filters, levels }
    }

    /// Apply the transform.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        wt(images, &self.filters, self.levels)
    }

    /// Apply the transform on a different number of levels.
    pub fn forward_levels(&self, images: Tensor<B, 4>, levels: usize) -> Tensor<B, 4> {
        wt(images, &self.filters, levels)
    }

    pub fn levels(&self) -> usize {
        self.levels
    }

    pub fn filters(&self) -> &FilterBank<B> {
        &self.filters
    }
}

/// Inverse transform bound to its filters.
#[derive(Clone, Debug)]
pub struct InverseWaveletTransform<B: Backend> {
    inv_filters: FilterBank<B>,
    levels: usize,
}

impl<B: Backend> InverseWaveletTransform<B> {
    /// Create a new inverse transform.
    pub fn new(inv_filters: FilterBank<B>, levels: usize) -> Self {
        Self {
            inv_filters,
            levels,
        }
    }

    /// Apply the inverse transform.
    pub fn forward(&self, coefficients: Tensor<B, 4>) -> Tensor<B, 4> {
        iwt(coefficients, &self.inv_filters, self.levels)
    }

    /// Apply the inverse transform on a different number of levels.
    pub fn forward_levels(&self, coefficients: Tensor<B, 4>, levels: usize) -> Tensor<B, 4> {
        iwt(coefficients, &self.inv_filters, levels)
    }

    pub fn levels(&self) -> usize {
        self.levels
    }
}
