//! Selection, zeroing and re-assembly of wavelet quadrants and square patches.
//!
//! All functions work on `[batch_size, channels, height, width]` tensors and only touch the
//! two spatial dims.

use crate::error::{Error, Result};
use burn::prelude::*;

/// The four quadrants of a square region.
#[derive(Clone, Debug)]
pub struct Quadrants<B: Backend> {
    pub top_left: Tensor<B, 4>,
    pub top_right: Tensor<B, 4>,
    pub bottom_left: Tensor<B, 4>,
    pub bottom_right: Tensor<B, 4>,
}

/// The three high-frequency masks surrounding a low-frequency quadrant.
#[derive(Clone, Debug)]
pub struct Masks<B: Backend> {
    pub top_right: Tensor<B, 4>,
    pub bottom_left: Tensor<B, 4>,
    pub bottom_right: Tensor<B, 4>,
}

impl<B: Backend> Masks<B> {
    /// Masks as a vector, in the order top-right, bottom-left, bottom-right.
    pub fn into_vec(self) -> Vec<Tensor<B, 4>> {
        vec![self.top_right, self.bottom_left, self.bottom_right]
    }
}

/// Keep only the low-frequency patch of a `num_wt` level transform, zero everything else.
pub fn zero_patches<B: Backend>(coefficients: Tensor<B, 4>, num_wt: usize) -> Tensor<B, 4> {
    let [batch_size, channels, height, width] = coefficients.dims();
    let (patch_h, patch_w) = (height >> num_wt, width >> num_wt);
    let ranges = [0..batch_size, 0..channels, 0..patch_h, 0..patch_w];

    let low = coefficients.clone().slice(ranges.clone());
    coefficients.zeros_like().slice_assign(ranges, low)
}

/// Zero the low-frequency square known at level `cur_wt` of a `num_wt` level transform.
///
/// With `cur_wt == 1` this removes the low-frequency patch and keeps every high-frequency mask.
///
/// # Panics
///
/// If `num_wt` is zero.
pub fn zero_mask<B: Backend>(
    coefficients: Tensor<B, 4>,
    num_wt: usize,
    cur_wt: usize,
) -> Tensor<B, 4> {
    assert!(num_wt > 0, "Zeroing a mask needs at least one wavelet level");
    let [batch_size, channels, height, width] = coefficients.dims();
    let shift = num_wt + 1 - cur_wt.clamp(1, num_wt);
    let (patch_h, patch_w) = (height >> shift, width >> shift);
    let ranges = [0..batch_size, 0..channels, 0..patch_h, 0..patch_w];

    let zeros = Tensor::zeros([batch_size, channels, patch_h, patch_w], &coefficients.device());
    coefficients.slice_assign(ranges, zeros)
}

/// The four `dim x dim` quadrants of the top-left `2dim x 2dim` region.
pub fn get_4masks<B: Backend>(coefficients: Tensor<B, 4>, dim: usize) -> Quadrants<B> {
    let [batch_size, channels, _, _] = coefficients.dims();
    let cut = |rows: core::ops::Range<usize>, cols: core::ops::Range<usize>| {
        coefficients
            .clone()
            .slice([0..batch_size, 0..channels, rows, cols])
    };

    Quadrants {
        top_left: cut(0..dim, 0..dim),
        top_right: cut(0..dim, dim..2 * dim),
        bottom_left: cut(dim..2 * dim, 0..dim),
        bottom_right: cut(dim..2 * dim, dim..2 * dim),
    }
}

/// The three high-frequency `dim x dim` masks of the top-left `2dim x 2dim` region.
pub fn get_3masks<B: Backend>(coefficients: Tensor<B, 4>, dim: usize) -> Masks<B> {
    let quadrants = get_4masks(coefficients, dim);

    Masks {
        top_right: quadrants.top_right,
        bottom_left: quadrants.bottom_left,
        bottom_right: quadrants.bottom_right,
    }
}

/// Split the plane into non-overlapping `patch x patch` squares, row-major.
///
/// # Shapes
///
/// - input: `[batch_size, channels, height, width]`
/// - output: `[batch_size, num_patches, channels, patch, patch]`
pub fn create_patches_from_grid<B: Backend>(input: Tensor<B, 4>, patch: usize) -> Tensor<B, 5> {
    try_create_patches_from_grid(input, patch).unwrap_or_else(|err| panic!("{err}"))
}

/// Fallible version of [create_patches_from_grid](create_patches_from_grid).
pub fn try_create_patches_from_grid<B: Backend>(
    input: Tensor<B, 4>,
    patch: usize,
) -> Result<Tensor<B, 5>> {
    let [batch_size, channels, height, width] = input.dims();

    if patch == 0 || height % patch != 0 || width % patch != 0 {
        return Err(Error::InvalidShape(format!(
            "Plane {height}x{width} can't be cut in {patch}x{patch} patches"
        )));
    }

    let (rows, cols) = (height / patch, width / patch);

    // [b, c, rows, patch, cols, patch] -> [b, rows, cols, c, patch, patch]
    let patches = input
        .reshape([batch_size, channels, rows, patch, cols, patch])
        .permute([0, 2, 4, 1, 3, 5])
        .reshape([batch_size, rows * cols, channels, patch, patch]);

    Ok(patches)
}

/// Assemble four equally sized quadrants into one plane.
pub fn collate_patches_to_img<B: Backend>(
    top_left: Tensor<B, 4>,
    top_right: Tensor<B, 4>,
    bottom_left: Tensor<B, 4>,
    bottom_right: Tensor<B, 4>,
) -> Tensor<B, 4> {
    let top = Tensor::cat(vec![top_left, top_right], 3);
    let bottom = Tensor::cat(vec![bottom_left, bottom_right], 3);

    Tensor::cat(vec![top, bottom], 2)
}

/// Assemble channel-concatenated patches back into a square plane.
///
/// Inverse of [create_patches_from_grid](create_patches_from_grid) for patches stacked on the
/// channel axis.
///
/// # Shapes
///
/// - input: `[batch_size, num_patches * channels, patch, patch]`
/// - output: `[batch_size, channels, sqrt(num_patches) * patch, sqrt(num_patches) * patch]`
pub fn collate_channels_to_img<B: Backend>(input: Tensor<B, 4>, channels: usize) -> Tensor<B, 4> {
    try_collate_channels_to_img(input, channels).unwrap_or_else(|err| panic!("{err}"))
}

/// Fallible version of [collate_channels_to_img](collate_channels_to_img).
pub fn try_collate_channels_to_img<B: Backend>(
    input: Tensor<B, 4>,
    channels: usize,
) -> Result<Tensor<B, 4>> {
    let [batch_size, stacked, patch_h, patch_w] = input.dims();

    if channels == 0 || stacked % channels != 0 {
        return Err(Error::InvalidShape(format!(
            "{stacked} stacked channels are not a multiple of {channels}"
        )));
    }

    let num_patches = stacked / channels;
    let side = (num_patches as f64).sqrt().round() as usize;
    if side * side != num_patches {
        return Err(Error::InvalidShape(format!(
            "{num_patches} patches don't form a square grid"
        )));
    }

    // [b, rows, cols, c, ph, pw] -> [b, c, rows, ph, cols, pw]
    let image = input
        .reshape([batch_size, side, side, channels, patch_h, patch_w])
        .permute([0, 3, 1, 4, 2, 5])
        .reshape([batch_size, channels, side * patch_h, side * patch_w]);

    Ok(image)
}

/// Split the channel axis in `parts` equal chunks.
pub fn split_masks_from_channels<B: Backend>(input: Tensor<B, 4>, parts: usize) -> Vec<Tensor<B, 4>> {
    input.chunk(parts, 1)
}

/// Place the input in the top-left corner of a `size x size` zero plane.
pub fn zero_pad<B: Backend>(input: Tensor<B, 4>, size: usize) -> Tensor<B, 4> {
    let [batch_size, channels, height, width] = input.dims();
    let padded = Tensor::zeros([batch_size, channels, size, size], &input.device());

    padded.slice_assign([0..batch_size, 0..channels, 0..height, 0..width], input)
}

/// Move the three first-level high-frequency quadrants into the channel axis.
///
/// # Shapes
///
/// - input: `[batch_size, channels, height, width]`
/// - output: `[batch_size, 3 * channels, height / 2, width / 2]`
pub fn hf_collate_to_channels<B: Backend>(coefficients: Tensor<B, 4>) -> Tensor<B, 4> {
    let [_, _, height, _] = coefficients.dims();
    let masks = get_3masks(coefficients, height / 2);

    Tensor::cat(masks.into_vec(), 1)
}

/// Inverse of [hf_collate_to_channels](hf_collate_to_channels), with a zero low-frequency
/// quadrant.
pub fn hf_collate_to_img<B: Backend>(input: Tensor<B, 4>) -> Tensor<B, 4> {
    let [_, stacked, _, _] = input.dims();
    let channels = stacked / 3;
    let [top_right, bottom_left, bottom_right]: [Tensor<B, 4>; 3] = input
        .narrow(1, 0, 3 * channels)
        .chunk(3, 1)
        .try_into()
        .unwrap_or_else(|_| panic!("Expected 3 masks stacked on the channel axis"));

    collate_patches_to_img(top_right.zeros_like(), top_right, bottom_left, bottom_right)
}

/// Two-level variant of [hf_collate_to_channels](hf_collate_to_channels).
///
/// The second-level masks are zero padded to the first-level mask size and stacked after the
/// first-level masks.
///
/// # Shapes
///
/// - output: `[batch_size, 6 * channels, height / 2, width / 2]`
pub fn hf_collate_to_channels_wt2<B: Backend>(coefficients: Tensor<B, 4>) -> Tensor<B, 4> {
    let [_, _, height, _] = coefficients.dims();
    let first = get_3masks(coefficients.clone(), height / 2);
    let second = get_3masks(coefficients, height / 4)
        .into_vec()
        .into_iter()
        .map(|mask| zero_pad(mask, height / 2));

    let mut masks = first.into_vec();
    masks.extend(second);

    Tensor::cat(masks, 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestBackend;
    use burn::tensor::Distribution;

    fn values<const D: usize>(tensor: Tensor<TestBackend, D>) -> Vec<f32> {
        tensor.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    #[should_panic(expected = "at least one wavelet level")]
    fn zero_mask_without_levels_panics() {
        let device = Default::default();
        let coefficients = Tensor::<TestBackend, 4>::ones([1, 1, 4, 4], &device);

        zero_mask(coefficients, 0, 1);
    }

    fn ramp(shape: [usize; 4]) -> Tensor<TestBackend, 4> {
        let device = Default::default();
        let numel = shape.iter().product::<usize>();
        Tensor::<TestBackend, 1, Int>::arange(0..numel as i64, &device)
            .float()
            .reshape(shape)
    }

    #[test]
    fn zero_patches_keeps_low_frequency_patch() {
        let input = ramp([1, 1, 8, 8]);

        let output = values(zero_patches(input.clone(), 2));
        let input = values(input);

        for row in 0..8 {
            for col in 0..8 {
                let index = row * 8 + col;
                let expected = if row < 2 && col < 2 { input[index] } else { 0.0 };
                assert_eq!(output[index], expected);
            }
        }
    }

    #[test]
    fn zero_mask_removes_known_patch() {
        let input = Tensor::<TestBackend, 4>::ones([2, 3, 8, 8], &Default::default());

        let first = values(zero_mask(input.clone(), 2, 1));
        let second = values(zero_mask(input, 2, 2));

        assert_eq!(first.iter().filter(|v| **v == 0.0).count(), 2 * 3 * 4);
        assert_eq!(second.iter().filter(|v| **v == 0.0).count(), 2 * 3 * 16);
    }

    #[test]
    fn quadrants_collate_back() {
        let input = ramp([2, 3, 8, 8]);

        let quadrants = get_4masks(input.clone(), 4);
        let output = collate_patches_to_img(
            quadrants.top_left,
            quadrants.top_right,
            quadrants.bottom_left,
            quadrants.bottom_right,
        );

        assert_eq!(values(output), values(input));
    }

    #[test]
    fn get_3masks_selects_high_frequency_quadrants() {
        let input = ramp([1, 1, 4, 4]);

        let masks = get_3masks(input, 2);

        assert_eq!(values(masks.top_right), vec![2.0, 3.0, 6.0, 7.0]);
        assert_eq!(values(masks.bottom_left), vec![8.0, 9.0, 12.0, 13.0]);
        assert_eq!(values(masks.bottom_right), vec![10.0, 11.0, 14.0, 15.0]);
    }

    #[test]
    fn patches_are_row_major() {
        let input = ramp([1, 1, 4, 4]);

        let patches = create_patches_from_grid(input, 2);

        assert_eq!(patches.dims(), [1, 4, 1, 2, 2]);
        assert_eq!(
            values(patches),
            vec![
                0.0, 1.0, 4.0, 5.0, //
                2.0, 3.0, 6.0, 7.0, //
                8.0, 9.0, 12.0, 13.0, //
                10.0, 11.0, 14.0, 15.0,
            ]
        );
    }

    #[test]
    fn channel_patches_collate_back() {
        let device = Default::default();
        let input =
            Tensor::<TestBackend, 4>::random([2, 3, 8, 8], Distribution::Default, &device);

        let patches = create_patches_from_grid(input.clone(), 4).reshape([2, 4 * 3, 4, 4]);
        let output = collate_channels_to_img(patches, 3);

        assert_eq!(values(output), values(input));
    }

    #[test]
    fn invalid_patch_grid_is_rejected() {
        let input = ramp([1, 1, 6, 6]);

        assert!(try_create_patches_from_grid(input.clone(), 4).is_err());
        assert!(try_collate_channels_to_img(input.clone(), 4).is_err());
        assert!(try_collate_channels_to_img(input.reshape([1, 2, 6, 3]), 1).is_err());
    }

    #[test]
    fn split_masks_in_equal_parts() {
        let input = ramp([1, 9, 2, 2]);

        let parts = split_masks_from_channels(input, 3);

        assert_eq!(parts.len(), 3);
        for part in parts {
            assert_eq!(part.dims(), [1, 3, 2, 2]);
        }
    }

    #[test]
    fn zero_pad_places_input_top_left() {
        let input = Tensor::<TestBackend, 4>::ones([1, 1, 2, 2], &Default::default());

        let output = values(zero_pad(input, 4));

        assert_eq!(
            output,
            vec![
                1.0, 1.0, 0.0, 0.0, //
                1.0, 1.0, 0.0, 0.0, //
                0.0, 0.0, 0.0, 0.0, //
                0.0, 0.0, 0.0, 0.0,
            ]
        );
    }

    #[test]
    fn high_frequency_channels_round_trip() {
        let input = ramp([2, 3, 8, 8]);

        let channels = hf_collate_to_channels(input.clone());
        let output = hf_collate_to_img(channels.clone());

        assert_eq!(channels.dims(), [2, 9, 4, 4]);
        assert_eq!(values(output), values(zero_mask(input, 1, 1)));
    }

    #[test]
    fn two_level_high_frequency_channels() {
        let input = ramp([1, 3, 8, 8]);

        let channels = hf_collate_to_channels_wt2(input);

        assert_eq!(channels.dims(), [1, 18, 4, 4]);
    }
}
