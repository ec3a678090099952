use crate::error::{Error, Result};
use burn::prelude::*;
use image::{GrayImage, Luma, Rgb, RgbImage};
use std::fs;
use std::path::Path;

/// Pixels between two images of a grid, and around the grid.
const PADDING: usize = 2;

/// Save a batch of images as a PNG grid with `nrow` images per row.
///
/// Values are clamped into `[0, 1]`. Single channel images are written in grayscale, any other
/// channel count uses the first three channels.
pub fn save_image_grid<B: Backend, P: AsRef<Path>>(
    images: Tensor<B, 4>,
    path: P,
    nrow: usize,
) -> Result<()> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let [num_images, channels, height, width] = images.dims();
    if num_images == 0 || channels == 0 {
        return Err(Error::InvalidShape(format!(
            "Can't save an image grid of {num_images} images with {channels} channels"
        )));
    }

    let values = images
        .clamp(0.0, 1.0)
        .into_data()
        .to_vec::<f32>()
        .map_err(|err| Error::InvalidShape(format!("{err:?}")))?;

    let columns = usize::min(usize::max(nrow, 1), num_images);
    let rows = num_images.div_ceil(columns);
    let grid_width = columns * (width + PADDING) + PADDING;
    let grid_height = rows * (height + PADDING) + PADDING;

    let pixel = |image: usize, channel: usize, y: usize, x: usize| -> u8 {
        let value = values[((image * channels + channel) * height + y) * width + x];
        (value * 255.0 + 0.5) as u8
    };
    let origin = |image: usize| -> (usize, usize) {
        let (row, column) = (image / columns, image % columns);
        (
            column * (width + PADDING) + PADDING,
            row * (height + PADDING) + PADDING,
        )
    };

    if channels == 1 {
        let mut grid = GrayImage::new(grid_width as u32, grid_height as u32);
        for image in 0..num_images {
            let (x0, y0) = origin(image);
            for y in 0..height {
                for x in 0..width {
                    grid.put_pixel((x0 + x) as u32, (y0 + y) as u32, Luma([pixel(image, 0, y, x)]));
                }
            }
        }
        grid.save(path)?;
    } else {
        let mut grid = RgbImage::new(grid_width as u32, grid_height as u32);
        let rgb = [0, usize::min(1, channels - 1), usize::min(2, channels - 1)];
        for image in 0..num_images {
            let (x0, y0) = origin(image);
            for y in 0..height {
                for x in 0..width {
                    let color = rgb.map(|channel| pixel(image, channel, y, x));
                    grid.put_pixel((x0 + x) as u32, (y0 + y) as u32, Rgb(color));
                }
            }
        }
        grid.save(path)?;
    }

    log::debug!("Saved {num_images} images to {}", path.display());

    Ok(())
}

/// Rescale values from `[min, max]` to `[0, 1]`, for wavelet-domain images.
pub fn normalize_for_display<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Tensor<B, D> {
    let min = tensor.clone().min().into_scalar().elem::<f32>();
    let max = tensor.clone().max().into_scalar().elem::<f32>();
    let range = if max - min == 0.0 { 1.0 } else { max - min };

    tensor.sub_scalar(min).div_scalar(range)
}
