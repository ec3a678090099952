//! Face image folders and their batchers.

use crate::error::{Error, Result};
use burn::{
    data::{
        dataloader::batcher::Batcher,
        dataset::{Dataset, InMemDataset},
    },
    prelude::*,
};
use globwalk::DirEntry;
use image::imageops::FilterType;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::path::{Path, PathBuf};

const SUPPORTED_FILES: [&str; 4] = ["bmp", "jpg", "jpeg", "png"];

/// An RGB image resized to a square and scaled into `[0, 1]`.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceItem {
    /// Pixels in channel-first order, `3 * size * size` values.
    pub pixels: Vec<f32>,
    pub size: usize,
}

/// The same image at two resolutions.
#[derive(Clone, Debug, PartialEq)]
pub struct PairedFaceItem {
    pub low: FaceItem,
    pub high: FaceItem,
}

/// Load an image, convert it to RGB and resize it to `size x size`.
pub fn load_face<P: AsRef<Path>>(path: P, size: usize) -> Result<FaceItem> {
    let image = image::open(path.as_ref())?.to_rgb8();
    let image = image::imageops::resize(&image, size as u32, size as u32, FilterType::Triangle);

    let area = size * size;
    let mut pixels = vec![0.0; 3 * area];
    for (index, pixel) in image.pixels().enumerate() {
        for channel in 0..3 {
            pixels[channel * area + index] = pixel.0[channel] as f32 / 255.0;
        }
    }

    Ok(FaceItem { pixels, size })
}

/// List the supported images of a folder (recursively), sorted by path.
pub fn list_images<P: AsRef<Path>>(root: P) -> Result<Vec<PathBuf>> {
    let walker = globwalk::GlobWalkerBuilder::from_patterns(
        root.as_ref(),
        &[format!("*.{{{}}}", SUPPORTED_FILES.join(","))],
    )
    .follow_links(true)
    .sort_by(|p1: &DirEntry, p2: &DirEntry| p1.path().cmp(p2.path()))
    .build()
    .map_err(|err| Error::Dataset(format!("{err:?}")))?
    .filter_map(core::result::Result::ok);

    let paths: Vec<PathBuf> = walker.map(|entry| entry.path().to_path_buf()).collect();

    if paths.is_empty() {
        return Err(Error::EmptyDataset(root.as_ref().to_path_buf()));
    }

    Ok(paths)
}

/// Keep a random sample of `samples` paths, in a reproducible order.
fn sample_paths(mut paths: Vec<PathBuf>, samples: Option<usize>, seed: u64) -> Vec<PathBuf> {
    if let Some(samples) = samples {
        if samples < paths.len() {
            let mut rng = StdRng::seed_from_u64(seed);
            paths.shuffle(&mut rng);
            paths.truncate(samples);
        }
    }

    paths
}

/// Drop the paths whose image header can't be read, warning for each of them.
fn readable_paths(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    paths
        .into_iter()
        .filter(|path| match image::image_dimensions(path) {
            Ok(_) => true,
            Err(err) => {
                log::warn!("Skipping unreadable image {}: {err}", path.display());
                false
            }
        })
        .collect()
}

/// Sampled and readable images under `root`.
fn dataset_paths(root: &Path, samples: Option<usize>, seed: u64) -> Result<Vec<PathBuf>> {
    let paths = readable_paths(sample_paths(list_images(root)?, samples, seed));

    if paths.is_empty() {
        return Err(Error::EmptyDataset(root.to_path_buf()));
    }

    Ok(paths)
}

/// Folder of face images loaded lazily at a fixed resolution.
#[derive(Clone, Debug)]
pub struct FaceImageDataset {
    paths: Vec<PathBuf>,
    size: usize,
}

impl FaceImageDataset {
    /// Every supported image under `root`, resized to `size`.
    pub fn new<P: AsRef<Path>>(root: P, size: usize) -> Result<Self> {
        Self::with_samples(root, size, None, 0)
    }

    /// A random sample of at most `samples` images under `root`.
    ///
    /// Images with an unreadable header are left out.
    pub fn with_samples<P: AsRef<Path>>(
        root: P,
        size: usize,
        samples: Option<usize>,
        seed: u64,
    ) -> Result<Self> {
        let paths = dataset_paths(root.as_ref(), samples, seed)?;
        log::info!(
            "Loaded {} images from {} at {size}x{size}",
            paths.len(),
            root.as_ref().display()
        );

        Ok(Self { paths, size })
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Dataset<FaceItem> for FaceImageDataset {
    /// Panics when an image with a readable header fails to decode.
    fn get(&self, index: usize) -> Option<FaceItem> {
        let path = self.paths.get(index)?;

        match load_face(path, self.size) {
            Ok(item) => Some(item),
            Err(err) => panic!("Failed to load image {}: {err}", path.display()),
        }
    }

    fn len(&self) -> usize {
        self.paths.len()
    }
}

/// Folder of face images yielding a low and a high resolution version of each image.
#[derive(Clone, Debug)]
pub struct PairedFaceDataset {
    paths: Vec<PathBuf>,
    low_size: usize,
    high_size: usize,
}

impl PairedFaceDataset {
    pub fn new<P: AsRef<Path>>(root: P, low_size: usize, high_size: usize) -> Result<Self> {
        Self::with_samples(root, low_size, high_size, None, 0)
    }

    pub fn with_samples<P: AsRef<Path>>(
        root: P,
        low_size: usize,
        high_size: usize,
        samples: Option<usize>,
        seed: u64,
    ) -> Result<Self> {
        let paths = dataset_paths(root.as_ref(), samples, seed)?;
        log::info!(
            "Loaded {} image pairs from {} at {low_size} and {high_size}",
            paths.len(),
            root.as_ref().display()
        );

        Ok(Self {
            paths,
            low_size,
            high_size,
        })
    }
}

impl Dataset<PairedFaceItem> for PairedFaceDataset {
    fn get(&self, index: usize) -> Option<PairedFaceItem> {
        let path = self.paths.get(index)?;
        let load = || -> Result<PairedFaceItem> {
            Ok(PairedFaceItem {
                low: load_face(path, self.low_size)?,
                high: load_face(path, self.high_size)?,
            })
        };

        match load() {
            Ok(item) => Some(item),
            Err(err) => panic!("Failed to load image {}: {err}", path.display()),
        }
    }

    fn len(&self) -> usize {
        self.paths.len()
    }
}

/// Fixed random sample of `num_items` items, loaded in memory.
pub fn subset<D, I>(dataset: &D, num_items: usize, seed: u64) -> InMemDataset<I>
where
    D: Dataset<I>,
    I: Clone + Send + Sync,
{
    let mut indices: Vec<usize> = (0..dataset.len()).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let items = indices
        .into_iter()
        .take(num_items)
        .filter_map(|index| dataset.get(index))
        .collect();

    InMemDataset::new(items)
}

#[derive(Clone, Debug)]
pub struct FaceBatch<B: Backend> {
    /// `[batch_size, 3, size, size]`
    pub images: Tensor<B, 4>,
}

#[derive(Clone, Debug)]
pub struct PairedFaceBatch<B: Backend> {
    pub low: Tensor<B, 4>,
    pub high: Tensor<B, 4>,
}

#[derive(Clone, Debug, Default)]
pub struct FaceBatcher;

#[derive(Clone, Debug, Default)]
pub struct PairedFaceBatcher;

fn stack_faces<B: Backend>(items: Vec<FaceItem>, device: &B::Device) -> Tensor<B, 4> {
    let images = items
        .into_iter()
        .map(|item| {
            let size = item.size;
            TensorData::new(item.pixels, Shape::new([3, size, size]))
        })
        .map(|data| Tensor::<B, 3>::from_data(data.convert::<B::FloatElem>(), device))
        .collect();

    Tensor::stack(images, 0)
}

impl<B: Backend> Batcher<B, FaceItem, FaceBatch<B>> for FaceBatcher {
    fn batch(&self, items: Vec<FaceItem>, device: &B::Device) -> FaceBatch<B> {
        FaceBatch {
            images: stack_faces(items, device),
        }
    }
}

impl<B: Backend> Batcher<B, PairedFaceItem, PairedFaceBatch<B>> for PairedFaceBatcher {
    fn batch(&self, items: Vec<PairedFaceItem>, device: &B::Device) -> PairedFaceBatch<B> {
        let (low, high): (Vec<_>, Vec<_>) =
            items.into_iter().map(|item| (item.low, item.high)).unzip();

        PairedFaceBatch {
            low: stack_faces(low, device),
            high: stack_faces(high, device),
        }
    }
}
