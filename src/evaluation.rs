//! Image dumps of every model, run after each epoch on a fixed sample of the dataset.
//!
//! Wavelet-domain images are rescaled with [normalize_for_display] before being saved, images
//! are only clamped.

use crate::config::ArtifactDirs;
use crate::error::{Error, Result};
use crate::model::{FullVae, IwtVae, MaskNet, WtCnn, WtVae};
use crate::show::{normalize_for_display, save_image_grid};
use crate::wavelet::{
    collate_patches_to_img, get_3masks, hf_collate_to_channels, hf_collate_to_channels_wt2,
    hf_collate_to_img, zero_mask, zero_pad, zero_patches, InverseWaveletTransform, Masks,
    WaveletTransform,
};
use burn::prelude::*;

/// Images per row of the saved grids.
pub const NROW: usize = 8;

fn save_image<B: Backend>(dirs: &ArtifactDirs, name: &str, images: Tensor<B, 4>) -> Result<()> {
    save_image_grid(images, dirs.image(name), NROW)
}

fn save_wavelet<B: Backend>(
    dirs: &ArtifactDirs,
    name: &str,
    coefficients: Tensor<B, 4>,
) -> Result<()> {
    save_image_grid(normalize_for_display(coefficients), dirs.image(name), NROW)
}

/// Decode random latents: the wavelet images and their inverse transform.
pub fn eval_wtvae<B: Backend>(
    epoch: usize,
    model: &WtVae<B>,
    iwt: &InverseWaveletTransform<B>,
    num_samples: usize,
    dirs: &ArtifactDirs,
    device: &B::Device,
) -> Result<()> {
    let samples = model.sample(num_samples, device);

    save_wavelet(dirs, &format!("decoded_sample{epoch}"), samples.clone())?;
    save_image(dirs, &format!("sample{epoch}"), iwt.forward(samples))
}

/// Reconstruct the sample images from the posterior mean, and decode random latents
/// conditioned on the same wavelet images.
pub fn eval_iwtvae<B: Backend>(
    epoch: usize,
    model: &IwtVae<B>,
    images: Tensor<B, 4>,
    wt: &WaveletTransform<B>,
    iwt: &InverseWaveletTransform<B>,
    zero: bool,
    dirs: &ArtifactDirs,
) -> Result<()> {
    let mut y = wt.forward(images.clone());
    if zero {
        y = zero_patches(y, model.num_wt());
    }

    let (mu, _) = model.encode(images.clone(), y.clone());
    let x_hat = model.decode(y.clone(), mu, iwt);
    let x_sample = model.sample(y.clone(), iwt);

    save_image(dirs, &format!("sample_recon{epoch}"), x_hat)?;
    save_image(dirs, &format!("sample_z{epoch}"), x_sample)?;
    save_wavelet(dirs, &format!("sample_y{epoch}"), y)?;
    save_image(dirs, &format!("sample{epoch}"), images)
}

/// Predicted and analytic wavelet images of the wavelet CNN.
pub fn eval_wtcnn<B: Backend>(
    epoch: usize,
    model: &WtCnn<B>,
    images: Tensor<B, 4>,
    wt: &WaveletTransform<B>,
    dirs: &ArtifactDirs,
) -> Result<()> {
    let y_hat = model.forward(images.clone());

    save_wavelet(dirs, &format!("sample_recon{epoch}"), y_hat)?;
    save_wavelet(dirs, &format!("sample_y{epoch}"), wt.forward(images.clone()))?;
    save_image(dirs, &format!("sample{epoch}"), images)
}

/// Remove the known low-frequency patch and let `model` fill the wavelet image back.
pub fn eval_ae_mask<B, F>(
    epoch: usize,
    model: F,
    images: Tensor<B, 4>,
    wt: &WaveletTransform<B>,
    dirs: &ArtifactDirs,
) -> Result<()>
where
    B: Backend,
    F: Fn(Tensor<B, 4>) -> Tensor<B, 4>,
{
    let y = zero_mask(wt.forward(images), wt.levels(), 1);
    let x_hat = model(y.clone());

    save_wavelet(dirs, &format!("sample_recon{epoch}"), x_hat)?;
    save_wavelet(dirs, &format!("sample{epoch}"), y)
}

/// Same as [eval_ae_mask](eval_ae_mask) for models seeing the high-frequency masks stacked on
/// the channel axis.
///
/// Only one and two level transforms have a channel layout.
pub fn eval_ae_mask_channels<B, F>(
    epoch: usize,
    model: F,
    images: Tensor<B, 4>,
    wt: &WaveletTransform<B>,
    dirs: &ArtifactDirs,
) -> Result<()>
where
    B: Backend,
    F: Fn(Tensor<B, 4>) -> Tensor<B, 4>,
{
    let [_, channels, _, _] = images.dims();
    let y = zero_mask(wt.forward(images), wt.levels(), 1);
    let y = match wt.levels() {
        1 => hf_collate_to_channels(y),
        2 => hf_collate_to_channels_wt2(y),
        levels => {
            return Err(Error::InvalidShape(format!(
                "No channel layout for {levels} wavelet levels"
            )))
        }
    };

    // The first-level masks come first in both layouts.
    let x_hat = hf_collate_to_img(model(y.clone()).narrow(1, 0, 3 * channels));
    let y = hf_collate_to_img(y.narrow(1, 0, 3 * channels));

    save_wavelet(dirs, &format!("sample_recon{epoch}"), x_hat)?;
    save_wavelet(dirs, &format!("sample{epoch}"), y)
}

/// Reconstructions of the joint model, and samples from both priors.
pub fn eval_fullvae<B: Backend>(
    epoch: usize,
    model: &FullVae<B>,
    images: Tensor<B, 4>,
    iwt: &InverseWaveletTransform<B>,
    dirs: &ArtifactDirs,
) -> Result<()> {
    let [num_images, _, _, _] = images.dims();
    let num_wt = model.iwt_model.num_wt();

    let y = zero_patches(model.wt_model.reconstruct(images.clone()), num_wt);
    let (mu, _) = model.iwt_model.encode(images.clone(), y.clone());
    let x_hat = model.iwt_model.decode(y.clone(), mu, iwt);

    let y_sample = zero_patches(model.wt_model.sample(num_images, &images.device()), num_wt);
    let x_sample = model.iwt_model.sample(y_sample, iwt);

    save_image(dirs, &format!("sample_recon{epoch}"), x_hat)?;
    save_wavelet(dirs, &format!("sample_y{epoch}"), y)?;
    save_image(dirs, &format!("sample_z{epoch}"), x_sample)?;
    save_image(dirs, &format!("sample{epoch}"), images)
}

/// Real and predicted masks of the mask network, and the images they invert to.
///
/// `tag` is appended to every file name, e.g. `itr1000`.
pub fn eval_masknet<B: Backend>(
    tag: &str,
    model: &MaskNet<B>,
    images: Tensor<B, 4>,
    wt: &WaveletTransform<B>,
    iwt: &InverseWaveletTransform<B>,
    mask_dim: usize,
    dirs: &ArtifactDirs,
) -> Result<()> {
    let [batch_size, channels, image_size, _] = images.dims();
    let y = wt.forward(images.clone());
    let low_dim = 2 * model.patch_size();
    let low = y
        .clone()
        .slice([0..batch_size, 0..channels, 0..low_dim, 0..low_dim]);

    let recon = model.masks_from_output(model.forward(model.input_from_wavelet(y.clone())));
    let real = get_3masks(y, mask_dim);

    // One level inverse of each mask, as if it were a wavelet image on its own.
    let invert = |masks: Masks<B>| {
        collate_patches_to_img(
            masks.top_right.zeros_like(),
            iwt.forward_levels(masks.top_right, 1),
            iwt.forward_levels(masks.bottom_left, 1),
            iwt.forward_levels(masks.bottom_right, 1),
        )
    };
    let with_low = |masks: Masks<B>| {
        let grid = collate_masks(masks).slice_assign(
            [0..batch_size, 0..channels, 0..low_dim, 0..low_dim],
            low.clone(),
        );

        iwt.forward(zero_pad(grid, image_size))
    };

    save_wavelet(dirs, &format!("real_mask_{tag}"), collate_masks(real.clone()))?;
    save_wavelet(dirs, &format!("real_mask_iwt_{tag}"), invert(real.clone()))?;
    save_wavelet(dirs, &format!("recon_mask_{tag}"), collate_masks(recon.clone()))?;
    save_wavelet(dirs, &format!("recon_mask_iwt_{tag}"), invert(recon.clone()))?;

    save_image(dirs, &format!("recon_img_{tag}"), with_low(recon))?;
    save_image(dirs, &format!("img_real_masks_{tag}"), with_low(real))?;
    save_image(
        dirs,
        &format!("low_img_{tag}"),
        iwt.forward(zero_pad(low.clone(), image_size)),
    )?;
    save_image(dirs, &format!("img_{tag}"), images)
}

fn collate_masks<B: Backend>(masks: Masks<B>) -> Tensor<B, 4> {
    collate_patches_to_img(
        masks.top_right.zeros_like(),
        masks.top_right,
        masks.bottom_left,
        masks.bottom_right,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IwtVaeConfig, MaskNetConfig, WtCnnConfig, WtVaeConfig};
    use crate::wavelet::{FilterBank, Wavelet};
    use crate::TestBackend;
    use burn::tensor::Distribution;

    fn transforms(
        levels: usize,
        device: &<TestBackend as Backend>::Device,
    ) -> (WaveletTransform<TestBackend>, InverseWaveletTransform<TestBackend>) {
        (
            WaveletTransform::new(FilterBank::analysis(Wavelet::Haar, device), levels),
            InverseWaveletTransform::new(FilterBank::synthesis(Wavelet::Haar, device), levels),
        )
    }

    fn saved(dirs: &ArtifactDirs, names: &[&str]) -> bool {
        names.iter().all(|name| dirs.image(name).is_file())
    }

    #[test]
    fn wtvae_samples_are_saved() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = ArtifactDirs::create(dir.path()).unwrap();
        let device = Default::default();
        let (_, iwt) = transforms(2, &device);
        let model = WtVaeConfig::new()
            .with_image_size(16)
            .with_output_size(16)
            .with_z_dim(4)
            .with_base_channels(4)
            .init::<TestBackend>(&device);

        eval_wtvae(2, &model, &iwt, 3, &dirs, &device).unwrap();

        assert!(saved(&dirs, &["decoded_sample2", "sample2"]));
    }

    #[test]
    fn iwtvae_dumps_every_image() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = ArtifactDirs::create(dir.path()).unwrap();
        let device = Default::default();
        let (wt, iwt) = transforms(2, &device);
        let model = IwtVaeConfig::new()
            .with_image_size(16)
            .with_num_wt(2)
            .with_z_dim(4)
            .with_base_channels(4)
            .with_latent_channels(2)
            .init::<TestBackend>(&device);
        let images = Tensor::random([2, 3, 16, 16], Distribution::Default, &device);

        eval_iwtvae(1, &model, images, &wt, &iwt, true, &dirs).unwrap();

        assert!(saved(&dirs, &["sample_recon1", "sample_z1", "sample_y1", "sample1"]));
    }

    #[test]
    fn wtcnn_dumps_both_wavelet_images() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = ArtifactDirs::create(dir.path()).unwrap();
        let device = Default::default();
        let (wt, _) = transforms(1, &device);
        let model = WtCnnConfig::new()
            .with_hidden_channels(4)
            .with_num_layers(2)
            .init::<TestBackend>(&device);
        let images = Tensor::random([2, 3, 8, 8], Distribution::Default, &device);

        eval_wtcnn(3, &model, images, &wt, &dirs).unwrap();

        assert!(saved(&dirs, &["sample_recon3", "sample_y3", "sample3"]));
    }

    #[test]
    fn ae_mask_channels_support_two_levels() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = ArtifactDirs::create(dir.path()).unwrap();
        let device = Default::default();
        let (wt, _) = transforms(2, &device);
        let images = Tensor::<TestBackend, 4>::random([1, 3, 16, 16], Distribution::Default, &device);

        // Identity on the first-level masks.
        let model = |y: Tensor<TestBackend, 4>| y.narrow(1, 0, 9);

        eval_ae_mask_channels(4, model, images.clone(), &wt, &dirs).unwrap();
        eval_ae_mask(5, |y| y, images, &wt, &dirs).unwrap();

        assert!(saved(&dirs, &["sample_recon4", "sample4", "sample_recon5", "sample5"]));
    }

    #[test]
    fn ae_mask_channels_reject_deep_transforms() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = ArtifactDirs::create(dir.path()).unwrap();
        let device = Default::default();
        let (wt, _) = transforms(3, &device);
        let images = Tensor::<TestBackend, 4>::zeros([1, 3, 16, 16], &device);

        let result = eval_ae_mask_channels(1, |y| y, images, &wt, &dirs);

        assert!(matches!(result, Err(Error::InvalidShape(_))));
    }

    #[test]
    fn masknet_dumps_masks_and_images() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = ArtifactDirs::create(dir.path()).unwrap();
        let device = Default::default();
        let (wt, iwt) = transforms(3, &device);
        let model = MaskNetConfig::new()
            .with_mask_dim(8)
            .with_patch_size(4)
            .with_base_channels(4)
            .init::<TestBackend>(&device);
        let images = Tensor::random([2, 3, 32, 32], Distribution::Default, &device);

        eval_masknet("itr0", &model, images, &wt, &iwt, 8, &dirs).unwrap();

        assert!(saved(
            &dirs,
            &[
                "real_mask_itr0",
                "real_mask_iwt_itr0",
                "recon_mask_itr0",
                "recon_mask_iwt_itr0",
                "recon_img_itr0",
                "img_real_masks_itr0",
                "low_img_itr0",
                "img_itr0",
            ]
        ));
    }
}
