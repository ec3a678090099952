use super::blocks::{down_conv, same_conv, up_conv, NEGATIVE_SLOPE};
use super::loss::mse_mean;
use crate::wavelet::{
    collate_channels_to_img, create_patches_from_grid, get_4masks, split_masks_from_channels,
    Masks,
};
use burn::{
    nn::conv::{Conv2d, ConvTranspose2d},
    prelude::*,
    tensor::activation::leaky_relu,
};

/// Configuration to create a [mask network](MaskNet).
#[derive(Config, Debug)]
pub struct MaskNetConfig {
    #[config(default = 3)]
    pub channels: usize,
    /// Size of each predicted high-frequency mask.
    #[config(default = 64)]
    pub mask_dim: usize,
    /// Size of the square patches the masks are cut into.
    #[config(default = 32)]
    pub patch_size: usize,
    #[config(default = 32)]
    pub base_channels: usize,
}

/// Small U-Net predicting the next level high-frequency masks from the four quadrants of the
/// current level.
///
/// The predicted masks are cut in `patch_size` squares stacked on the channel axis, in the order
/// top-right, bottom-left, bottom-right.
#[derive(Module, Debug)]
pub struct MaskNet<B: Backend> {
    input: Conv2d<B>,
    down1: Conv2d<B>,
    down2: Conv2d<B>,
    bottleneck: Conv2d<B>,
    up2: ConvTranspose2d<B>,
    fuse2: Conv2d<B>,
    up1: ConvTranspose2d<B>,
    fuse1: Conv2d<B>,
    output: Conv2d<B>,
    channels: usize,
    patch_size: usize,
    num_patches: usize,
}

impl MaskNetConfig {
    /// Number of patches per mask.
    pub fn num_patches(&self) -> usize {
        let side = self.mask_dim / self.patch_size;

        side * side
    }

    /// Initialize a new [mask network](MaskNet).
    pub fn init<B: Backend>(&self, device: &B::Device) -> MaskNet<B> {
        let base = self.base_channels;
        let num_patches = self.num_patches();

        MaskNet {
            input: same_conv([4 * self.channels, base], device),
            down1: down_conv([base, 2 * base], device),
            down2: down_conv([2 * base, 4 * base], device),
            bottleneck: same_conv([4 * base, 4 * base], device),
            up2: up_conv([4 * base, 2 * base], device),
            fuse2: same_conv([4 * base, 2 * base], device),
            up1: up_conv([2 * base, base], device),
            fuse1: same_conv([2 * base, base], device),
            output: same_conv([base, 3 * num_patches * self.channels], device),
            channels: self.channels,
            patch_size: self.patch_size,
            num_patches,
        }
    }
}

impl<B: Backend> MaskNet<B> {
    /// # Shapes
    ///
    /// - input: `[batch_size, 4 * channels, patch_size, patch_size]`
    /// - output: `[batch_size, 3 * num_patches * channels, patch_size, patch_size]`
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let act = |x| leaky_relu(x, NEGATIVE_SLOPE);

        let x0 = act(self.input.forward(input));
        let x1 = act(self.down1.forward(x0.clone()));
        let x2 = act(self.down2.forward(x1.clone()));
        let x = act(self.bottleneck.forward(x2));

        let x = act(self.up2.forward(x));
        let x = act(self.fuse2.forward(Tensor::cat(vec![x, x1], 1)));
        let x = act(self.up1.forward(x));
        let x = act(self.fuse1.forward(Tensor::cat(vec![x, x0], 1)));

        self.output.forward(x)
    }

    /// Stack the four quadrants of the top-left `2 * patch_size` region on the channel axis.
    pub fn input_from_wavelet(&self, coefficients: Tensor<B, 4>) -> Tensor<B, 4> {
        let quadrants = get_4masks(coefficients, self.patch_size);

        Tensor::cat(
            vec![
                quadrants.top_left,
                quadrants.top_right,
                quadrants.bottom_left,
                quadrants.bottom_right,
            ],
            1,
        )
    }

    /// Reassemble the predicted patches into three `mask_dim` masks.
    pub fn masks_from_output(&self, output: Tensor<B, 4>) -> Masks<B> {
        let [top_right, bottom_left, bottom_right] = self.split(output);

        Masks {
            top_right: collate_channels_to_img(top_right, self.channels),
            bottom_left: collate_channels_to_img(bottom_left, self.channels),
            bottom_right: collate_channels_to_img(bottom_right, self.channels),
        }
    }

    /// Sum over every patch of the three masks of the per-patch mean squared error.
    pub fn loss(&self, output: Tensor<B, 4>, real: Masks<B>) -> Tensor<B, 1> {
        let [batch_size, _, _, _] = output.dims();
        let shape = [
            batch_size,
            self.num_patches,
            self.channels,
            self.patch_size,
            self.patch_size,
        ];
        let mut loss = Tensor::zeros([1], &output.device());

        for (recon, real) in self.split(output).into_iter().zip(real.into_vec()) {
            let recon = recon.reshape(shape);
            let real = create_patches_from_grid(real, self.patch_size);

            for patch in 0..self.num_patches {
                loss = loss
                    + mse_mean(
                        real.clone().narrow(1, patch, 1),
                        recon.clone().narrow(1, patch, 1),
                    );
            }
        }

        loss
    }

    pub fn patch_size(&self) -> usize {
        self.patch_size
    }

    fn split(&self, output: Tensor<B, 4>) -> [Tensor<B, 4>; 3] {
        split_masks_from_channels(output, 3)
            .try_into()
            .unwrap_or_else(|_| panic!("Expected 3 masks stacked on the channel axis"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wavelet::get_3masks;
    use crate::TestBackend;
    use burn::tensor::Distribution;

    fn config() -> MaskNetConfig {
        MaskNetConfig::new()
            .with_mask_dim(8)
            .with_patch_size(4)
            .with_base_channels(4)
    }

    #[test]
    fn output_stacks_every_patch() {
        let device = Default::default();
        let config = config();
        let model = config.init::<TestBackend>(&device);
        let input = Tensor::<TestBackend, 4>::zeros([2, 12, 4, 4], &device);

        assert_eq!(config.num_patches(), 4);
        assert_eq!(model.forward(input).dims(), [2, 36, 4, 4]);
    }

    #[test]
    fn input_from_wavelet_stacks_quadrants() {
        let device = Default::default();
        let model = config().init::<TestBackend>(&device);
        let y = Tensor::<TestBackend, 4>::zeros([1, 3, 16, 16], &device);

        assert_eq!(model.input_from_wavelet(y).dims(), [1, 12, 4, 4]);
    }

    #[test]
    fn loss_is_zero_for_exact_masks() {
        let device = Default::default();
        let model = config().init::<TestBackend>(&device);
        let y = Tensor::<TestBackend, 4>::random([2, 3, 16, 16], Distribution::Default, &device);
        let real = get_3masks(y, 8);

        // Encode the real masks in the network's output layout.
        let output = Tensor::cat(
            real.clone()
                .into_vec()
                .into_iter()
                .map(|mask| create_patches_from_grid(mask, 4).reshape([2, 12, 4, 4]))
                .collect(),
            1,
        );
        let masks = model.masks_from_output(output.clone());
        let loss: f32 = model.loss(output, real.clone()).into_scalar();

        assert!(loss.abs() < 1e-10);
        let expected = real.top_right.into_data().to_vec::<f32>().unwrap();
        let actual = masks.top_right.into_data().to_vec::<f32>().unwrap();
        assert_eq!(expected, actual);
    }
}
