use super::blocks::{same_conv, NEGATIVE_SLOPE};
use super::loss::{ReconstructionLoss, VaeLoss};
use crate::wavelet::WaveletTransform;
use burn::{nn::conv::Conv2d, prelude::*, tensor::activation::leaky_relu};

/// Configuration to create a [wavelet CNN](WtCnn).
#[derive(Config, Debug)]
pub struct WtCnnConfig {
    #[config(default = 3)]
    pub channels: usize,
    #[config(default = 32)]
    pub hidden_channels: usize,
    /// Number of convolutions, including the output one.
    #[config(default = 4)]
    pub num_layers: usize,
}

/// Deterministic network learning the wavelet transform of its input.
///
/// Every convolution keeps the spatial size, so the output can be compared to the analytic
/// transform of the same image.
#[derive(Module, Debug)]
pub struct WtCnn<B: Backend> {
    convs: Vec<Conv2d<B>>,
}

impl WtCnnConfig {
    /// Initialize a new [wavelet CNN](WtCnn).
    pub fn init<B: Backend>(&self, device: &B::Device) -> WtCnn<B> {
        let num_layers = usize::max(self.num_layers, 1);
        let convs = (0..num_layers)
            .map(|layer| {
                let channels_in = if layer == 0 {
                    self.channels
                } else {
                    self.hidden_channels
                };
                let channels_out = if layer + 1 == num_layers {
                    self.channels
                } else {
                    self.hidden_channels
                };

                same_conv([channels_in, channels_out], device)
            })
            .collect();

        WtCnn { convs }
    }
}

impl<B: Backend> WtCnn<B> {
    /// # Shapes
    ///
    /// - input: `[batch_size, channels, height, width]`
    /// - output: `[batch_size, channels, height, width]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let last = self.convs.len() - 1;
        let mut x = images;

        for (index, conv) in self.convs.iter().enumerate() {
            x = conv.forward(x);
            if index != last {
                x = leaky_relu(x, NEGATIVE_SLOPE);
            }
        }

        x
    }

    /// Reconstruction error against the analytic transform, no KL term.
    pub fn loss(
        &self,
        images: Tensor<B, 4>,
        y: Tensor<B, 4>,
        transform: &WaveletTransform<B>,
        reconstruction: ReconstructionLoss,
    ) -> VaeLoss<B> {
        let target = transform.forward(images);

        VaeLoss::reconstruction_only(reconstruction.forward(y, target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wavelet::{FilterBank, Wavelet};
    use crate::TestBackend;

    #[test]
    fn keeps_the_input_shape() {
        let device = Default::default();
        let model = WtCnnConfig::new()
            .with_hidden_channels(4)
            .init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 4>::zeros([2, 3, 8, 8], &device);

        assert_eq!(model.forward(images).dims(), [2, 3, 8, 8]);
    }

    #[test]
    fn loss_has_no_kl_term() {
        let device = Default::default();
        let model = WtCnnConfig::new()
            .with_hidden_channels(4)
            .with_num_layers(2)
            .init::<TestBackend>(&device);
        let transform = WaveletTransform::new(FilterBank::analysis(Wavelet::Haar, &device), 1);
        let images = Tensor::<TestBackend, 4>::ones([1, 3, 8, 8], &device);

        let y = model.forward(images.clone());
        let values = model
            .loss(images, y, &transform, ReconstructionLoss::Mse)
            .values();

        assert_eq!(values.kld, 0.0);
        assert_eq!(values.total, values.reconstruction);
    }
}
