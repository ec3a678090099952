use super::blocks::{reparameterize, ConvDecoder, ConvDecoderConfig, ConvEncoder, ConvEncoderConfig};
use super::loss::{kl_divergence, ReconstructionLoss, VaeLoss};
use crate::wavelet::WaveletTransform;
use burn::{prelude::*, tensor::Distribution};

/// Configuration to create a [WT-VAE](WtVae).
#[derive(Config, Debug)]
pub struct WtVaeConfig {
    /// Spatial size of the input images.
    #[config(default = 64)]
    pub image_size: usize,
    /// Spatial size of the produced wavelet image.
    #[config(default = 64)]
    pub output_size: usize,
    #[config(default = 3)]
    pub channels: usize,
    #[config(default = 100)]
    pub z_dim: usize,
    #[config(default = 32)]
    pub base_channels: usize,
}

/// Variational autoencoder mapping an image to its wavelet transform.
///
/// The encoder sees the image, the decoder produces the wavelet-domain representation, so
/// decoded samples go through an inverse transform before being viewed as images.
#[derive(Module, Debug)]
pub struct WtVae<B: Backend> {
    pub(crate) encoder: ConvEncoder<B>,
    pub(crate) decoder: ConvDecoder<B>,
    z_dim: usize,
    output_size: usize,
}

/// Output of the [WT-VAE](WtVae) forward pass.
#[derive(Clone, Debug)]
pub struct WtVaeOutput<B: Backend> {
    /// Wavelet image, `[batch_size, channels, output_size, output_size]`.
    pub y: Tensor<B, 4>,
    pub mu: Tensor<B, 2>,
    pub logvar: Tensor<B, 2>,
}

impl WtVaeConfig {
    /// Initialize a new [WT-VAE](WtVae).
    pub fn init<B: Backend>(&self, device: &B::Device) -> WtVae<B> {
        let encoder = ConvEncoderConfig::new(self.channels, self.image_size, self.z_dim)
            .with_base_channels(self.base_channels)
            .init(device);
        let decoder = ConvDecoderConfig::new(self.z_dim, self.channels, self.output_size)
            .with_base_channels(self.base_channels)
            .init(device);

        WtVae {
            encoder,
            decoder,
            z_dim: self.z_dim,
            output_size: self.output_size,
        }
    }
}

impl<B: Backend> WtVae<B> {
    /// Encode, sample a latent and decode.
    pub fn forward(&self, images: Tensor<B, 4>) -> WtVaeOutput<B> {
        let (mu, logvar) = self.encoder.forward(images);
        let z = reparameterize(mu.clone(), logvar.clone());

        WtVaeOutput {
            y: self.decoder.forward(z),
            mu,
            logvar,
        }
    }

    /// Encode and decode the mean, without sampling.
    pub fn reconstruct(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let (mu, _) = self.encoder.forward(images);

        self.decoder.forward(mu)
    }

    pub fn encode(&self, images: Tensor<B, 4>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        self.encoder.forward(images)
    }

    pub fn decode(&self, z: Tensor<B, 2>) -> Tensor<B, 4> {
        self.decoder.forward(z)
    }

    /// Decode `num_samples` latents drawn from the prior.
    pub fn sample(&self, num_samples: usize, device: &B::Device) -> Tensor<B, 4> {
        let z = Tensor::random(
            [num_samples, self.z_dim],
            Distribution::Normal(0.0, 1.0),
            device,
        );

        self.decode(z)
    }

    pub fn z_dim(&self) -> usize {
        self.z_dim
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    /// Objective against the wavelet transform of the input images.
    pub fn loss(
        &self,
        images: Tensor<B, 4>,
        output: WtVaeOutput<B>,
        transform: &WaveletTransform<B>,
        reconstruction: ReconstructionLoss,
        kl_weight: f64,
    ) -> VaeLoss<B> {
        let target = transform.forward(images);

        self.loss_against(target, output, reconstruction, kl_weight)
    }

    /// Objective against the low-frequency patch of the wavelet transform of a higher
    /// resolution version of the input.
    ///
    /// The transform must bring the high resolution images down to `output_size`, e.g. a 512
    /// image with two levels for a 128 output.
    pub fn loss_with_highres(
        &self,
        highres: Tensor<B, 4>,
        output: WtVaeOutput<B>,
        transform: &WaveletTransform<B>,
        reconstruction: ReconstructionLoss,
        kl_weight: f64,
    ) -> VaeLoss<B> {
        let [batch_size, channels, _, _] = highres.dims();
        let size = self.output_size;
        let target = transform
            .forward(highres)
            .slice([0..batch_size, 0..channels, 0..size, 0..size]);

        self.loss_against(target, output, reconstruction, kl_weight)
    }

    fn loss_against(
        &self,
        target: Tensor<B, 4>,
        output: WtVaeOutput<B>,
        reconstruction: ReconstructionLoss,
        kl_weight: f64,
    ) -> VaeLoss<B> {
        let reconstruction = reconstruction.forward(output.y, target);
        let kld = kl_divergence(output.mu, output.logvar);

        VaeLoss::new(reconstruction, kld, kl_weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wavelet::{FilterBank, Wavelet};
    use crate::{TestAutodiffBackend, TestBackend};

    fn config() -> WtVaeConfig {
        WtVaeConfig::new()
            .with_image_size(16)
            .with_output_size(16)
            .with_z_dim(8)
            .with_base_channels(4)
    }

    #[test]
    fn forward_shapes() {
        let device = Default::default();
        let model = config().init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 4>::zeros([2, 3, 16, 16], &device);

        let output = model.forward(images);

        assert_eq!(output.y.dims(), [2, 3, 16, 16]);
        assert_eq!(output.mu.dims(), [2, 8]);
        assert_eq!(model.sample(5, &device).dims(), [5, 3, 16, 16]);
    }

    #[test]
    fn highres_target_is_cropped_to_output_size() {
        let device = Default::default();
        let model = config().init::<TestBackend>(&device);
        let transform = WaveletTransform::new(FilterBank::analysis(Wavelet::Haar, &device), 1);
        let lowres = Tensor::<TestBackend, 4>::zeros([1, 3, 16, 16], &device);
        let highres = Tensor::<TestBackend, 4>::zeros([1, 3, 32, 32], &device);

        let output = model.forward(lowres);
        let loss = model.loss_with_highres(
            highres,
            output,
            &transform,
            ReconstructionLoss::Mse,
            1.0,
        );

        assert!(loss.values().total.is_finite());
    }

    #[test]
    fn loss_backward_reaches_parameters() {
        let device = Default::default();
        let model = config().init::<TestAutodiffBackend>(&device);
        let transform = WaveletTransform::new(FilterBank::analysis(Wavelet::Haar, &device), 2);
        let images = Tensor::<TestAutodiffBackend, 4>::ones([2, 3, 16, 16], &device);

        let output = model.forward(images.clone());
        let loss = model.loss(images, output, &transform, ReconstructionLoss::Mse, 0.5);
        let grads = loss.total.backward();

        assert!(model
            .encoder
            .mu
            .weight
            .grad(&grads)
            .is_some());
    }
}
