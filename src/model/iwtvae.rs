use super::blocks::{
    reparameterize, same_conv, up_conv, ConvEncoder, ConvEncoderConfig, NEGATIVE_SLOPE,
};
use super::loss::{kl_divergence, ReconstructionLoss, VaeLoss};
use crate::wavelet::{zero_mask, InverseWaveletTransform};
use burn::{
    nn::{
        conv::{Conv2d, ConvTranspose2d},
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::{activation::leaky_relu, Distribution},
};

/// Configuration to create an [IWT-VAE](IwtVae).
#[derive(Config, Debug)]
pub struct IwtVaeConfig {
    /// Spatial size of the reconstructed images.
    #[config(default = 512)]
    pub image_size: usize,
    /// Number of wavelet levels between the known low-frequency patch and the full image.
    #[config(default = 3)]
    pub num_wt: usize,
    #[config(default = 3)]
    pub channels: usize,
    #[config(default = 100)]
    pub z_dim: usize,
    #[config(default = 32)]
    pub base_channels: usize,
    /// Channels of the latent feature map joined to the low-frequency patch.
    #[config(default = 16)]
    pub latent_channels: usize,
}

/// Conditional VAE predicting the high-frequency masks of a wavelet image.
///
/// The encoder sees the image and its (possibly masked) wavelet transform `y`. The decoder
/// sees `y` down-sampled to the low-frequency patch size and a latent code: it predicts a
/// high-frequency residual added to `y`, keeps the known patch untouched and inverts the
/// transform.
#[derive(Module, Debug)]
pub struct IwtVae<B: Backend> {
    encoder: ConvEncoder<B>,
    project: Linear<B>,
    fuse: Conv2d<B>,
    upsample: Vec<ConvTranspose2d<B>>,
    output: Conv2d<B>,
    image_size: usize,
    num_wt: usize,
    z_dim: usize,
    latent_channels: usize,
}

/// Output of the [IWT-VAE](IwtVae) forward pass.
#[derive(Clone, Debug)]
pub struct IwtVaeOutput<B: Backend> {
    /// Reconstructed images.
    pub x_hat: Tensor<B, 4>,
    /// Predicted wavelet image the reconstruction was inverted from.
    pub y_hat: Tensor<B, 4>,
    pub mu: Tensor<B, 2>,
    pub logvar: Tensor<B, 2>,
}

impl IwtVaeConfig {
    /// Initialize a new [IWT-VAE](IwtVae).
    pub fn init<B: Backend>(&self, device: &B::Device) -> IwtVae<B> {
        let encoder = ConvEncoderConfig::new(2 * self.channels, self.image_size, self.z_dim)
            .with_base_channels(self.base_channels)
            .init(device);

        let patch = self.patch_size();
        let hidden = self.base_channels * 2;
        let mut upsample = Vec::with_capacity(self.num_wt);
        let mut channels_in = hidden;

        for stage in 0..self.num_wt {
            let channels_out = usize::max(hidden >> (stage + 1), 8);
            upsample.push(up_conv([channels_in, channels_out], device));
            channels_in = channels_out;
        }

        IwtVae {
            encoder,
            project: LinearConfig::new(self.z_dim, self.latent_channels * patch * patch)
                .init(device),
            fuse: same_conv([self.latent_channels + self.channels, hidden], device),
            upsample,
            output: same_conv([channels_in, self.channels], device),
            image_size: self.image_size,
            num_wt: self.num_wt,
            z_dim: self.z_dim,
            latent_channels: self.latent_channels,
        }
    }

    /// Spatial size of the known low-frequency patch.
    pub fn patch_size(&self) -> usize {
        self.image_size >> self.num_wt
    }
}

impl<B: Backend> IwtVae<B> {
    /// Encode, sample a latent and decode.
    pub fn forward(
        &self,
        images: Tensor<B, 4>,
        y: Tensor<B, 4>,
        iwt: &InverseWaveletTransform<B>,
    ) -> IwtVaeOutput<B> {
        let (mu, logvar) = self.encode(images, y.clone());
        let z = reparameterize(mu.clone(), logvar.clone());
        let y_hat = self.decode_wavelet(y, z);

        IwtVaeOutput {
            x_hat: iwt.forward(y_hat.clone()),
            y_hat,
            mu,
            logvar,
        }
    }

    /// `(mu, logvar)` of the posterior given the images and their wavelet transform.
    pub fn encode(&self, images: Tensor<B, 4>, y: Tensor<B, 4>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        self.encoder.forward(Tensor::cat(vec![images, y], 1))
    }

    /// Decode a latent into an image, conditioned on the low-frequency patch of `y`.
    pub fn decode(
        &self,
        y: Tensor<B, 4>,
        z: Tensor<B, 2>,
        iwt: &InverseWaveletTransform<B>,
    ) -> Tensor<B, 4> {
        iwt.forward(self.decode_wavelet(y, z))
    }

    /// Decode with a latent drawn from the prior.
    pub fn sample(&self, y: Tensor<B, 4>, iwt: &InverseWaveletTransform<B>) -> Tensor<B, 4> {
        let [batch_size, _, _, _] = y.dims();
        let z = Tensor::random(
            [batch_size, self.z_dim],
            Distribution::Normal(0.0, 1.0),
            &y.device(),
        );

        self.decode(y, z, iwt)
    }

    /// Predicted wavelet image: `y` plus a residual that leaves its low-frequency patch as is.
    pub fn decode_wavelet(&self, y: Tensor<B, 4>, z: Tensor<B, 2>) -> Tensor<B, 4> {
        let [batch_size, channels, _, width] = y.dims();
        let patch = self.image_size >> self.num_wt;
        let factor = 1 << self.num_wt;
        let rows = batch_size * channels * patch;

        // Mean over every `factor x factor` block.
        let low = y
            .clone()
            .reshape([rows, factor, width])
            .mean_dim(1)
            .reshape([rows, patch, factor])
            .mean_dim(2)
            .reshape([batch_size, channels, patch, patch]);
        let latent = self
            .project
            .forward(z)
            .reshape([batch_size, self.latent_channels, patch, patch]);

        let mut x = leaky_relu(
            self.fuse.forward(Tensor::cat(vec![latent, low], 1)),
            NEGATIVE_SLOPE,
        );
        for deconv in self.upsample.iter() {
            x = leaky_relu(deconv.forward(x), NEGATIVE_SLOPE);
        }
        let residual = zero_mask(self.output.forward(x), self.num_wt, 1);

        residual + y
    }

    pub fn num_wt(&self) -> usize {
        self.num_wt
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    /// Reconstruction of the images plus weighted KL term.
    pub fn loss(
        &self,
        images: Tensor<B, 4>,
        output: IwtVaeOutput<B>,
        reconstruction: ReconstructionLoss,
        kl_weight: f64,
    ) -> VaeLoss<B> {
        let reconstruction = reconstruction.forward(output.x_hat, images);
        let kld = kl_divergence(output.mu, output.logvar);

        VaeLoss::new(reconstruction, kld, kl_weight)
    }
}
