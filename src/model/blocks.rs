use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        Linear, LinearConfig, PaddingConfig2d,
    },
    prelude::*,
    tensor::{activation::leaky_relu, Distribution},
};

pub(crate) const NEGATIVE_SLOPE: f64 = 0.2;

/// Spatial size of the feature map at the bottom of the encoder / top of the decoder.
const BOTTLENECK_SIZE: usize = 4;

/// Number of stride-2 stages needed to bring `image_size` down to the bottleneck.
pub(crate) fn num_stages(image_size: usize) -> usize {
    let mut size = image_size;
    let mut stages = 0;

    while size > BOTTLENECK_SIZE {
        size /= 2;
        stages += 1;
    }

    stages
}

fn stage_channels(base: usize, max: usize, stage: usize) -> usize {
    usize::min(base << stage, max)
}

/// Kernel 4, stride 2, padding 1: halves the spatial size.
pub(crate) fn down_conv<B: Backend>(
    channels: [usize; 2],
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new(channels, [4, 4])
        .with_stride([2, 2])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .init(device)
}

/// Kernel 4, stride 2, padding 1: doubles the spatial size.
pub(crate) fn up_conv<B: Backend>(channels: [usize; 2], device: &B::Device) -> ConvTranspose2d<B> {
    ConvTranspose2dConfig::new(channels, [4, 4])
        .with_stride([2, 2])
        .with_padding([1, 1])
        .init(device)
}

/// Kernel 3, stride 1, padding 1: keeps the spatial size.
pub(crate) fn same_conv<B: Backend>(channels: [usize; 2], device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new(channels, [3, 3])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .init(device)
}

/// Configuration to create a [convolutional gaussian encoder](ConvEncoder).
#[derive(Config, Debug)]
pub struct ConvEncoderConfig {
    /// Number of input channels.
    pub in_channels: usize,
    /// Spatial size of the (square) input.
    pub image_size: usize,
    /// Size of the latent space.
    pub z_dim: usize,
    #[config(default = 32)]
    pub base_channels: usize,
    #[config(default = 256)]
    pub max_channels: usize,
}

/// Strided convolutions followed by two linear heads producing `mu` and `logvar`.
#[derive(Module, Debug)]
pub struct ConvEncoder<B: Backend> {
    convs: Vec<Conv2d<B>>,
    pub(crate) mu: Linear<B>,
    pub(crate) logvar: Linear<B>,
}

impl ConvEncoderConfig {
    /// Initialize a new [encoder](ConvEncoder).
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvEncoder<B> {
        let stages = num_stages(self.image_size);
        let mut convs = Vec::with_capacity(stages);
        let mut channels_in = self.in_channels;

        for stage in 0..stages {
            let channels_out = stage_channels(self.base_channels, self.max_channels, stage);
            convs.push(down_conv([channels_in, channels_out], device));
            channels_in = channels_out;
        }

        let bottleneck = self.image_size >> stages;
        let features = channels_in * bottleneck * bottleneck;

        ConvEncoder {
            convs,
            mu: LinearConfig::new(features, self.z_dim).init(device),
            logvar: LinearConfig::new(features, self.z_dim).init(device),
        }
    }
}

impl<B: Backend> ConvEncoder<B> {
    /// # Shapes
    ///
    /// - input: `[batch_size, in_channels, image_size, image_size]`
    /// - output: `([batch_size, z_dim], [batch_size, z_dim])`
    pub fn forward(&self, input: Tensor<B, 4>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let mut x = input;

        for conv in self.convs.iter() {
            x = leaky_relu(conv.forward(x), NEGATIVE_SLOPE);
        }

        let x: Tensor<B, 2> = x.flatten(1, 3);

        (self.mu.forward(x.clone()), self.logvar.forward(x))
    }
}

/// Configuration to create a [convolutional decoder](ConvDecoder).
#[derive(Config, Debug)]
pub struct ConvDecoderConfig {
    /// Size of the latent space.
    pub z_dim: usize,
    /// Number of output channels.
    pub out_channels: usize,
    /// Spatial size of the (square) output.
    pub image_size: usize,
    #[config(default = 32)]
    pub base_channels: usize,
    #[config(default = 256)]
    pub max_channels: usize,
}

/// Linear projection to a small feature map followed by transposed convolutions.
#[derive(Module, Debug)]
pub struct ConvDecoder<B: Backend> {
    project: Linear<B>,
    deconvs: Vec<ConvTranspose2d<B>>,
    output: Conv2d<B>,
    channels: usize,
    bottleneck: usize,
}

impl ConvDecoderConfig {
    /// Initialize a new [decoder](ConvDecoder).
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvDecoder<B> {
        let stages = num_stages(self.image_size);
        let bottleneck = self.image_size >> stages;
        let channels = stage_channels(
            self.base_channels,
            self.max_channels,
            stages.saturating_sub(1),
        );
        let mut deconvs = Vec::with_capacity(stages);
        let mut channels_in = channels;

        for stage in (0..stages).rev() {
            let channels_out = stage_channels(self.base_channels, self.max_channels, stage);
            deconvs.push(up_conv([channels_in, channels_out], device));
            channels_in = channels_out;
        }

        ConvDecoder {
            project: LinearConfig::new(self.z_dim, channels * bottleneck * bottleneck)
                .init(device),
            deconvs,
            output: same_conv([channels_in, self.out_channels], device),
            channels,
            bottleneck,
        }
    }
}

impl<B: Backend> ConvDecoder<B> {
    /// # Shapes
    ///
    /// - input: `[batch_size, z_dim]`
    /// - output: `[batch_size, out_channels, image_size, image_size]`
    pub fn forward(&self, z: Tensor<B, 2>) -> Tensor<B, 4> {
        let [batch_size, _] = z.dims();
        let mut x = self.project.forward(z).reshape([
            batch_size,
            self.channels,
            self.bottleneck,
            self.bottleneck,
        ]);

        for deconv in self.deconvs.iter() {
            x = leaky_relu(deconv.forward(x), NEGATIVE_SLOPE);
        }

        self.output.forward(x)
    }
}

/// Sample `z = mu + eps * exp(0.5 * logvar)`.
pub fn reparameterize<B: Backend>(mu: Tensor<B, 2>, logvar: Tensor<B, 2>) -> Tensor<B, 2> {
    let std = logvar.mul_scalar(0.5).exp();
    let eps = Tensor::random(std.shape(), Distribution::Normal(0.0, 1.0), &std.device());

    mu + eps * std
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestBackend;

    #[test]
    fn stages_down_to_bottleneck() {
        assert_eq!(num_stages(64), 4);
        assert_eq!(num_stages(128), 5);
        assert_eq!(num_stages(8), 1);
        assert_eq!(num_stages(4), 0);
    }

    #[test]
    fn encoder_output_shapes() {
        let device = Default::default();
        let encoder = ConvEncoderConfig::new(3, 16, 10).init::<TestBackend>(&device);
        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 16, 16], &device);

        let (mu, logvar) = encoder.forward(input);

        assert_eq!(mu.dims(), [2, 10]);
        assert_eq!(logvar.dims(), [2, 10]);
    }

    #[test]
    fn decoder_output_shape() {
        let device = Default::default();
        let decoder = ConvDecoderConfig::new(10, 3, 16).init::<TestBackend>(&device);
        let z = Tensor::<TestBackend, 2>::zeros([2, 10], &device);

        assert_eq!(decoder.forward(z).dims(), [2, 3, 16, 16]);
    }

    #[test]
    fn reparameterize_with_zero_variance_returns_mean() {
        let device = Default::default();
        let mu = Tensor::<TestBackend, 2>::ones([2, 4], &device);
        let logvar = Tensor::<TestBackend, 2>::full([2, 4], -100.0, &device);

        let z = reparameterize(mu, logvar).into_data().to_vec::<f32>().unwrap();

        for value in z {
            assert!((value - 1.0).abs() < 1e-5);
        }
    }
}
