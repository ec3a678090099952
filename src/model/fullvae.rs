use super::iwtvae::{IwtVae, IwtVaeConfig, IwtVaeOutput};
use super::loss::{ReconstructionLoss, VaeLoss};
use super::wtvae::{WtVae, WtVaeConfig, WtVaeOutput};
use crate::wavelet::{zero_patches, InverseWaveletTransform, WaveletTransform};
use burn::prelude::*;

/// Configuration to create a [full VAE](FullVae).
#[derive(Config, Debug)]
pub struct FullVaeConfig {
    pub wt: WtVaeConfig,
    pub iwt: IwtVaeConfig,
}

/// WT-VAE and IWT-VAE trained jointly: the IWT-VAE is conditioned on the low-frequency patch
/// predicted by the WT-VAE instead of the analytic transform.
#[derive(Module, Debug)]
pub struct FullVae<B: Backend> {
    pub wt_model: WtVae<B>,
    pub iwt_model: IwtVae<B>,
}

/// Output of the [full VAE](FullVae) forward pass.
#[derive(Clone, Debug)]
pub struct FullVaeOutput<B: Backend> {
    pub wt: WtVaeOutput<B>,
    pub iwt: IwtVaeOutput<B>,
}

impl FullVaeConfig {
    /// Initialize a new [full VAE](FullVae).
    pub fn init<B: Backend>(&self, device: &B::Device) -> FullVae<B> {
        FullVae {
            wt_model: self.wt.init(device),
            iwt_model: self.iwt.init(device),
        }
    }
}

impl<B: Backend> FullVae<B> {
    pub fn forward(
        &self,
        images: Tensor<B, 4>,
        iwt: &InverseWaveletTransform<B>,
    ) -> FullVaeOutput<B> {
        let wt = self.wt_model.forward(images.clone());
        let y = zero_patches(wt.y.clone(), self.iwt_model.num_wt());
        let iwt = self.iwt_model.forward(images, y, iwt);

        FullVaeOutput { wt, iwt }
    }

    /// Sum of both objectives.
    pub fn loss(
        &self,
        images: Tensor<B, 4>,
        output: FullVaeOutput<B>,
        transform: &WaveletTransform<B>,
        reconstruction: ReconstructionLoss,
        kl_weight: f64,
    ) -> VaeLoss<B> {
        let wt_loss = self.wt_model.loss(
            images.clone(),
            output.wt,
            transform,
            reconstruction,
            kl_weight,
        );
        let iwt_loss = self
            .iwt_model
            .loss(images, output.iwt, reconstruction, kl_weight);

        wt_loss.sum(iwt_loss)
    }
}
