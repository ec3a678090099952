//! One epoch of training for every model.

use super::anneal::KlAnnealer;
use super::checkpoint::{save_checkpoint, save_losses};
use super::step::{EpochAnnealing, TrainLoop};
use crate::config::ArtifactDirs;
use crate::data::{FaceBatch, PairedFaceBatch};
use crate::error::Result;
use crate::evaluation::eval_masknet;
use crate::metric::ScalarLogger;
use crate::model::{FullVae, IwtVae, MaskNet, ReconstructionLoss, VaeLoss, WtCnn, WtVae};
use crate::wavelet::{get_3masks, zero_patches, InverseWaveletTransform, WaveletTransform};
use burn::{
    data::dataloader::DataLoader, module::AutodiffModule, optim::Optimizer, prelude::*,
    tensor::backend::AutodiffBackend,
};
use std::{sync::Arc, time::Instant};

/// Learning rate and objective shared by the epoch functions.
#[derive(Clone, Copy, Debug)]
pub struct EpochSettings {
    pub epoch: usize,
    pub lr: f64,
    pub reconstruction: ReconstructionLoss,
}

/// WT-VAE against the analytic transform of its input.
pub fn train_wtvae<B, O, L>(
    train: &mut TrainLoop<L>,
    settings: EpochSettings,
    model: WtVae<B>,
    optim: &mut O,
    loader: &Arc<dyn DataLoader<B, FaceBatch<B>>>,
    wt: &WaveletTransform<B>,
    kl_weight: f64,
) -> Result<(WtVae<B>, f64)>
where
    B: AutodiffBackend,
    O: Optimizer<WtVae<B>, B>,
    L: ScalarLogger,
{
    train.train_epoch(
        settings.epoch,
        model,
        optim,
        settings.lr,
        loader,
        EpochAnnealing::Fixed(kl_weight),
        |model, batch, kl_weight| {
            let output = model.forward(batch.images.clone());
            model.loss(batch.images, output, wt, settings.reconstruction, kl_weight)
        },
    )
}

/// WT-VAE on low resolution images against the transform of their high resolution version,
/// with the KL weight annealed every batch.
pub fn train_wtvae_highres<B, O, L>(
    train: &mut TrainLoop<L>,
    settings: EpochSettings,
    model: WtVae<B>,
    optim: &mut O,
    loader: &Arc<dyn DataLoader<B, PairedFaceBatch<B>>>,
    wt: &WaveletTransform<B>,
    annealer: &mut KlAnnealer,
) -> Result<(WtVae<B>, f64)>
where
    B: AutodiffBackend,
    O: Optimizer<WtVae<B>, B>,
    L: ScalarLogger,
{
    train.train_epoch(
        settings.epoch,
        model,
        optim,
        settings.lr,
        loader,
        EpochAnnealing::PerBatch(annealer),
        |model, batch, kl_weight| {
            let output = model.forward(batch.low);
            model.loss_with_highres(batch.high, output, wt, settings.reconstruction, kl_weight)
        },
    )
}

/// IWT-VAE conditioned on the analytic transform, optionally reduced to its low-frequency
/// patch.
#[allow(clippy::too_many_arguments)]
pub fn train_iwtvae<B, O, L>(
    train: &mut TrainLoop<L>,
    settings: EpochSettings,
    model: IwtVae<B>,
    optim: &mut O,
    loader: &Arc<dyn DataLoader<B, FaceBatch<B>>>,
    wt: &WaveletTransform<B>,
    iwt: &InverseWaveletTransform<B>,
    zero: bool,
    kl_weight: f64,
) -> Result<(IwtVae<B>, f64)>
where
    B: AutodiffBackend,
    O: Optimizer<IwtVae<B>, B>,
    L: ScalarLogger,
{
    train.train_epoch(
        settings.epoch,
        model,
        optim,
        settings.lr,
        loader,
        EpochAnnealing::Fixed(kl_weight),
        |model, batch, kl_weight| {
            let mut y = wt.forward(batch.images.clone()).detach();
            if zero {
                y = zero_patches(y, model.num_wt());
            }

            let output = model.forward(batch.images.clone(), y, iwt);
            model.loss(batch.images, output, settings.reconstruction, kl_weight)
        },
    )
}

/// WT-VAE and IWT-VAE trained jointly.
#[allow(clippy::too_many_arguments)]
pub fn train_fullvae<B, O, L>(
    train: &mut TrainLoop<L>,
    settings: EpochSettings,
    model: FullVae<B>,
    optim: &mut O,
    loader: &Arc<dyn DataLoader<B, FaceBatch<B>>>,
    wt: &WaveletTransform<B>,
    iwt: &InverseWaveletTransform<B>,
    kl_weight: f64,
) -> Result<(FullVae<B>, f64)>
where
    B: AutodiffBackend,
    O: Optimizer<FullVae<B>, B>,
    L: ScalarLogger,
{
    train.train_epoch(
        settings.epoch,
        model,
        optim,
        settings.lr,
        loader,
        EpochAnnealing::Fixed(kl_weight),
        |model, batch, kl_weight| {
            let output = model.forward(batch.images.clone(), iwt);
            model.loss(batch.images, output, wt, settings.reconstruction, kl_weight)
        },
    )
}

/// Wavelet CNN against the analytic transform.
pub fn train_wtcnn<B, O, L>(
    train: &mut TrainLoop<L>,
    settings: EpochSettings,
    model: WtCnn<B>,
    optim: &mut O,
    loader: &Arc<dyn DataLoader<B, FaceBatch<B>>>,
    wt: &WaveletTransform<B>,
) -> Result<(WtCnn<B>, f64)>
where
    B: AutodiffBackend,
    O: Optimizer<WtCnn<B>, B>,
    L: ScalarLogger,
{
    train.train_epoch(
        settings.epoch,
        model,
        optim,
        settings.lr,
        loader,
        EpochAnnealing::Fixed(0.0),
        |model, batch, _| {
            let y = model.forward(batch.images.clone());
            model.loss(batch.images, y, wt, settings.reconstruction)
        },
    )
}

/// Where and how often the mask network dumps its images and weights.
pub struct MaskNetDumps<'a, B: Backend> {
    pub dirs: &'a ArtifactDirs,
    pub save_every: usize,
    pub mask_dim: usize,
    /// Transforms of the inference backend, used for the dumps.
    pub wt: &'a WaveletTransform<B>,
    pub iwt: &'a InverseWaveletTransform<B>,
}

/// One pass of the mask network over the data, iteration based: every `save_every` global
/// steps the current masks, images and weights are saved. Checkpoints are labelled with the
/// number of completed iterations and saved along with the loss history.
pub fn train_masknet<B, O, L>(
    train: &mut TrainLoop<L>,
    lr: f64,
    mut model: MaskNet<B>,
    optim: &mut O,
    loader: &Arc<dyn DataLoader<B, FaceBatch<B>>>,
    wt: &WaveletTransform<B>,
    dumps: &MaskNetDumps<'_, B::InnerBackend>,
) -> Result<(MaskNet<B>, f64)>
where
    B: AutodiffBackend,
    O: Optimizer<MaskNet<B>, B>,
    L: ScalarLogger,
{
    let num_items = loader.num_items();
    let mut total_loss = 0.0;

    for batch in loader.iter() {
        let start = Instant::now();
        let itr = train.step();

        let y = wt.forward(batch.images.clone()).detach();
        let input = model.input_from_wavelet(y.clone());
        let real = get_3masks(y, dumps.mask_dim);
        let loss = VaeLoss::reconstruction_only(model.loss(model.forward(input), real));

        let (updated, values) = train.optimize(model, optim, lr, loss, 0.0)?;
        model = updated;
        total_loss += values.total;

        let itr_time = start.elapsed().as_secs_f64();
        train
            .logger_mut()
            .log_scalar("train_itr_time", itr_time, itr)?;

        if itr % usize::max(dumps.save_every, 1) == 0 {
            log::info!("Iteration {itr}: loss {:.6} ({itr_time:.3}s)", values.total);

            let tag = format!("itr{itr}");
            eval_masknet(
                &tag,
                &model.valid(),
                batch.images.inner(),
                dumps.wt,
                dumps.iwt,
                dumps.mask_dim,
                dumps.dirs,
            )?;
            save_checkpoint(&dumps.dirs.checkpoints, "masknet", train.step(), &model, optim)?;
            save_losses(&dumps.dirs.losses_file(), train.losses())?;
            train.logger_mut().flush()?;
        }
    }

    Ok((model, total_loss / usize::max(num_items, 1) as f64))
}
