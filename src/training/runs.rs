//! Complete runs: datasets, model, optimizer, resume, epochs, evaluation and checkpoints.

use super::anneal::KlAnnealer;
use super::checkpoint::{load_checkpoint, load_losses, load_model, save_checkpoint, save_losses};
use super::step::{LossScalars, TrainLoop};
use super::trainers::{
    train_fullvae, train_iwtvae, train_masknet, train_wtcnn, train_wtvae, train_wtvae_highres,
    EpochSettings, MaskNetDumps,
};
use crate::config::{ArtifactDirs, ExperimentConfig};
use crate::data::{
    subset, FaceBatch, FaceBatcher, FaceImageDataset, PairedFaceBatch, PairedFaceBatcher,
    PairedFaceDataset,
};
use crate::error::{Error, Result};
use crate::evaluation::{eval_fullvae, eval_iwtvae, eval_wtcnn, eval_wtvae};
use crate::metric::FileScalarLogger;
use crate::model::{
    FullVae, FullVaeConfig, IwtVae, IwtVaeConfig, LossValues, MaskNet, MaskNetConfig, WtCnn,
    WtCnnConfig, WtVae, WtVaeConfig,
};
use crate::wavelet::{FilterBank, InverseWaveletTransform, WaveletTransform};
use burn::{
    data::{
        dataloader::{batcher::Batcher, DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    module::AutodiffModule,
    optim::{AdamConfig, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use std::{path::Path, sync::Arc};

/// Create the run folders and save the configuration next to them.
pub fn prepare_run(config: &ExperimentConfig) -> Result<ArtifactDirs> {
    let dirs = ArtifactDirs::create(config.run_dir())?;
    config.save(dirs.config_file())?;

    Ok(dirs)
}

fn transforms<B: Backend>(
    config: &ExperimentConfig,
    levels: usize,
    device: &B::Device,
) -> (WaveletTransform<B>, InverseWaveletTransform<B>) {
    (
        WaveletTransform::new(FilterBank::analysis(config.wavelet, device), levels),
        InverseWaveletTransform::new(FilterBank::synthesis(config.wavelet, device), levels),
    )
}

fn face_dataset(config: &ExperimentConfig) -> Result<FaceImageDataset> {
    FaceImageDataset::with_samples(
        &config.root_dir,
        config.image_size,
        config.train_samples,
        config.seed,
    )
}

fn face_loader<B: Backend>(
    config: &ExperimentConfig,
    dataset: FaceImageDataset,
    device: &B::Device,
) -> Arc<dyn DataLoader<B, FaceBatch<B>>> {
    DataLoaderBuilder::new(FaceBatcher)
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .set_device(device.clone())
        .build(dataset)
}

/// The same `sample_size` images at every epoch.
fn sample_images<B: Backend>(
    config: &ExperimentConfig,
    dataset: &FaceImageDataset,
    device: &B::Device,
) -> Result<Tensor<B, 4>> {
    let items = subset(dataset, config.sample_size, config.seed);
    if items.is_empty() {
        return Err(Error::EmptyDataset(config.root_dir.clone().into()));
    }

    let batch: FaceBatch<B> = FaceBatcher.batch(items.iter().collect(), device);

    Ok(batch.images)
}

/// How the checkpoints of a run are labelled.
#[derive(Clone, Copy, Debug)]
enum CheckpointLabel {
    Epoch,
    /// Completed iterations, `per_epoch` of them in a full epoch.
    Iteration { per_epoch: usize },
}

/// Resume point of a run.
struct Resume<M, O> {
    model: M,
    optim: O,
    losses: Vec<LossValues>,
    first_epoch: usize,
}

/// Load the checkpoint named by the configuration, or start from scratch.
///
/// Runs resumed from an iteration start over at the next epoch, with the loss history cut at
/// that iteration.
fn resume_or_start<B, M, O>(
    config: &ExperimentConfig,
    name: &str,
    label: CheckpointLabel,
    model: M,
    optim: O,
    device: &B::Device,
) -> Result<Resume<M, O>>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    let Some(checkpoint) = &config.checkpoint else {
        return Ok(Resume {
            model,
            optim,
            losses: Vec::new(),
            first_epoch: 1,
        });
    };
    let position = config.checkpoint_epoch.ok_or_else(|| {
        Error::Config(format!("Checkpoint `{checkpoint}` given without an epoch"))
    })?;

    let previous = ArtifactDirs::new(checkpoint);
    let (model, optim) =
        load_checkpoint(&previous.checkpoints, name, position, model, optim, device)?;
    let mut losses = if previous.losses_file().is_file() {
        load_losses(&previous.losses_file())?
    } else {
        log::warn!("No loss history in {}", previous.root.display());
        Vec::new()
    };

    let first_epoch = match label {
        CheckpointLabel::Epoch => position + 1,
        CheckpointLabel::Iteration { per_epoch } => {
            if losses.len() < position {
                return Err(Error::Config(format!(
                    "The loss history of `{checkpoint}` stops at iteration {}, before {position}",
                    losses.len()
                )));
            }
            losses.truncate(position);
            position / usize::max(per_epoch, 1) + 1
        }
    };

    Ok(Resume {
        model,
        optim,
        losses,
        first_epoch,
    })
}

fn train_loop(
    config: &ExperimentConfig,
    dirs: &ArtifactDirs,
    losses: Vec<LossValues>,
) -> Result<TrainLoop<FileScalarLogger>> {
    let logger = FileScalarLogger::new(&dirs.runs)?;

    Ok(TrainLoop::new(logger, config.grad_clip, config.log_interval).with_history(losses))
}

fn log_num_params<B: Backend, M: Module<B>>(name: &str, model: &M) {
    log::info!("{name} has {} trainable parameters", model.num_params());
}

/// Number of levels bringing `from` down to `to`, at least one.
fn levels_between(from: usize, to: usize) -> Result<usize> {
    if to == 0 || from <= to || from % to != 0 || !(from / to).is_power_of_two() {
        return Err(Error::InvalidShape(format!(
            "{from} can't be brought down to {to} by wavelet levels"
        )));
    }

    Ok((from / to).trailing_zeros() as usize)
}

/// Train the [WT-VAE](WtVae) against the transform of its input.
pub fn run_wtvae<B: AutodiffBackend>(config: &ExperimentConfig, device: B::Device) -> Result<()> {
    let dirs = prepare_run(config)?;
    B::seed(&device, config.seed);

    let loader = face_loader::<B>(config, face_dataset(config)?, &device);

    let model = WtVaeConfig::new()
        .with_image_size(config.image_size)
        .with_output_size(config.image_size)
        .with_z_dim(config.z_dim)
        .with_base_channels(config.base_channels)
        .init::<B>(&device);
    let optim = AdamConfig::new().init::<B, WtVae<B>>();
    let resume =
        resume_or_start(config, "wtvae", CheckpointLabel::Epoch, model, optim, &device)?;
    let (mut model, mut optim) = (resume.model, resume.optim);
    log_num_params("WT-VAE", &model);

    let mut train = train_loop(config, &dirs, resume.losses)?;
    let (wt, _) = transforms::<B>(config, config.num_wt, &device);
    let (_, iwt) = transforms::<B::InnerBackend>(config, config.num_wt, &device);

    for epoch in resume.first_epoch..=config.num_epochs {
        let settings = EpochSettings {
            epoch,
            lr: config.lr,
            reconstruction: config.reconstruction,
        };
        (model, _) = train_wtvae(
            &mut train,
            settings,
            model,
            &mut optim,
            &loader,
            &wt,
            config.kl_weight,
        )?;

        eval_wtvae(epoch, &model.valid(), &iwt, config.sample_size, &dirs, &device)?;
        save_checkpoint(&dirs.checkpoints, "wtvae", epoch, &model, &optim)?;
    }

    save_losses(&dirs.losses_file(), train.losses())
}

/// Train the [WT-VAE](WtVae) on `image_size` images against the low-frequency patch of the
/// transform of their `highres_size` version.
pub fn run_wtvae_highres<B: AutodiffBackend>(
    config: &ExperimentConfig,
    device: B::Device,
) -> Result<()> {
    let levels = levels_between(config.highres_size, config.image_size)?;
    let dirs = prepare_run(config)?;
    B::seed(&device, config.seed);

    let dataset = PairedFaceDataset::with_samples(
        &config.root_dir,
        config.image_size,
        config.highres_size,
        config.train_samples,
        config.seed,
    )?;
    let loader: Arc<dyn DataLoader<B, PairedFaceBatch<B>>> =
        DataLoaderBuilder::new(PairedFaceBatcher)
            .batch_size(config.batch_size)
            .shuffle(config.seed)
            .num_workers(config.num_workers)
            .set_device(device.clone())
            .build(dataset);
    let batches_per_epoch = loader.num_items().div_ceil(usize::max(config.batch_size, 1));

    let model = WtVaeConfig::new()
        .with_image_size(config.image_size)
        .with_output_size(config.image_size)
        .with_z_dim(config.z_dim)
        .with_base_channels(config.base_channels)
        .init::<B>(&device);
    let optim = AdamConfig::new().init::<B, WtVae<B>>();
    let resume =
        resume_or_start(config, "wtvae_highres", CheckpointLabel::Epoch, model, optim, &device)?;
    let (mut model, mut optim) = (resume.model, resume.optim);
    log_num_params("WT-VAE", &model);

    let mut train = train_loop(config, &dirs, resume.losses)?;
    let mut annealer = KlAnnealer::per_batch(config.kl_start, config.kl_warmup, batches_per_epoch);
    for _ in 0..train.step() {
        annealer.step();
    }

    let (wt, _) = transforms::<B>(config, levels, &device);
    let (_, iwt) = transforms::<B::InnerBackend>(config, config.num_wt, &device);

    for epoch in resume.first_epoch..=config.num_epochs {
        let settings = EpochSettings {
            epoch,
            lr: config.lr,
            reconstruction: config.reconstruction,
        };
        (model, _) = train_wtvae_highres(
            &mut train,
            settings,
            model,
            &mut optim,
            &loader,
            &wt,
            &mut annealer,
        )?;
        log::info!("KL weight after epoch {epoch}: {:.4}", annealer.weight());

        eval_wtvae(epoch, &model.valid(), &iwt, config.sample_size, &dirs, &device)?;
        save_checkpoint(&dirs.checkpoints, "wtvae_highres", epoch, &model, &optim)?;
    }

    save_losses(&dirs.losses_file(), train.losses())
}

fn iwtvae_config(config: &ExperimentConfig) -> IwtVaeConfig {
    IwtVaeConfig::new()
        .with_image_size(config.image_size)
        .with_num_wt(config.num_wt)
        .with_z_dim(config.z_dim)
        .with_base_channels(config.base_channels)
}

/// Train the [IWT-VAE](IwtVae) conditioned on the analytic transform, with the KL weight
/// annealed every epoch.
pub fn run_iwtvae<B: AutodiffBackend>(config: &ExperimentConfig, device: B::Device) -> Result<()> {
    let dirs = prepare_run(config)?;
    B::seed(&device, config.seed);

    let dataset = face_dataset(config)?;
    let samples = sample_images::<B::InnerBackend>(config, &dataset, &device)?;
    let loader = face_loader::<B>(config, dataset, &device);

    let model = iwtvae_config(config).init::<B>(&device);
    let optim = AdamConfig::new().init::<B, IwtVae<B>>();
    let resume =
        resume_or_start(config, "iwtvae", CheckpointLabel::Epoch, model, optim, &device)?;
    let (mut model, mut optim) = (resume.model, resume.optim);
    log_num_params("IWT-VAE", &model);

    let mut train = train_loop(config, &dirs, resume.losses)?;
    let mut annealer = KlAnnealer::per_epoch(config.kl_start, config.kl_warmup);
    for _ in 1..resume.first_epoch {
        annealer.step();
    }

    let (wt, iwt) = transforms::<B>(config, config.num_wt, &device);
    let (wt_valid, iwt_valid) = transforms::<B::InnerBackend>(config, config.num_wt, &device);

    for epoch in resume.first_epoch..=config.num_epochs {
        let kl_weight = annealer.step();
        let settings = EpochSettings {
            epoch,
            lr: config.lr,
            reconstruction: config.reconstruction,
        };
        (model, _) = train_iwtvae(
            &mut train,
            settings,
            model,
            &mut optim,
            &loader,
            &wt,
            &iwt,
            config.zero,
            kl_weight,
        )?;

        eval_iwtvae(
            epoch,
            &model.valid(),
            samples.clone(),
            &wt_valid,
            &iwt_valid,
            config.zero,
            &dirs,
        )?;
        save_checkpoint(&dirs.checkpoints, "iwtvae", epoch, &model, &optim)?;
    }

    save_losses(&dirs.losses_file(), train.losses())
}

/// Train the [WT-VAE](WtVae) and the [IWT-VAE](IwtVae) jointly.
pub fn run_fullvae<B: AutodiffBackend>(config: &ExperimentConfig, device: B::Device) -> Result<()> {
    let dirs = prepare_run(config)?;
    B::seed(&device, config.seed);

    let dataset = face_dataset(config)?;
    let samples = sample_images::<B::InnerBackend>(config, &dataset, &device)?;
    let loader = face_loader::<B>(config, dataset, &device);

    let wt_config = WtVaeConfig::new()
        .with_image_size(config.image_size)
        .with_output_size(config.image_size)
        .with_z_dim(config.z_dim)
        .with_base_channels(config.base_channels);
    let model = FullVaeConfig::new(wt_config, iwtvae_config(config)).init::<B>(&device);
    let optim = AdamConfig::new().init::<B, FullVae<B>>();
    let resume =
        resume_or_start(config, "fullvae", CheckpointLabel::Epoch, model, optim, &device)?;
    let (mut model, mut optim) = (resume.model, resume.optim);
    log_num_params("Full VAE", &model);

    let mut train = train_loop(config, &dirs, resume.losses)?;
    let (wt, iwt) = transforms::<B>(config, config.num_wt, &device);
    let (_, iwt_valid) = transforms::<B::InnerBackend>(config, config.num_wt, &device);

    for epoch in resume.first_epoch..=config.num_epochs {
        let settings = EpochSettings {
            epoch,
            lr: config.lr,
            reconstruction: config.reconstruction,
        };
        (model, _) = train_fullvae(
            &mut train,
            settings,
            model,
            &mut optim,
            &loader,
            &wt,
            &iwt,
            config.kl_weight,
        )?;

        eval_fullvae(epoch, &model.valid(), samples.clone(), &iwt_valid, &dirs)?;
        save_checkpoint(&dirs.checkpoints, "fullvae", epoch, &model, &optim)?;
    }

    save_losses(&dirs.losses_file(), train.losses())
}

/// Train the [wavelet CNN](WtCnn) against the analytic transform.
pub fn run_wtcnn<B: AutodiffBackend>(config: &ExperimentConfig, device: B::Device) -> Result<()> {
    let dirs = prepare_run(config)?;
    B::seed(&device, config.seed);

    let dataset = face_dataset(config)?;
    let samples = sample_images::<B::InnerBackend>(config, &dataset, &device)?;
    let loader = face_loader::<B>(config, dataset, &device);

    let model = WtCnnConfig::new()
        .with_hidden_channels(config.base_channels)
        .init::<B>(&device);
    let optim = AdamConfig::new().init::<B, WtCnn<B>>();
    let resume =
        resume_or_start(config, "wtcnn", CheckpointLabel::Epoch, model, optim, &device)?;
    let (mut model, mut optim) = (resume.model, resume.optim);
    log_num_params("WT-CNN", &model);

    let mut train =
        train_loop(config, &dirs, resume.losses)?.with_scalars(LossScalars::Reconstruction);
    let (wt, _) = transforms::<B>(config, config.num_wt, &device);
    let (wt_valid, _) = transforms::<B::InnerBackend>(config, config.num_wt, &device);

    for epoch in resume.first_epoch..=config.num_epochs {
        let settings = EpochSettings {
            epoch,
            lr: config.lr,
            reconstruction: config.reconstruction,
        };
        (model, _) = train_wtcnn(&mut train, settings, model, &mut optim, &loader, &wt)?;

        eval_wtcnn(epoch, &model.valid(), samples.clone(), &wt_valid, &dirs)?;
        save_checkpoint(&dirs.checkpoints, "wtcnn", epoch, &model, &optim)?;
    }

    save_losses(&dirs.losses_file(), train.losses())
}

/// Train the [mask network](MaskNet), dumping masks and weights every `save_every` iterations.
pub fn run_masknet<B: AutodiffBackend>(config: &ExperimentConfig, device: B::Device) -> Result<()> {
    let patch_size = config.image_size >> config.num_wt;
    if patch_size == 0 || config.mask_dim != 2 * patch_size {
        return Err(Error::InvalidShape(format!(
            "Mask dim {} should be twice the {}x{} low-frequency patch of a {} image with {} \
             wavelet levels",
            config.mask_dim, patch_size, patch_size, config.image_size, config.num_wt
        )));
    }

    let dirs = prepare_run(config)?;
    B::seed(&device, config.seed);

    let loader = face_loader::<B>(config, face_dataset(config)?, &device);
    let per_epoch = loader.num_items().div_ceil(usize::max(config.batch_size, 1));

    let model = MaskNetConfig::new()
        .with_mask_dim(config.mask_dim)
        .with_patch_size(patch_size)
        .with_base_channels(config.base_channels)
        .init::<B>(&device);
    let optim = AdamConfig::new().init::<B, MaskNet<B>>();
    let label = CheckpointLabel::Iteration { per_epoch };
    let resume = resume_or_start(config, "masknet", label, model, optim, &device)?;
    let (mut model, mut optim) = (resume.model, resume.optim);
    log_num_params("Mask network", &model);

    let mut train = train_loop(config, &dirs, resume.losses)?.with_scalars(LossScalars::TrainLoss);
    let (wt, _) = transforms::<B>(config, config.num_wt, &device);
    let (wt_valid, iwt_valid) = transforms::<B::InnerBackend>(config, config.num_wt, &device);
    let dumps = MaskNetDumps {
        dirs: &dirs,
        save_every: config.save_every,
        mask_dim: config.mask_dim,
        wt: &wt_valid,
        iwt: &iwt_valid,
    };

    for epoch in resume.first_epoch..=config.num_epochs {
        let (updated, average) =
            train_masknet(&mut train, config.lr, model, &mut optim, &loader, &wt, &dumps)?;
        model = updated;
        log::info!("====> Epoch: {epoch} Average loss: {average:.4}");
    }

    save_checkpoint(&dirs.checkpoints, "masknet", train.step(), &model, &optim)?;
    save_losses(&dirs.losses_file(), train.losses())
}

/// Evaluate the [IWT-VAE](IwtVae) weights of a checkpoint, the images are labelled with the
/// checkpoint epoch.
pub fn run_eval_iwtvae<B: Backend>(config: &ExperimentConfig, device: B::Device) -> Result<()> {
    let (Some(checkpoint), Some(epoch)) = (&config.checkpoint, config.checkpoint_epoch) else {
        return Err(Error::Config(
            "Evaluation needs both a checkpoint and a checkpoint epoch".to_string(),
        ));
    };

    let dirs = prepare_run(config)?;
    B::seed(&device, config.seed);

    let model = iwtvae_config(config).init::<B>(&device);
    let checkpoints = Path::new(checkpoint).join("checkpoints");
    let model: IwtVae<B> = load_model(&checkpoints, "iwtvae", epoch, model, &device)?;

    let dataset = face_dataset(config)?;
    let samples = sample_images::<B>(config, &dataset, &device)?;
    let (wt, iwt) = transforms::<B>(config, config.num_wt, &device);

    eval_iwtvae(epoch, &model, samples, &wt, &iwt, config.zero, &dirs)?;
    log::info!("Evaluation images saved in {}", dirs.images.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_between_powers_of_two() {
        assert_eq!(levels_between(512, 128).unwrap(), 2);
        assert_eq!(levels_between(128, 64).unwrap(), 1);
        assert!(matches!(levels_between(64, 64), Err(Error::InvalidShape(_))));
        assert!(matches!(
            levels_between(96, 64),
            Err(Error::InvalidShape(_))
        ));
        assert!(matches!(
            levels_between(64, 128),
            Err(Error::InvalidShape(_))
        ));
    }

    #[test]
    fn evaluation_without_checkpoint_is_rejected() {
        let config = ExperimentConfig::new();

        let result = run_eval_iwtvae::<crate::TestBackend>(&config, Default::default());

        assert!(matches!(result, Err(Error::Config(_))));
    }
}
