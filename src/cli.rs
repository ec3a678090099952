use crate::config::{ArtifactDirs, ExperimentConfig};
use crate::error::Result;
use crate::logging::install_logger;
use crate::model::ReconstructionLoss;
use crate::training::{
    run_eval_iwtvae, run_fullvae, run_iwtvae, run_masknet, run_wtcnn, run_wtvae,
    run_wtvae_highres,
};
use crate::wavelet::Wavelet;
use burn::{config::Config, tensor::backend::AutodiffBackend};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Wavelet-domain VAEs on face images.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Train the WT-VAE on 64x64 images.
    TrainWtvae(ExperimentArgs),
    /// Train the WT-VAE on 128x128 images against the transform of their 512x512 version.
    TrainWtvaeHighres(ExperimentArgs),
    /// Train the IWT-VAE on 512x512 images.
    TrainIwtvae(ExperimentArgs),
    /// Train the WT-VAE and the IWT-VAE jointly.
    TrainFullvae(ExperimentArgs),
    /// Train the wavelet CNN.
    TrainWtcnn(ExperimentArgs),
    /// Train the mask network on 256x256 images.
    TrainMasknet(ExperimentArgs),
    /// Save the evaluation images of an IWT-VAE checkpoint.
    EvalIwtvae(ExperimentArgs),
}

/// Overrides of the experiment configuration.
#[derive(Args, Debug, Clone, Default)]
pub struct ExperimentArgs {
    /// JSON configuration to start from instead of the command defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub root_dir: Option<String>,
    #[arg(long)]
    pub artifact_dir: Option<String>,
    #[arg(long)]
    pub run_name: Option<String>,
    #[arg(long)]
    pub image_size: Option<usize>,
    #[arg(long)]
    pub highres_size: Option<usize>,
    #[arg(long)]
    pub batch_size: Option<usize>,
    #[arg(long)]
    pub num_epochs: Option<usize>,
    #[arg(long)]
    pub lr: Option<f64>,
    #[arg(long)]
    pub z_dim: Option<usize>,
    #[arg(long)]
    pub base_channels: Option<usize>,
    #[arg(long)]
    pub num_wt: Option<usize>,
    #[arg(long)]
    pub kl_weight: Option<f64>,
    #[arg(long)]
    pub kl_start: Option<f64>,
    #[arg(long)]
    pub kl_warmup: Option<usize>,
    #[arg(long)]
    pub grad_clip: Option<f64>,
    #[arg(long)]
    pub log_interval: Option<usize>,
    #[arg(long)]
    pub seed: Option<u64>,
    /// Keep only the low-frequency patch of the wavelet image given to the IWT-VAE.
    #[arg(long, default_value_t = false)]
    pub zero: bool,
    #[arg(long)]
    pub save_every: Option<usize>,
    #[arg(long)]
    pub mask_dim: Option<usize>,
    #[arg(long)]
    pub num_workers: Option<usize>,
    #[arg(long)]
    pub sample_size: Option<usize>,
    /// `haar` or `bior2.2`.
    #[arg(long)]
    pub wavelet: Option<Wavelet>,
    /// `mse` or `bce`.
    #[arg(long)]
    pub reconstruction: Option<ReconstructionLoss>,
    #[arg(long)]
    pub train_samples: Option<usize>,
    /// Run folder to resume from, or to evaluate.
    #[arg(long)]
    pub checkpoint: Option<String>,
    #[arg(long)]
    pub checkpoint_epoch: Option<usize>,
}

macro_rules! override_fields {
    ($config:ident, $args:ident, [$($field:ident),*]) => {
        $(
            if let Some(value) = $args.$field.clone() {
                $config.$field = value;
            }
        )*
    };
}

impl ExperimentArgs {
    /// Apply every given flag on top of `config`.
    pub fn apply(&self, mut config: ExperimentConfig) -> ExperimentConfig {
        override_fields!(
            config,
            self,
            [
                root_dir,
                artifact_dir,
                run_name,
                image_size,
                highres_size,
                batch_size,
                num_epochs,
                lr,
                z_dim,
                base_channels,
                num_wt,
                kl_weight,
                kl_start,
                kl_warmup,
                grad_clip,
                log_interval,
                seed,
                save_every,
                mask_dim,
                num_workers,
                sample_size,
                wavelet,
                reconstruction
            ]
        );

        if self.zero {
            config.zero = true;
        }
        if self.train_samples.is_some() {
            config.train_samples = self.train_samples;
        }
        if self.checkpoint.is_some() {
            config.checkpoint = self.checkpoint.clone();
        }
        if self.checkpoint_epoch.is_some() {
            config.checkpoint_epoch = self.checkpoint_epoch;
        }

        config
    }
}

impl Command {
    pub fn args(&self) -> &ExperimentArgs {
        match self {
            Command::TrainWtvae(args)
            | Command::TrainWtvaeHighres(args)
            | Command::TrainIwtvae(args)
            | Command::TrainFullvae(args)
            | Command::TrainWtcnn(args)
            | Command::TrainMasknet(args)
            | Command::EvalIwtvae(args) => args,
        }
    }

    /// Configuration used when no `--config` file is given.
    pub fn defaults(&self) -> ExperimentConfig {
        let config = ExperimentConfig::new();

        match self {
            Command::TrainWtvae(_) => config
                .with_run_name("wtvae64".to_string())
                .with_image_size(64),
            Command::TrainWtvaeHighres(_) => config
                .with_run_name("wtvae128".to_string())
                .with_image_size(128)
                .with_highres_size(512)
                .with_num_wt(2)
                .with_kl_start(0.0)
                .with_kl_warmup(5),
            Command::TrainIwtvae(_) => config
                .with_run_name("iwtvae512".to_string())
                .with_image_size(512)
                .with_batch_size(8)
                .with_num_wt(3),
            Command::TrainFullvae(_) => config
                .with_run_name("fullvae".to_string())
                .with_image_size(128)
                .with_batch_size(32)
                .with_num_wt(2),
            Command::TrainWtcnn(_) => config
                .with_run_name("wtcnn".to_string())
                .with_image_size(64)
                .with_num_wt(1),
            Command::TrainMasknet(_) => config
                .with_run_name("masknet".to_string())
                .with_image_size(256)
                .with_batch_size(16)
                .with_num_wt(3)
                .with_mask_dim(64),
            Command::EvalIwtvae(_) => config
                .with_run_name("iwtvae512_eval".to_string())
                .with_image_size(512)
                .with_num_wt(3),
        }
    }

    /// Defaults, or the `--config` file, with the flags applied.
    pub fn config(&self) -> Result<ExperimentConfig> {
        let args = self.args();
        let config = match &args.config {
            Some(path) => ExperimentConfig::load(path)?,
            None => self.defaults(),
        };

        Ok(args.apply(config))
    }
}

/// Run a command on the autodiff backend `B`, evaluation runs on its inner backend.
pub fn run<B: AutodiffBackend>(cli: Cli, device: B::Device) -> Result<()> {
    let config = cli.command.config()?;
    let dirs = ArtifactDirs::create(config.run_dir())?;

    if !install_logger(&dirs.log_file()) {
        log::warn!("A global logger was already installed");
    }
    log::info!("Running with {config}");

    match cli.command {
        Command::TrainWtvae(_) => run_wtvae::<B>(&config, device),
        Command::TrainWtvaeHighres(_) => run_wtvae_highres::<B>(&config, device),
        Command::TrainIwtvae(_) => run_iwtvae::<B>(&config, device),
        Command::TrainFullvae(_) => run_fullvae::<B>(&config, device),
        Command::TrainWtcnn(_) => run_wtcnn::<B>(&config, device),
        Command::TrainMasknet(_) => run_masknet::<B>(&config, device),
        Command::EvalIwtvae(_) => run_eval_iwtvae::<B::InnerBackend>(&config, device),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_the_command_defaults() {
        let cli = Cli::parse_from([
            "wtvae",
            "train-iwtvae",
            "--image-size",
            "128",
            "--zero",
            "--wavelet",
            "haar",
            "--checkpoint",
            "artifacts/previous",
            "--checkpoint-epoch",
            "4",
        ]);

        let config = cli.command.config().unwrap();

        assert_eq!(config.image_size, 128);
        assert_eq!(config.num_wt, 3);
        assert_eq!(config.run_name, "iwtvae512");
        assert!(config.zero);
        assert_eq!(config.wavelet, Wavelet::Haar);
        assert_eq!(config.checkpoint.as_deref(), Some("artifacts/previous"));
        assert_eq!(config.checkpoint_epoch, Some(4));
    }

    #[test]
    fn masknet_defaults_match_its_geometry() {
        let cli = Cli::parse_from(["wtvae", "train-masknet"]);

        let config = cli.command.config().unwrap();

        assert_eq!(config.mask_dim, 2 * (config.image_size >> config.num_wt));
    }

    #[test]
    fn config_file_replaces_the_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        ExperimentConfig::new()
            .with_image_size(32)
            .with_reconstruction(ReconstructionLoss::Bce)
            .save(&path)
            .unwrap();

        let cli = Cli::parse_from([
            "wtvae",
            "train-wtvae",
            "--config",
            path.to_str().unwrap(),
            "--lr",
            "0.01",
        ]);
        let config = cli.command.config().unwrap();

        assert_eq!(config.image_size, 32);
        assert_eq!(config.reconstruction, ReconstructionLoss::Bce);
        assert_eq!(config.lr, 0.01);
    }

    #[test]
    fn unknown_wavelets_are_rejected() {
        let result = Cli::try_parse_from(["wtvae", "train-wtvae", "--wavelet", "db4"]);

        assert!(result.is_err());
    }
}
