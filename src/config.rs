use crate::error::Error;
use crate::model::ReconstructionLoss;
use crate::wavelet::Wavelet;
use burn::prelude::*;
use std::path::{Path, PathBuf};

/// Every knob of a training or evaluation run.
#[derive(Config, Debug)]
pub struct ExperimentConfig {
    /// Folder holding the face images.
    #[config(default = "String::from(\"data/celeba\")")]
    pub root_dir: String,
    /// Folder in which every run gets its own sub-folder.
    #[config(default = "String::from(\"artifacts\")")]
    pub artifact_dir: String,
    /// Name of the run, used as the sub-folder of `artifact_dir`.
    #[config(default = "String::from(\"default\")")]
    pub run_name: String,
    /// Resolution the models see.
    #[config(default = 64)]
    pub image_size: usize,
    /// Resolution of the paired high resolution images.
    #[config(default = 512)]
    pub highres_size: usize,
    #[config(default = 64)]
    pub batch_size: usize,
    #[config(default = 10)]
    pub num_epochs: usize,
    #[config(default = 1e-3)]
    pub lr: f64,
    #[config(default = 100)]
    pub z_dim: usize,
    /// Width of the first convolution, doubled at every stage.
    #[config(default = 32)]
    pub base_channels: usize,
    /// Number of wavelet levels.
    #[config(default = 3)]
    pub num_wt: usize,
    /// Weight of the KL term once annealing is over.
    #[config(default = 1.0)]
    pub kl_weight: f64,
    /// KL weight at the start of the annealing.
    #[config(default = 1.0)]
    pub kl_start: f64,
    /// Epochs over which the KL weight ramps up to 1, `0` disables annealing.
    #[config(default = 0)]
    pub kl_warmup: usize,
    /// Maximum global gradient norm, `0` disables clipping.
    #[config(default = 0.0)]
    pub grad_clip: f64,
    #[config(default = 10)]
    pub log_interval: usize,
    #[config(default = 2020)]
    pub seed: u64,
    /// Keep only the low-frequency patch of the wavelet image given to the IWT-VAE.
    #[config(default = false)]
    pub zero: bool,
    /// Iterations between two image and weight dumps of the mask network.
    #[config(default = 1000)]
    pub save_every: usize,
    /// Size of the masks predicted by the mask network.
    #[config(default = 64)]
    pub mask_dim: usize,
    #[config(default = 4)]
    pub num_workers: usize,
    /// Images kept for evaluation samples.
    #[config(default = 8)]
    pub sample_size: usize,
    #[config(default = "Wavelet::Bior22")]
    pub wavelet: Wavelet,
    #[config(default = "ReconstructionLoss::Mse")]
    pub reconstruction: ReconstructionLoss,
    /// Random sample of the dataset to train on, every image when unset.
    pub train_samples: Option<usize>,
    /// Run folder to resume from.
    pub checkpoint: Option<String>,
    /// Epoch of the checkpoint to resume from, completed iterations for the mask network.
    pub checkpoint_epoch: Option<usize>,
}

impl ExperimentConfig {
    /// Folder of this run.
    pub fn run_dir(&self) -> PathBuf {
        Path::new(&self.artifact_dir).join(&self.run_name)
    }
}

/// Folders of a run.
#[derive(Clone, Debug)]
pub struct ArtifactDirs {
    pub root: PathBuf,
    /// Saved image grids.
    pub images: PathBuf,
    /// Model and optimizer records, loss history.
    pub checkpoints: PathBuf,
    /// Scalar logs.
    pub runs: PathBuf,
}

impl ArtifactDirs {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();

        Self {
            images: root.join("images"),
            checkpoints: root.join("checkpoints"),
            runs: root.join("runs"),
            root,
        }
    }

    /// Create every folder of the run, keeping existing content.
    pub fn create(root: impl AsRef<Path>) -> crate::error::Result<Self> {
        let dirs = Self::new(root);

        for path in [&dirs.root, &dirs.images, &dirs.checkpoints, &dirs.runs] {
            std::fs::create_dir_all(path).map_err(|source| Error::ArtifactDir {
                path: path.clone(),
                source,
            })?;
        }

        Ok(dirs)
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn log_file(&self) -> PathBuf {
        self.root.join("experiment.log")
    }

    pub fn losses_file(&self) -> PathBuf {
        self.checkpoints.join("train_losses.json")
    }

    pub fn image(&self, name: &str) -> PathBuf {
        self.images.join(format!("{name}.png"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = ExperimentConfig::new()
            .with_z_dim(16)
            .with_wavelet(Wavelet::Haar)
            .with_checkpoint(Some("runs/old".to_string()));

        config.save(&path).unwrap();
        let loaded = ExperimentConfig::load(&path).unwrap();

        assert_eq!(loaded.z_dim, 16);
        assert_eq!(loaded.wavelet, Wavelet::Haar);
        assert_eq!(loaded.checkpoint.as_deref(), Some("runs/old"));
        assert_eq!(loaded.checkpoint_epoch, None);
    }

    #[test]
    fn artifact_dirs_are_created() {
        let dir = tempfile::tempdir().unwrap();

        let dirs = ArtifactDirs::create(dir.path().join("run")).unwrap();

        assert!(dirs.images.is_dir());
        assert!(dirs.checkpoints.is_dir());
        assert!(dirs.runs.is_dir());
        assert_eq!(dirs.image("sample1"), dirs.images.join("sample1.png"));
    }

    #[test]
    fn artifact_dir_error_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, "not a folder").unwrap();

        let err = ArtifactDirs::create(file.join("run")).unwrap_err();

        assert!(matches!(err, Error::ArtifactDir { .. }));
    }
}
