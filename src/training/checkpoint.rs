use crate::error::Result;
use crate::model::LossValues;
use burn::{
    module::AutodiffModule,
    optim::Optimizer,
    prelude::*,
    record::{CompactRecorder, Recorder},
    tensor::backend::AutodiffBackend,
};
use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};

fn model_path(dir: &Path, name: &str, epoch: usize) -> PathBuf {
    dir.join(format!("{name}_model_{epoch}"))
}

fn optim_path(dir: &Path, name: &str, epoch: usize) -> PathBuf {
    dir.join(format!("{name}_optim_{epoch}"))
}

/// Save the model and optimizer states of an epoch.
pub fn save_checkpoint<B, M, O>(
    dir: &Path,
    name: &str,
    epoch: usize,
    model: &M,
    optim: &O,
) -> Result<()>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    let recorder = CompactRecorder::new();

    model
        .clone()
        .save_file(model_path(dir, name, epoch), &recorder)?;
    Recorder::<B>::record(&recorder, optim.to_record(), optim_path(dir, name, epoch))?;

    log::info!("Saved {name} checkpoint of epoch {epoch} to {}", dir.display());

    Ok(())
}

/// Load the model and optimizer states saved by [save_checkpoint](save_checkpoint).
pub fn load_checkpoint<B, M, O>(
    dir: &Path,
    name: &str,
    epoch: usize,
    model: M,
    optim: O,
    device: &B::Device,
) -> Result<(M, O)>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    let recorder = CompactRecorder::new();

    let model = model.load_file(model_path(dir, name, epoch), &recorder, device)?;
    let record = Recorder::<B>::load(&recorder, optim_path(dir, name, epoch), device)?;
    let optim = optim.load_record(record);

    log::info!("Resumed {name} from epoch {epoch} in {}", dir.display());

    Ok((model, optim))
}

/// Load only the model weights of a checkpoint, e.g. for evaluation.
pub fn load_model<B, M>(dir: &Path, name: &str, epoch: usize, model: M, device: &B::Device) -> Result<M>
where
    B: Backend,
    M: Module<B>,
{
    let model = model.load_file(model_path(dir, name, epoch), &CompactRecorder::new(), device)?;
    log::info!("Loaded {name} weights of epoch {epoch} from {}", dir.display());

    Ok(model)
}

/// Save the per-batch losses as JSON.
pub fn save_losses(path: &Path, losses: &[LossValues]) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, losses)?;

    Ok(())
}

pub fn load_losses(path: &Path) -> Result<Vec<LossValues>> {
    let reader = BufReader::new(File::open(path)?);

    Ok(serde_json::from_reader(reader)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TestAutodiffBackend, TestBackend};
    use burn::nn::{Linear, LinearConfig};
    use burn::optim::AdamConfig;

    #[test]
    fn checkpoint_restores_the_weights() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let model = LinearConfig::new(4, 2).init::<TestAutodiffBackend>(&device);
        let optim = AdamConfig::new().init::<TestAutodiffBackend, Linear<TestAutodiffBackend>>();

        save_checkpoint(dir.path(), "linear", 3, &model, &optim).unwrap();

        let fresh = LinearConfig::new(4, 2).init::<TestAutodiffBackend>(&device);
        let (loaded, _) = load_checkpoint(dir.path(), "linear", 3, fresh, optim, &device).unwrap();

        let expected = model.weight.val().into_data().to_vec::<f32>().unwrap();
        let actual = loaded.weight.val().into_data().to_vec::<f32>().unwrap();
        for (a, b) in expected.iter().zip(actual.iter()) {
            // Weights are stored in half precision.
            assert!((a - b).abs() < 1e-2);
        }
    }

    #[test]
    fn model_weights_load_on_the_inference_backend() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let model = LinearConfig::new(4, 2).init::<TestAutodiffBackend>(&device);
        let optim = AdamConfig::new().init::<TestAutodiffBackend, Linear<TestAutodiffBackend>>();
        save_checkpoint(dir.path(), "linear", 1, &model, &optim).unwrap();

        let fresh = LinearConfig::new(4, 2).init::<TestBackend>(&device);
        let loaded = load_model(dir.path(), "linear", 1, fresh, &device).unwrap();

        assert_eq!(loaded.weight.dims(), [4, 2]);
    }

    #[test]
    fn missing_checkpoint_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let model = LinearConfig::new(4, 2).init::<TestBackend>(&device);

        assert!(load_model(dir.path(), "linear", 7, model, &device).is_err());
    }

    #[test]
    fn losses_round_trip_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train_losses.json");
        let losses = vec![
            LossValues {
                total: 3.0,
                reconstruction: 2.0,
                kld: 1.0,
            };
            2
        ];

        save_losses(&path, &losses).unwrap();

        assert_eq!(load_losses(&path).unwrap(), losses);
    }
}
