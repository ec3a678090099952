use super::anneal::KlAnnealer;
use super::grad::{clip_grad_norm, grad_norm};
use crate::data::{FaceBatch, PairedFaceBatch};
use crate::error::Result;
use crate::metric::ScalarLogger;
use crate::model::{LossValues, VaeLoss};
use burn::{
    data::dataloader::DataLoader,
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use std::sync::Arc;

/// Scalars written for every optimization step, besides the gradient norms.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LossScalars {
    /// `Loss/total`, `Loss/bce`, `Loss/kld` and `KL_weight`.
    Vae,
    /// `Loss/bce` only.
    Reconstruction,
    /// `train_loss` only.
    TrainLoss,
}

/// Batches know how many images they hold.
pub trait BatchSize {
    fn batch_size(&self) -> usize;
}

impl<B: Backend> BatchSize for FaceBatch<B> {
    fn batch_size(&self) -> usize {
        self.images.dims()[0]
    }
}

impl<B: Backend> BatchSize for PairedFaceBatch<B> {
    fn batch_size(&self) -> usize {
        self.low.dims()[0]
    }
}

/// How the KL weight evolves during an epoch.
#[derive(Debug)]
pub enum EpochAnnealing<'a> {
    /// Same weight for every batch.
    Fixed(f64),
    /// The annealer is stepped before every batch.
    PerBatch(&'a mut KlAnnealer),
}

impl EpochAnnealing<'_> {
    fn next_weight(&mut self) -> f64 {
        match self {
            EpochAnnealing::Fixed(weight) => *weight,
            EpochAnnealing::PerBatch(annealer) => annealer.step(),
        }
    }
}

/// State shared by every optimization step of a run: the global step used as the scalar
/// index, and the history of per-batch losses.
pub struct TrainLoop<L> {
    logger: L,
    step: usize,
    losses: Vec<LossValues>,
    grad_clip: f64,
    log_interval: usize,
    scalars: LossScalars,
}

impl<L: ScalarLogger> TrainLoop<L> {
    pub fn new(logger: L, grad_clip: f64, log_interval: usize) -> Self {
        Self {
            logger,
            step: 0,
            losses: Vec::new(),
            grad_clip,
            log_interval: usize::max(log_interval, 1),
            scalars: LossScalars::Vae,
        }
    }

    pub fn with_scalars(mut self, scalars: LossScalars) -> Self {
        self.scalars = scalars;
        self
    }

    /// Continue a previous run: the global step follows the recorded history.
    pub fn with_history(mut self, losses: Vec<LossValues>) -> Self {
        self.step = losses.len();
        self.losses = losses;
        self
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn losses(&self) -> &[LossValues] {
        &self.losses
    }

    pub fn logger_mut(&mut self) -> &mut L {
        &mut self.logger
    }

    /// Backward pass, scalar logging, optional clipping and optimizer step.
    pub fn optimize<B, M, O>(
        &mut self,
        model: M,
        optim: &mut O,
        lr: f64,
        loss: VaeLoss<B>,
        kl_weight: f64,
    ) -> Result<(M, LossValues)>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let values = loss.values();
        let grads = GradientsParams::from_grads(loss.total.backward(), &model);
        let norm = grad_norm(&model, &grads);

        match self.scalars {
            LossScalars::Vae => {
                self.logger.log_scalar("Loss/total", values.total, self.step)?;
                self.logger
                    .log_scalar("Loss/bce", values.reconstruction, self.step)?;
                self.logger.log_scalar("Loss/kld", values.kld, self.step)?;
                self.logger.log_scalar("KL_weight", kl_weight, self.step)?;
            }
            LossScalars::Reconstruction => {
                self.logger.log_scalar("Loss/bce", values.total, self.step)?;
            }
            LossScalars::TrainLoss => {
                self.logger.log_scalar("train_loss", values.total, self.step)?;
            }
        }
        self.logger
            .log_scalar("Gradient_norm/before", norm, self.step)?;
        self.step += 1;

        let grads = if self.grad_clip > 0.0 {
            let grads = clip_grad_norm(&model, grads, self.grad_clip);
            self.logger
                .log_scalar("Gradient_norm/clipped", grad_norm(&model, &grads), self.step)?;
            grads
        } else {
            grads
        };

        self.losses.push(values);

        Ok((optim.step(lr, model, grads), values))
    }

    /// One pass over the data loader.
    ///
    /// `loss_fn` computes the objective of a batch for a KL weight. Returns the updated model and
    /// the average total loss per image.
    #[allow(clippy::too_many_arguments)]
    pub fn train_epoch<B, M, O, I, F>(
        &mut self,
        epoch: usize,
        mut model: M,
        optim: &mut O,
        lr: f64,
        loader: &Arc<dyn DataLoader<B, I>>,
        mut annealing: EpochAnnealing<'_>,
        mut loss_fn: F,
    ) -> Result<(M, f64)>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
        I: BatchSize,
        F: FnMut(&M, I, f64) -> VaeLoss<B>,
    {
        let num_items = loader.num_items();
        let mut num_batches = 0;
        let mut total_loss = 0.0;
        let mut seen = 0;

        // Known only after the first batch.
        let mut batch_capacity = 0;

        for (batch_idx, batch) in loader.iter().enumerate() {
            let batch_size = batch.batch_size();
            batch_capacity = usize::max(batch_capacity, batch_size);

            let kl_weight = annealing.next_weight();
            let loss = loss_fn(&model, batch, kl_weight);
            let (updated, values) = self.optimize(model, optim, lr, loss, kl_weight)?;
            model = updated;

            total_loss += values.total;
            num_batches += 1;

            if batch_idx % self.log_interval == 0 {
                let batches_per_epoch = num_items.div_ceil(batch_capacity.max(1));
                log::info!(
                    "Train Epoch: {} [{}/{} ({:.0}%)]\tLoss: {:.6}",
                    epoch,
                    seen,
                    num_items,
                    100.0 * batch_idx as f64 / batches_per_epoch.max(1) as f64,
                    values.total / batch_size as f64
                );
            }

            seen += batch_size;
        }

        self.logger.flush()?;

        let average = total_loss / usize::max(num_items, 1) as f64;
        log::info!("====> Epoch: {epoch} Average loss: {average:.4}");
        log::debug!("Epoch {epoch} ran {num_batches} batches");

        Ok((model, average))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::InMemoryScalarLogger;
    use crate::TestAutodiffBackend;
    use burn::nn::{Linear, LinearConfig};
    use burn::optim::AdamConfig;
    use burn::tensor::Distribution;

    fn loss_of(model: &Linear<TestAutodiffBackend>) -> VaeLoss<TestAutodiffBackend> {
        let device = Default::default();
        let input = Tensor::<TestAutodiffBackend, 2>::random([4, 6], Distribution::Default, &device);
        let output = model.forward(input);
        let reconstruction = output.clone().powf_scalar(2.0).sum().mul_scalar(100.0);
        let kld = output.abs().sum();

        VaeLoss::new(reconstruction, kld, 0.5)
    }

    #[test]
    fn optimize_logs_scalars_and_advances_the_step() {
        let device = Default::default();
        let model = LinearConfig::new(6, 3).init::<TestAutodiffBackend>(&device);
        let mut optim = AdamConfig::new().init::<TestAutodiffBackend, Linear<TestAutodiffBackend>>();
        let mut train = TrainLoop::new(InMemoryScalarLogger::default(), 1.0, 1);

        let loss = loss_of(&model);
        let (model, _) = train.optimize(model, &mut optim, 1e-3, loss, 0.5).unwrap();
        let loss = loss_of(&model);
        train.optimize(model, &mut optim, 1e-3, loss, 0.5).unwrap();

        let logger = train.logger_mut();
        assert_eq!(logger.scalars("Loss/total").len(), 2);
        assert_eq!(logger.scalars("KL_weight"), vec![(0, 0.5), (1, 0.5)]);
        assert_eq!(
            logger
                .scalars("Gradient_norm/clipped")
                .iter()
                .map(|(step, _)| *step)
                .collect::<Vec<_>>(),
            vec![1, 2]
        );
        for (_, norm) in logger.scalars("Gradient_norm/clipped") {
            assert!(norm <= 1.0 + 1e-3);
        }
        assert_eq!(train.step(), 2);
        assert_eq!(train.losses().len(), 2);
    }

    #[test]
    fn reconstruction_scalars_skip_the_kl_terms() {
        let device = Default::default();
        let model = LinearConfig::new(6, 3).init::<TestAutodiffBackend>(&device);
        let mut optim = AdamConfig::new().init::<TestAutodiffBackend, Linear<TestAutodiffBackend>>();
        let mut train = TrainLoop::new(InMemoryScalarLogger::default(), 0.0, 1)
            .with_scalars(LossScalars::Reconstruction);

        let loss = loss_of(&model);
        train.optimize(model, &mut optim, 1e-3, loss, 1.0).unwrap();

        let logger = train.logger_mut();
        assert_eq!(logger.scalars("Loss/bce").len(), 1);
        assert!(logger.scalars("Loss/kld").is_empty());
        assert!(logger.scalars("Gradient_norm/clipped").is_empty());
    }

    #[test]
    fn history_sets_the_global_step() {
        let values = LossValues {
            total: 1.0,
            reconstruction: 1.0,
            kld: 0.0,
        };

        let train =
            TrainLoop::new(InMemoryScalarLogger::default(), 0.0, 1).with_history(vec![values; 3]);

        assert_eq!(train.step(), 3);
    }
}
