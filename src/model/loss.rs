use burn::prelude::*;
use serde::{Deserialize, Serialize};

const EPSILON: f64 = 1e-7;

/// Reconstruction term of the VAE objective.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconstructionLoss {
    /// Sum of squared errors.
    #[default]
    Mse,
    /// Summed binary cross-entropy, predictions are clamped into `(0, 1)`.
    Bce,
}

impl ReconstructionLoss {
    /// Compute the summed reconstruction loss.
    pub fn forward<B: Backend, const D: usize>(
        &self,
        prediction: Tensor<B, D>,
        target: Tensor<B, D>,
    ) -> Tensor<B, 1> {
        match self {
            ReconstructionLoss::Mse => mse_sum(prediction, target),
            ReconstructionLoss::Bce => bce_sum(prediction, target),
        }
    }
}

impl core::str::FromStr for ReconstructionLoss {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "mse" => Ok(ReconstructionLoss::Mse),
            "bce" => Ok(ReconstructionLoss::Bce),
            other => Err(format!("Unsupported reconstruction loss `{other}`")),
        }
    }
}

/// Sum of squared errors.
pub fn mse_sum<B: Backend, const D: usize>(
    prediction: Tensor<B, D>,
    target: Tensor<B, D>,
) -> Tensor<B, 1> {
    (prediction - target).powf_scalar(2.0).sum()
}

/// Mean squared error.
pub fn mse_mean<B: Backend, const D: usize>(
    prediction: Tensor<B, D>,
    target: Tensor<B, D>,
) -> Tensor<B, 1> {
    (prediction - target).powf_scalar(2.0).mean()
}

/// Summed binary cross-entropy.
pub fn bce_sum<B: Backend, const D: usize>(
    prediction: Tensor<B, D>,
    target: Tensor<B, D>,
) -> Tensor<B, 1> {
    let prediction = prediction.clamp(EPSILON, 1.0 - EPSILON);
    let positive = target.clone() * prediction.clone().log();
    let negative = target.neg().add_scalar(1.0) * prediction.neg().add_scalar(1.0).log();

    (positive + negative).sum().neg()
}

/// KL divergence between `N(mu, exp(logvar))` and the unit gaussian, summed over the batch.
///
/// `-0.5 * sum(1 + logvar - mu^2 - exp(logvar))`
pub fn kl_divergence<B: Backend>(mu: Tensor<B, 2>, logvar: Tensor<B, 2>) -> Tensor<B, 1> {
    let terms = logvar.clone().add_scalar(1.0) - mu.powf_scalar(2.0) - logvar.exp();

    terms.sum().mul_scalar(-0.5)
}

/// Terms of a VAE objective.
#[derive(Clone, Debug)]
pub struct VaeLoss<B: Backend> {
    /// `reconstruction + kl_weight * kld`
    pub total: Tensor<B, 1>,
    pub reconstruction: Tensor<B, 1>,
    pub kld: Tensor<B, 1>,
}

impl<B: Backend> VaeLoss<B> {
    /// Combine both terms with the given KL weight.
    pub fn new(reconstruction: Tensor<B, 1>, kld: Tensor<B, 1>, kl_weight: f64) -> Self {
        let total = reconstruction.clone() + kld.clone().mul_scalar(kl_weight);

        Self {
            total,
            reconstruction,
            kld,
        }
    }

    /// Objective without a KL term.
    pub fn reconstruction_only(reconstruction: Tensor<B, 1>) -> Self {
        Self {
            total: reconstruction.clone(),
            kld: reconstruction.zeros_like(),
            reconstruction,
        }
    }

    /// Sum two objectives term by term.
    pub fn sum(self, other: Self) -> Self {
        Self {
            total: self.total + other.total,
            reconstruction: self.reconstruction + other.reconstruction,
            kld: self.kld + other.kld,
        }
    }

    /// Detached scalar values `(total, reconstruction, kld)`.
    pub fn values(&self) -> LossValues {
        LossValues {
            total: scalar(&self.total),
            reconstruction: scalar(&self.reconstruction),
            kld: scalar(&self.kld),
        }
    }
}

/// Scalar snapshot of a [VaeLoss](VaeLoss), as recorded in the training history.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct LossValues {
    pub total: f64,
    pub reconstruction: f64,
    pub kld: f64,
}

fn scalar<B: Backend>(tensor: &Tensor<B, 1>) -> f64 {
    tensor.clone().into_scalar().elem::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestBackend;

    fn scalar_of(tensor: Tensor<TestBackend, 1>) -> f32 {
        tensor.into_scalar()
    }

    #[test]
    fn kl_divergence_is_zero_for_unit_gaussian() {
        let device = Default::default();
        let mu = Tensor::<TestBackend, 2>::zeros([4, 8], &device);
        let logvar = Tensor::<TestBackend, 2>::zeros([4, 8], &device);

        assert!(scalar_of(kl_divergence(mu, logvar)).abs() < 1e-6);
    }

    #[test]
    fn kl_divergence_of_shifted_mean() {
        let device = Default::default();
        let mu = Tensor::<TestBackend, 2>::ones([2, 3], &device);
        let logvar = Tensor::<TestBackend, 2>::zeros([2, 3], &device);

        // 0.5 * mu^2 per element.
        assert!((scalar_of(kl_divergence(mu, logvar)) - 3.0).abs() < 1e-5);
    }

    #[test]
    fn mse_sum_and_mean() {
        let device = Default::default();
        let prediction = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0], [3.0, 4.0]], &device);
        let target = Tensor::<TestBackend, 2>::zeros([2, 2], &device);

        assert!((scalar_of(mse_sum(prediction.clone(), target.clone())) - 30.0).abs() < 1e-5);
        assert!((scalar_of(mse_mean(prediction, target)) - 7.5).abs() < 1e-5);
    }

    #[test]
    fn bce_is_small_for_confident_correct_predictions() {
        let device = Default::default();
        let target = Tensor::<TestBackend, 2>::from_floats([[1.0, 0.0]], &device);
        let good = Tensor::<TestBackend, 2>::from_floats([[0.99, 0.01]], &device);
        let bad = Tensor::<TestBackend, 2>::from_floats([[0.01, 0.99]], &device);

        let good = scalar_of(bce_sum(good, target.clone()));
        let bad = scalar_of(bce_sum(bad, target));

        assert!(good < 0.05);
        assert!(bad > 5.0);
    }

    #[test]
    fn total_weights_the_kl_term() {
        let device = Default::default();
        let reconstruction = Tensor::<TestBackend, 1>::from_floats([2.0], &device);
        let kld = Tensor::<TestBackend, 1>::from_floats([4.0], &device);

        let loss = VaeLoss::new(reconstruction, kld, 0.25);
        let values = loss.values();

        assert!((values.total - 3.0).abs() < 1e-6);
        assert!((values.reconstruction - 2.0).abs() < 1e-6);
        assert!((values.kld - 4.0).abs() < 1e-6);
    }
}
