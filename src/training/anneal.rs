/// Linear ramp of the KL term weight.
///
/// The weight is increased by `rate` every time [step](KlAnnealer::step) is called and never
/// goes above 1.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KlAnnealer {
    weight: f64,
    rate: f64,
}

impl KlAnnealer {
    /// Fixed weight.
    pub fn constant(weight: f64) -> Self {
        Self { weight, rate: 0.0 }
    }

    /// Reach 1 after `warmup` epochs, stepping once per epoch.
    pub fn per_epoch(start: f64, warmup: usize) -> Self {
        Self::ramp(start, warmup)
    }

    /// Reach 1 after `warmup` epochs, stepping once per batch.
    pub fn per_batch(start: f64, warmup: usize, batches_per_epoch: usize) -> Self {
        Self::ramp(start, warmup * batches_per_epoch)
    }

    fn ramp(start: f64, steps: usize) -> Self {
        if steps == 0 {
            return Self::constant(1.0);
        }

        Self {
            weight: start,
            rate: (1.0 - start) / steps as f64,
        }
    }

    /// Advance the ramp and return the new weight.
    pub fn step(&mut self) -> f64 {
        self.weight = f64::min(1.0, self.weight + self.rate);
        self.weight
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_epoch_reaches_one_after_warmup() {
        let mut annealer = KlAnnealer::per_epoch(0.0, 4);

        let weights: Vec<f64> = (0..6).map(|_| annealer.step()).collect();

        assert_eq!(weights, vec![0.25, 0.5, 0.75, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn per_batch_rate_is_spread_over_batches() {
        let annealer = KlAnnealer::per_batch(0.5, 2, 10);

        assert!((annealer.rate() - 0.025).abs() < 1e-12);
        assert_eq!(annealer.weight(), 0.5);
    }

    #[test]
    fn no_warmup_starts_at_one() {
        let mut annealer = KlAnnealer::per_epoch(0.1, 0);

        assert_eq!(annealer.weight(), 1.0);
        assert_eq!(annealer.step(), 1.0);
    }

    #[test]
    fn constant_never_moves() {
        let mut annealer = KlAnnealer::constant(0.3);

        annealer.step();

        assert_eq!(annealer.weight(), 0.3);
    }
}
