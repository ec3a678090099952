use burn::prelude::*;
use serde::{Deserialize, Serialize};

const HAAR: f32 = std::f32::consts::FRAC_1_SQRT_2;
const BIOR_A: f32 = 0.176_776_7;
const BIOR_B: f32 = 0.353_553_4;
const BIOR_C: f32 = 1.060_660_2;

/// Wavelet families supported by the transform.
///
/// Taps follow the `pywt` conventions so that weights trained against the
/// reference filters stay interchangeable.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Wavelet {
    /// Haar wavelet, 2 taps. Reconstruction is exact everywhere.
    Haar,
    /// Biorthogonal 2.2 wavelet, 6 taps. Reconstruction is exact away from the
    /// two outermost pixels of each border.
    #[default]
    Bior22,
}

impl Wavelet {
    /// Decomposition low-pass taps.
    pub fn dec_lo(&self) -> Vec<f32> {
        match self {
            Wavelet::Haar => vec![HAAR, HAAR],
            Wavelet::Bior22 => vec![0.0, -BIOR_A, BIOR_B, BIOR_C, BIOR_B, -BIOR_A],
        }
    }

    /// Decomposition high-pass taps.
    pub fn dec_hi(&self) -> Vec<f32> {
        match self {
            Wavelet::Haar => vec![-HAAR, HAAR],
            Wavelet::Bior22 => vec![0.0, BIOR_B, -2.0 * BIOR_B, BIOR_B, 0.0, 0.0],
        }
    }

    /// Reconstruction low-pass taps.
    pub fn rec_lo(&self) -> Vec<f32> {
        match self {
            Wavelet::Haar => vec![HAAR, HAAR],
            Wavelet::Bior22 => vec![0.0, BIOR_B, 2.0 * BIOR_B, BIOR_B, 0.0, 0.0],
        }
    }

    /// Reconstruction high-pass taps.
    pub fn rec_hi(&self) -> Vec<f32> {
        match self {
            Wavelet::Haar => vec![HAAR, -HAAR],
            Wavelet::Bior22 => vec![0.0, BIOR_A, BIOR_B, -BIOR_C, BIOR_B, BIOR_A],
        }
    }

    /// Length of the filters.
    pub fn num_taps(&self) -> usize {
        match self {
            Wavelet::Haar => 2,
            Wavelet::Bior22 => 6,
        }
    }
}

impl core::str::FromStr for Wavelet {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "haar" => Ok(Wavelet::Haar),
            "bior2.2" | "bior22" => Ok(Wavelet::Bior22),
            other => Err(format!("Unsupported wavelet `{other}`")),
        }
    }
}

/// The four separable 2D kernels of one wavelet level.
///
/// Kernels are stored with shape `[4, 1, k, k]` in the order LL, LH, HL, HH, which is the
/// layout expected by both `conv2d` (`[channels_out, channels_in, k, k]`) and
/// `conv_transpose2d` (`[channels_in, channels_out, k, k]`).
#[derive(Clone, Debug)]
pub struct FilterBank<B: Backend> {
    kernels: Tensor<B, 4>,
    wavelet: Wavelet,
}

impl<B: Backend> FilterBank<B> {
    /// Analysis filters, built from the reversed decomposition taps.
    pub fn analysis(wavelet: Wavelet, device: &B::Device) -> Self {
        let mut lo = wavelet.dec_lo();
        let mut hi = wavelet.dec_hi();
        lo.reverse();
        hi.reverse();

        Self::from_taps(wavelet, &lo, &hi, device)
    }

    /// Synthesis filters, built from the reconstruction taps.
    pub fn synthesis(wavelet: Wavelet, device: &B::Device) -> Self {
        Self::from_taps(wavelet, &wavelet.rec_lo(), &wavelet.rec_hi(), device)
    }

    fn from_taps(wavelet: Wavelet, lo: &[f32], hi: &[f32], device: &B::Device) -> Self {
        let size = lo.len();
        let mut values = Vec::with_capacity(4 * size * size);

        values.extend(outer(lo, lo));
        values.extend(outer(lo, hi));
        values.extend(outer(hi, lo));
        values.extend(outer(hi, hi));

        let kernels = Tensor::from_data(TensorData::new(values, [4, 1, size, size]), device);

        Self { kernels, wavelet }
    }

    /// The kernels, shape `[4, 1, k, k]`.
    pub fn kernels(&self) -> Tensor<B, 4> {
        self.kernels.clone()
    }

    /// The wavelet these kernels were built from.
    pub fn wavelet(&self) -> Wavelet {
        self.wavelet
    }

    /// Zero padding applied on each border so that one level halves the spatial size.
    pub fn padding(&self) -> usize {
        (self.wavelet.num_taps() - 2) / 2
    }

    /// Move the kernels to another device.
    pub fn to_device(&self, device: &B::Device) -> Self {
        Self {
            kernels: self.kernels.clone().to_device(device),
            wavelet: self.wavelet,
        }
    }
}

/// Outer product `m[i][j] = row[j] * col[i]`, flattened row-major.
fn outer(row: &[f32], col: &[f32]) -> Vec<f32> {
    col.iter()
        .flat_map(|c| row.iter().map(move |r| r * c))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestBackend;

    fn kernel_values(bank: &FilterBank<TestBackend>) -> Vec<f32> {
        bank.kernels().into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn haar_analysis_kernels_are_orthonormal() {
        let device = Default::default();
        let bank = FilterBank::<TestBackend>::analysis(Wavelet::Haar, &device);
        let values = kernel_values(&bank);

        assert_eq!(bank.kernels().dims(), [4, 1, 2, 2]);
        for a in 0..4 {
            for b in 0..4 {
                let dot: f32 = (0..4)
                    .map(|i| values[a * 4 + i] * values[b * 4 + i])
                    .sum();
                let expected = if a == b { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-5, "<{a}, {b}> = {dot}");
            }
        }
    }

    #[test]
    fn haar_low_pass_kernel_averages() {
        let device = Default::default();
        let bank = FilterBank::<TestBackend>::analysis(Wavelet::Haar, &device);
        let values = kernel_values(&bank);

        for value in &values[0..4] {
            assert!((value - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn bior22_kernels_have_expected_shape_and_padding() {
        let device = Default::default();
        let analysis = FilterBank::<TestBackend>::analysis(Wavelet::Bior22, &device);
        let synthesis = FilterBank::<TestBackend>::synthesis(Wavelet::Bior22, &device);

        assert_eq!(analysis.kernels().dims(), [4, 1, 6, 6]);
        assert_eq!(synthesis.kernels().dims(), [4, 1, 6, 6]);
        assert_eq!(analysis.padding(), 2);
    }

    #[test]
    fn outer_product_layout() {
        let product = outer(&[1.0, 2.0], &[10.0, 20.0]);

        assert_eq!(product, vec![10.0, 20.0, 20.0, 40.0]);
    }

    #[test]
    fn parse_wavelet_names() {
        assert_eq!("haar".parse::<Wavelet>(), Ok(Wavelet::Haar));
        assert_eq!("bior2.2".parse::<Wavelet>(), Ok(Wavelet::Bior22));
        assert!("db4".parse::<Wavelet>().is_err());
    }
}
