#![recursion_limit = "256"]

//! Wavelet-domain variational autoencoders for face images.
//!
//! A WT-VAE learns to generate the wavelet transform of an image, an IWT-VAE learns to fill the
//! high-frequency masks of a wavelet image back from its low-frequency patch. Both are built on
//! a fixed, differentiable [wavelet transform](wavelet::wt).

pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod evaluation;
pub mod logging;
pub mod metric;
pub mod model;
pub mod show;
pub mod training;
pub mod wavelet;

#[cfg(test)]
pub type TestBackend = burn::backend::NdArray<f32>;

#[cfg(test)]
pub type TestAutodiffBackend = burn::backend::Autodiff<TestBackend>;
