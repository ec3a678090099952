#![recursion_limit = "256"]

use clap::Parser;
use wtvae::{cli::Cli, error::Result};

#[cfg(any(
    feature = "ndarray",
    feature = "ndarray-blas-netlib",
    feature = "ndarray-blas-openblas",
    feature = "ndarray-blas-accelerate",
))]
mod ndarray {
    use burn::backend::{
        ndarray::{NdArray, NdArrayDevice},
        Autodiff,
    };
    use wtvae::{cli::Cli, error::Result};

    pub fn run(cli: Cli) -> Result<()> {
        let device = NdArrayDevice::Cpu;
        wtvae::cli::run::<Autodiff<NdArray>>(cli, device)
    }
}

#[cfg(feature = "tch-gpu")]
mod tch_gpu {
    use burn::backend::{
        libtorch::{LibTorch, LibTorchDevice},
        Autodiff,
    };
    use wtvae::{cli::Cli, error::Result};

    pub fn run(cli: Cli) -> Result<()> {
        #[cfg(not(target_os = "macos"))]
        let device = LibTorchDevice::Cuda(0);
        #[cfg(target_os = "macos")]
        let device = LibTorchDevice::Mps;

        wtvae::cli::run::<Autodiff<LibTorch>>(cli, device)
    }
}

#[cfg(feature = "tch-cpu")]
mod tch_cpu {
    use burn::backend::{
        libtorch::{LibTorch, LibTorchDevice},
        Autodiff,
    };
    use wtvae::{cli::Cli, error::Result};

    pub fn run(cli: Cli) -> Result<()> {
        let device = LibTorchDevice::Cpu;
        wtvae::cli::run::<Autodiff<LibTorch>>(cli, device)
    }
}

#[cfg(feature = "wgpu")]
mod wgpu {
    use burn::backend::{
        wgpu::{Wgpu, WgpuDevice},
        Autodiff,
    };
    use wtvae::{cli::Cli, error::Result};

    pub fn run(cli: Cli) -> Result<()> {
        let device = WgpuDevice::default();
        wtvae::cli::run::<Autodiff<Wgpu>>(cli, device)
    }
}

fn exit_on_error(result: Result<()>) {
    if let Err(err) = result {
        log::error!("{err}");
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn main() {
    let cli = Cli::parse();

    #[cfg(any(
        feature = "ndarray",
        feature = "ndarray-blas-netlib",
        feature = "ndarray-blas-openblas",
        feature = "ndarray-blas-accelerate",
    ))]
    exit_on_error(ndarray::run(cli.clone()));
    #[cfg(feature = "tch-cpu")]
    exit_on_error(tch_cpu::run(cli.clone()));
    #[cfg(feature = "tch-gpu")]
    exit_on_error(tch_gpu::run(cli.clone()));
    #[cfg(feature = "wgpu")]
    exit_on_error(wgpu::run(cli.clone()));
}
