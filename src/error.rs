use burn::config::ConfigError;
use burn::record::RecorderError;
use std::path::PathBuf;

/// Errors raised by the wavelet utilities, the data pipeline and the training drivers.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    #[error("No images found in `{0}`")]
    EmptyDataset(PathBuf),

    #[error("Could not create artifact directory `{path}`: {source}")]
    ArtifactDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Recorder error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Invalid scalar log entry: {0}")]
    ScalarLog(String),
}

impl From<ConfigError> for Error {
    fn from(error: ConfigError) -> Self {
        Error::Config(format!("{error:?}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
