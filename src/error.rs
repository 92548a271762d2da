//! Error types shared across the crate

use thiserror::Error;

/// Errors surfaced by camera setup, inference and snapshot export
#[derive(Debug, Error)]
pub enum Error {
    /// Capture capability missing, permission denied or no camera attached
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),

    /// No video input carries the requested label
    #[error("no video input labelled {0:?}")]
    DeviceNotFound(String),

    /// The segmentation model failed on a frame
    #[error("inference failed: {0}")]
    InferenceFailure(String),

    /// The segmentation model could not be loaded
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// Configuration file could not be parsed or written
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.to_string())
    }
}
