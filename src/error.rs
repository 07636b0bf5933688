use std::path::PathBuf;

use burn::record::RecorderError;
use thiserror::Error;

/// Raised while composing model stages when a layer's output shape does not fit
/// the next stage.
#[derive(Debug, Error, PartialEq)]
pub enum ShapeError {
    #[error("{stage}: expected shape {expected:?}, got {actual:?}")]
    Mismatch {
        stage: String,
        expected: [usize; 3],
        actual: [usize; 3],
    },
    #[error("{stage}: {channels} channels cannot be shuffled by a factor of {factor}")]
    Shuffle {
        stage: String,
        channels: usize,
        factor: usize,
    },
    #[error("{stage}: spatial size {size:?} is not divisible by {factor}")]
    Indivisible {
        stage: String,
        size: [usize; 2],
        factor: usize,
    },
    #[error("{stage}: kernel {kernel} does not fit spatial size {size:?}")]
    Kernel {
        stage: String,
        kernel: usize,
        size: [usize; 2],
    },
    #[error("{stage}: {reason}")]
    Invalid { stage: String, reason: String },
}

#[derive(Debug, Error)]
pub enum SrganError {
    #[error("invalid model configuration: {0}")]
    Shape(#[from] ShapeError),

    #[error("no training images found under {0}")]
    EmptyDataset(PathBuf),

    #[error("feature extractor weights not found at {0}")]
    MissingFeatureWeights(PathBuf),

    #[error("non-finite {model} loss at epoch {epoch}, batch {batch}")]
    NonFiniteLoss {
        model: &'static str,
        epoch: usize,
        batch: usize,
    },

    #[error("unexpected tensor data: {0}")]
    TensorData(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Recorder(#[from] RecorderError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = SrganError> = std::result::Result<T, E>;
