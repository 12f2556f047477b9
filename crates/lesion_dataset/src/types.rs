//! Core types and error definitions for lesion_dataset.

use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("manifest parse error at {path}: {msg}")]
    Csv { path: PathBuf, msg: String },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("image file missing for manifest entry: {path}")]
    MissingImage { path: PathBuf },
    #[error("{0}")]
    Other(String),
}

/// Benign/melanoma class indices used throughout the pipeline.
pub const LABEL_BENIGN: u8 = 0;
pub const LABEL_MELANOMA: u8 = 1;

/// One row of the evaluation manifest, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub image: PathBuf,
    /// 0 = benign, 1 = melanoma.
    pub label: u8,
}

/// A decoded and transformed sample.
#[derive(Debug, Clone)]
pub struct Sample {
    /// Image in CHW layout, mean/std normalized per channel.
    pub image_chw: Vec<f32>,
    pub width: u32,
    pub height: u32,
    pub label: u8,
}

/// A fixed-size group of samples assembled into Burn tensors.
pub struct LesionBatch<B: burn::tensor::backend::Backend> {
    /// [batch, 3, height, width]
    pub images: burn::tensor::Tensor<B, 4>,
    /// [batch]
    pub labels: burn::tensor::Tensor<B, 1, burn::tensor::Int>,
}
