//! Dataset loading and Burn-compatible batching for ISIC2016 evaluation.
//!
//! This crate provides:
//! - Manifest reading and the one-time preprocessing step
//! - The deterministic evaluation transform (resize, center-crop, normalize)
//! - Ordered batch iteration into Burn tensors

pub mod batch;
pub mod manifest;
pub mod transform;
pub mod types;

pub use batch::BatchIter;
pub use manifest::{preprocess_data, read_manifest};
pub use transform::{EvalTransform, ISIC2016_MEAN, ISIC2016_STD};
pub use types::*;
