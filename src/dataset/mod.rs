//! Dataset module: from a label-per-directory tree to normalized batches
//!
//! This module provides:
//! - Scanning a data root into labeled samples
//! - Balanced, seeded train/test partitioning
//! - Geometric augmentation transforms
//! - Pixel rescaling and batch iteration with optional prefetch
//!
//! ## Directory convention
//!
//! Every immediate subdirectory of the data root is a label; the image files
//! directly inside it are the samples of that label.

pub mod augmentation;
pub mod burn_dataset;
pub mod loader;
pub mod normalizer;
pub mod split;

// Re-export main types for convenience
pub use augmentation::{AugmentationPipeline, FlipTransform, ImageTransform, WarpTransform};
pub use burn_dataset::{
    decode_pool, BatchIterator, BatchSource, DecodedBatch, ImageBatch, ImageBatcher, ImageItem,
    PrefetchIterator,
};
pub use loader::{list_labels, LabelScan, LabeledSample};
pub use normalizer::{FittedScaler, ImagePreProcessingScaler, ScalerParams};
pub use split::{Partition, PartitionStats, Partitioner};
