//! # Image Classifier
//!
//! Train a convolutional image classifier from a directory of labeled images
//! with the Burn framework, then classify single images with the saved model.
//!
//! ## Features
//!
//! - **Label-per-directory datasets**: every subdirectory of the data root is a label
//! - **Reproducible runs**: one seed drives partitioning, augmentation and weight init
//! - **Staged augmentation**: a base pass, then one full stage per transform (flip, warp, flip)
//! - **Parallel decoding** on a rayon pool with a bounded prefetch queue
//!
//! ## Modules
//!
//! - `dataset`: Scanning, partitioning, augmentation and batch iteration
//! - `model`: Run configuration, CNN architecture built with Burn, model artifacts
//! - `training`: Training loop, iteration listeners and evaluation
//! - `inference`: Single-image prediction
//! - `utils`: Logging, metrics, errors and helper functions
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use image_classifier::backend::{default_device, TrainingBackend};
//! use image_classifier::{ModelParameters, Trainer, TrainerParameters};
//!
//! let trainer_params = TrainerParameters::default().with_data_path("data/animals");
//! let mut trainer = Trainer::<TrainingBackend>::new(
//!     ModelParameters::default(),
//!     trainer_params,
//!     default_device(),
//! );
//! let outcome = trainer.run()?;
//! println!("{}", outcome.report);
//! ```

pub mod backend;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use dataset::{
    AugmentationPipeline, BatchSource, ImageBatch, ImageBatcher, ImagePreProcessingScaler,
    LabelScan, LabeledSample, Partition, Partitioner,
};
pub use inference::{Prediction, Predictor};
pub use model::{ImageClassifier, ImageClassifierConfig, ModelArtifact, ModelParameters, TrainerParameters};
pub use training::{EvaluationReport, Trainer, TrainingOutcome, TrainingPhase};
pub use utils::error::{ClassifierError, Result};

/// Default model configuration file
pub const DEFAULT_MODEL_CONFIG: &str = "conf/model.toml";

/// Default trainer configuration file
pub const DEFAULT_TRAINER_CONFIG: &str = "conf/trainer.toml";

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
