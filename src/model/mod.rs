//! Model module: configuration, CNN architecture and persistence
//!
//! This module provides:
//! - Run configuration (`ModelParameters`, `TrainerParameters`)
//! - The CNN classifier built with Burn
//! - Saving and loading a trained model together with its label order

pub mod artifact;
pub mod cnn;
pub mod config;

// Re-export main types for convenience
pub use artifact::{ArtifactMetadata, ModelArtifact};
pub use cnn::{ImageClassifier, ImageClassifierConfig};
pub use config::{ModelParameters, TrainerParameters};
