//! Error Handling Module
//!
//! Defines the error taxonomy for the classifier pipeline.
//! Uses thiserror for ergonomic error definitions.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Main error type for training and prediction
#[derive(Error, Debug)]
pub enum ClassifierError {
    /// Bad paths, zero labels or invalid numeric parameters. Raised before training starts.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An image could not be read or decoded. The batch iterator skips the sample.
    #[error("Failed to decode sample '{path}': {reason}")]
    SampleDecode { path: PathBuf, reason: String },

    /// Loss became NaN or infinite
    #[error(
        "Numeric divergence at iteration {iteration} (last stable iteration: {last_good_iteration})"
    )]
    NumericDivergence {
        iteration: usize,
        last_good_iteration: usize,
    },

    /// The model artifact could not be written or read
    #[error("Model artifact error at '{path}': {reason}")]
    ArtifactIo { path: PathBuf, reason: String },

    /// A stop was requested; honoured at a batch boundary
    #[error("Training stopped on request after iteration {iteration}")]
    Stopped { iteration: usize },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ClassifierError {
    /// Shorthand for a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        ClassifierError::Configuration(msg.into())
    }

    /// Shorthand for an artifact error on `path`
    pub fn artifact(path: &Path, reason: impl ToString) -> Self {
        ClassifierError::ArtifactIo {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for a decode error on `path`
    pub fn decode(path: &Path, reason: impl ToString) -> Self {
        ClassifierError::SampleDecode {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// Only decode failures may be skipped; everything else aborts the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ClassifierError::SampleDecode { .. })
    }
}

impl From<serde_json::Error> for ClassifierError {
    fn from(err: serde_json::Error) -> Self {
        ClassifierError::Serialization(err.to_string())
    }
}

/// Convenience Result type for classifier operations
pub type Result<T> = std::result::Result<T, ClassifierError>;
