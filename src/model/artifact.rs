//! Model artifact: weights plus everything needed to use them
//!
//! An artifact is a directory:
//!
//! ```text
//! model/
//! ├── weights.mpk      burn record, full precision
//! └── metadata.json    labels, architecture, geometry, normalization
//! ```
//!
//! Labels are stored in index order so predictions map back to the names
//! the network was trained with. The scaler parameters are stored so
//! prediction normalizes exactly like training did.

use std::fs;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{DefaultFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dataset::normalizer::ScalerParams;
use crate::model::cnn::{ImageClassifier, ImageClassifierConfig};
use crate::model::config::ModelParameters;
use crate::utils::error::{ClassifierError, Result};

/// Weights file stem; the recorder appends `.mpk`
pub const WEIGHTS_FILE: &str = "weights";
pub const METADATA_FILE: &str = "metadata.json";

/// Everything but the weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Label names in output-index order
    pub labels: Vec<String>,
    pub classifier: ImageClassifierConfig,
    pub model_params: ModelParameters,
    pub scaler: ScalerParams,
    /// Version of the crate that wrote the artifact
    pub version: String,
    /// RFC 3339 creation time
    pub created_at: String,
}

impl ArtifactMetadata {
    pub fn new(
        labels: Vec<String>,
        classifier: ImageClassifierConfig,
        model_params: ModelParameters,
        scaler: ScalerParams,
    ) -> Self {
        Self {
            labels,
            classifier,
            model_params,
            scaler,
            version: crate::VERSION.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Handle on an artifact directory
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    dir: PathBuf,
}

impl ModelArtifact {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    /// Path of the weights file as written by the recorder
    pub fn weights_path(&self) -> PathBuf {
        self.dir.join(WEIGHTS_FILE).with_extension("mpk")
    }

    /// Both files are present
    pub fn exists(&self) -> bool {
        self.metadata_path().is_file() && self.weights_path().is_file()
    }

    /// Write weights and metadata, creating the directory if needed
    pub fn save<B: Backend>(&self, model: &ImageClassifier<B>, metadata: &ArtifactMetadata) -> Result<()> {
        info!("Saving model to {:?}", self.dir);

        fs::create_dir_all(&self.dir).map_err(|e| ClassifierError::artifact(&self.dir, e))?;

        let recorder = DefaultFileRecorder::<FullPrecisionSettings>::new();
        model
            .clone()
            .save_file(self.dir.join(WEIGHTS_FILE), &recorder)
            .map_err(|e| ClassifierError::artifact(&self.weights_path(), format!("{:?}", e)))?;

        let metadata_path = self.metadata_path();
        let json = serde_json::to_string_pretty(metadata)
            .map_err(|e| ClassifierError::artifact(&metadata_path, e))?;
        fs::write(&metadata_path, json).map_err(|e| ClassifierError::artifact(&metadata_path, e))?;

        info!("Model saved ({} labels)", metadata.labels.len());
        Ok(())
    }

    /// Read only the metadata
    pub fn load_metadata(&self) -> Result<ArtifactMetadata> {
        let path = self.metadata_path();
        if !path.is_file() {
            return Err(ClassifierError::artifact(&path, "no model metadata found"));
        }

        let json = fs::read_to_string(&path).map_err(|e| ClassifierError::artifact(&path, e))?;
        let metadata: ArtifactMetadata =
            serde_json::from_str(&json).map_err(|e| ClassifierError::artifact(&path, e))?;

        if metadata.labels.len() != metadata.classifier.num_classes {
            return Err(ClassifierError::artifact(
                &path,
                format!(
                    "{} labels stored for a {}-class network",
                    metadata.labels.len(),
                    metadata.classifier.num_classes
                ),
            ));
        }
        Ok(metadata)
    }

    /// Rebuild the network and load its weights
    pub fn load<B: Backend>(&self, device: &B::Device) -> Result<(ImageClassifier<B>, ArtifactMetadata)> {
        info!("Loading model from {:?}", self.dir);

        let metadata = self.load_metadata()?;
        let weights = self.weights_path();
        if !weights.is_file() {
            return Err(ClassifierError::artifact(&weights, "no model weights found"));
        }

        let recorder = DefaultFileRecorder::<FullPrecisionSettings>::new();
        let model = metadata
            .classifier
            .init::<B>(device)
            .load_file(self.dir.join(WEIGHTS_FILE), &recorder, device)
            .map_err(|e| ClassifierError::artifact(&weights, format!("{:?}", e)))?;

        info!("Model loaded ({} labels)", metadata.labels.len());
        Ok((model, metadata))
    }
}
