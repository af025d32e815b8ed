//! Run configuration
//!
//! `ModelParameters` describes the input geometry and seed, `TrainerParameters`
//! the training hyperparameters. Both are built once at startup (from TOML
//! files or defaults) and passed by reference to every component.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::utils::error::{ClassifierError, Result};

/// Number of passes the legacy iteration estimate assumes (base + 3 transforms)
pub const LEGACY_AUGMENTATION_FACTOR: usize = 4;

/// Image geometry and reproducibility settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModelParameters {
    /// Image height after resizing
    pub height: usize,
    /// Image width after resizing
    pub width: usize,
    /// Color channels: 1 (gray), 3 (RGB) or 4 (RGBA)
    pub channels: usize,
    /// Optimizer iterations per batch (informational, one step is always taken)
    pub iterations: usize,
    /// Seed for weight init, partitioning and augmentation
    pub seed: u64,
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self {
            height: 100,
            width: 100,
            channels: 3,
            iterations: 1,
            seed: 42,
        }
    }
}

impl ModelParameters {
    /// Load from a TOML file, falling back to defaults when the file is absent
    pub fn load(path: &Path) -> Result<Self> {
        let params: Self = load_toml_or_default(path, "model")?;
        params.validate()?;
        Ok(params)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.height == 0 || self.width == 0 {
            return Err(ClassifierError::config(format!(
                "image size must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if !matches!(self.channels, 1 | 3 | 4) {
            return Err(ClassifierError::config(format!(
                "channels must be 1, 3 or 4, got {}",
                self.channels
            )));
        }
        Ok(())
    }

    /// Number of f32 values in one normalized image
    pub fn pixels_per_image(&self) -> usize {
        self.channels * self.height * self.width
    }
}

impl fmt::Display for ModelParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "=".repeat(65))?;
        writeln!(f, "                      Model parameters")?;
        writeln!(f, "{}", "=".repeat(65))?;
        writeln!(f, "Image size                 : {}x{}", self.width, self.height)?;
        writeln!(f, "Color channels count       : {}", self.channels)?;
        writeln!(f, "Seed                       : {}", self.seed)?;
        write!(f, "{}", "=".repeat(65))
    }
}

/// Training hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrainerParameters {
    /// Root directory with one subdirectory per label
    pub data_path: PathBuf,
    /// Count of immediate subdirectories of `data_path`, derived at run time
    #[serde(skip)]
    pub num_labels: usize,
    /// Per-label cap on selected samples
    #[serde(alias = "numSamples")]
    pub num_examples_per_class: usize,
    pub batch_size: usize,
    /// Passes per training stage
    pub epochs: usize,
    /// Fraction of selected samples used for training
    pub train_test_split: f64,
    /// Decode threads for batch preparation
    #[serde(alias = "nCores")]
    pub num_workers: usize,
    /// Show an interactive progress bar while training
    pub ui_enabled: bool,
    /// Emit progress every N iterations
    #[serde(alias = "listenerFreq")]
    pub progress_frequency: usize,
    pub learning_rate: f64,
    /// Batches decoded ahead of the training step; 0 disables the prefetch thread
    pub prefetch_batches: usize,
    /// Directory the model artifact is written to and read from
    pub model_path: PathBuf,
}

impl Default for TrainerParameters {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("data"),
            num_labels: 0,
            num_examples_per_class: 10,
            batch_size: 20,
            epochs: 2,
            train_test_split: 0.8,
            num_workers: 2,
            ui_enabled: false,
            progress_frequency: 1,
            learning_rate: 1e-3,
            prefetch_batches: 2,
            model_path: PathBuf::from("output/model"),
        }
    }
}

impl TrainerParameters {
    /// Load from a TOML file, falling back to defaults when the file is absent
    pub fn load(path: &Path) -> Result<Self> {
        let params: Self = load_toml_or_default(path, "trainer")?;
        params.validate()?;
        Ok(params)
    }

    pub fn with_data_path(mut self, data_path: impl Into<PathBuf>) -> Self {
        self.data_path = data_path.into();
        self
    }

    pub fn with_num_labels(mut self, num_labels: usize) -> Self {
        self.num_labels = num_labels;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ClassifierError::config("batchSize must be greater than 0"));
        }
        if self.epochs == 0 {
            return Err(ClassifierError::config("epochs must be greater than 0"));
        }
        if self.num_examples_per_class == 0 {
            return Err(ClassifierError::config(
                "numExamplesPerClass must be greater than 0",
            ));
        }
        if !(self.train_test_split > 0.0 && self.train_test_split < 1.0) {
            return Err(ClassifierError::config(format!(
                "trainTestSplit must be in (0, 1), got {}",
                self.train_test_split
            )));
        }
        if self.num_workers == 0 {
            return Err(ClassifierError::config("numWorkers must be at least 1"));
        }
        if self.progress_frequency == 0 {
            return Err(ClassifierError::config(
                "progressFrequency must be greater than 0",
            ));
        }
        if !(self.learning_rate > 0.0) {
            return Err(ClassifierError::config("learningRate must be positive"));
        }
        Ok(())
    }

    /// Batches in one pass over `split_size` samples
    pub fn batches_per_pass(&self, split_size: usize) -> usize {
        split_size.div_ceil(self.batch_size)
    }

    /// Weight-update steps for the whole run: base stage plus one stage per transform
    pub fn estimated_iterations(&self, train_size: usize, num_transforms: usize) -> usize {
        self.epochs * (1 + num_transforms) * self.batches_per_pass(train_size)
    }

    /// Iteration count shown in the parameter banner before the data is scanned.
    ///
    /// Assumes a fixed augmentation factor of 4 and full classes; the trainer
    /// uses [`estimated_iterations`](Self::estimated_iterations) instead.
    pub fn legacy_iteration_estimate(&self) -> usize {
        let passes = self.epochs
            * self.num_examples_per_class
            * LEGACY_AUGMENTATION_FACTOR
            * self.num_labels
            / self.batch_size;
        (passes as f64 * self.train_test_split) as usize
    }
}

impl fmt::Display for TrainerParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "=".repeat(65))?;
        writeln!(f, "                      Trainer parameters")?;
        writeln!(f, "{}", "=".repeat(65))?;
        writeln!(f, "Data Path                  : {}", self.data_path.display())?;
        writeln!(f, "Category count             : {}", self.num_labels)?;
        writeln!(f, "Sample count per category  : {}", self.num_examples_per_class)?;
        writeln!(f, "Sample count per batch     : {}", self.batch_size)?;
        writeln!(f, "Epoch count                : {}", self.epochs)?;
        writeln!(f, "Train/test split           : {}", self.train_test_split)?;
        writeln!(f, "Worker threads             : {}", self.num_workers)?;
        writeln!(f, "Iteration count            : {}", self.legacy_iteration_estimate())?;
        write!(f, "{}", "=".repeat(65))
    }
}

/// Parse a TOML file into `T`, or return `T::default()` when the file does not exist
pub fn load_toml_or_default<T>(path: &Path, what: &str) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        info!("No {} configuration at {}, using defaults", what, path.display());
        return Ok(T::default());
    }

    let content = fs::read_to_string(path).map_err(|e| {
        ClassifierError::config(format!("Failed to read config {}: {e}", path.display()))
    })?;
    debug!("Loaded {} configuration from {}", what, path.display());

    toml::from_str(&content).map_err(|e| {
        ClassifierError::config(format!("Failed to parse config {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let model = ModelParameters::default();
        assert_eq!((model.height, model.width, model.channels), (100, 100, 3));
        assert_eq!(model.seed, 42);

        let trainer = TrainerParameters::default();
        assert_eq!(trainer.epochs, 2);
        assert_eq!(trainer.num_examples_per_class, 10);
        assert_eq!(trainer.batch_size, 20);
        assert_eq!(trainer.num_workers, 2);
        assert_eq!(trainer.progress_frequency, 1);
        assert!(!trainer.ui_enabled);
        assert!((trainer.train_test_split - 0.8).abs() < 1e-12);
        assert!(trainer.validate().is_ok());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let params = ModelParameters::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(params, ModelParameters::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trainer.toml");
        fs::write(&path, "numSamples = 500\nbatchSize = 32\ndataPath = \"images\"\n").unwrap();

        let params = TrainerParameters::load(&path).unwrap();
        assert_eq!(params.num_examples_per_class, 500);
        assert_eq!(params.batch_size, 32);
        assert_eq!(params.data_path, PathBuf::from("images"));
        assert_eq!(params.epochs, 2);
    }

    #[test]
    fn test_malformed_file_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.toml");
        fs::write(&path, "height = \"tall\"").unwrap();

        let err = ModelParameters::load(&path).unwrap_err();
        assert!(matches!(err, ClassifierError::Configuration(_)));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut model = ModelParameters::default();
        model.channels = 2;
        assert!(model.validate().is_err());

        let mut trainer = TrainerParameters::default();
        trainer.train_test_split = 1.0;
        assert!(trainer.validate().is_err());

        let mut trainer = TrainerParameters::default();
        trainer.batch_size = 0;
        assert!(trainer.validate().is_err());

        let mut trainer = TrainerParameters::default();
        trainer.num_workers = 0;
        assert!(trainer.validate().is_err());
    }

    #[test]
    fn test_iteration_estimates() {
        let mut trainer = TrainerParameters::default();
        trainer.batch_size = 4;
        trainer.epochs = 2;
        trainer.num_labels = 2;

        // 16 training samples, 3 transforms: 2 * 4 * 4
        assert_eq!(trainer.batches_per_pass(16), 4);
        assert_eq!(trainer.estimated_iterations(16, 3), 32);
        assert_eq!(trainer.estimated_iterations(17, 0), 10);

        // (2 * 10 * 4 * 2 / 4) * 0.8
        assert_eq!(trainer.legacy_iteration_estimate(), 32);
    }

    #[test]
    fn test_banners() {
        let trainer = TrainerParameters::default().with_num_labels(3);
        let text = trainer.to_string();
        assert!(text.contains("Trainer parameters"));
        assert!(text.contains("Category count             : 3"));

        let model = ModelParameters::default().to_string();
        assert!(model.contains("Image size                 : 100x100"));
    }
}
