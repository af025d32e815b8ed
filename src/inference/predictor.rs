//! Inference Predictor Module
//!
//! Loads a saved model artifact and classifies single images. Images go
//! through the same decode, resize and rescale code as training, with the
//! scaler parameters stored in the artifact.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::DefaultBackend;
use crate::dataset::burn_dataset::{decode_image, image_to_pixels};
use crate::dataset::normalizer::FittedScaler;
use crate::model::artifact::{ArtifactMetadata, ModelArtifact};
use crate::model::cnn::ImageClassifier;
use crate::utils::error::{ClassifierError, Result};

/// Result of a single prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub image_path: PathBuf,
    /// (label, probability) in the stored label order
    pub probabilities: Vec<(String, f32)>,
    /// Index of the most probable label
    pub label_index: usize,
    pub label: String,
    /// Probability of `label`
    pub confidence: f32,
    pub inference_time_ms: f64,
}

impl Prediction {
    fn new(image_path: &Path, labels: &[String], probabilities: Vec<f32>, inference_time_ms: f64) -> Self {
        let (label_index, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, p)| if p > best.1 { (i, p) } else { best });

        Self {
            image_path: image_path.to_path_buf(),
            probabilities: labels.iter().cloned().zip(probabilities).collect(),
            label_index,
            label: labels.get(label_index).cloned().unwrap_or_default(),
            confidence,
            inference_time_ms,
        }
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Image: {}", self.image_path.display())?;
        for (label, p) in &self.probabilities {
            writeln!(f, "  {:<24} {:.4}", label, p)?;
        }
        write!(
            f,
            "Prediction: {} ({:.2}%)",
            self.label,
            self.confidence * 100.0
        )
    }
}

/// Predictor for running inference with a trained model
pub struct Predictor<B: Backend = DefaultBackend> {
    model: ImageClassifier<B>,
    metadata: ArtifactMetadata,
    scaler: FittedScaler,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    /// Load the artifact at `artifact_dir` on the default device
    pub fn load<P: AsRef<Path>>(artifact_dir: P) -> Result<Self> {
        Self::load_on(artifact_dir, B::Device::default())
    }

    pub fn load_on<P: AsRef<Path>>(artifact_dir: P, device: B::Device) -> Result<Self> {
        let (model, metadata) = ModelArtifact::new(artifact_dir).load::<B>(&device)?;
        let scaler = FittedScaler::from_params(metadata.scaler);

        Ok(Self {
            model,
            metadata,
            scaler,
            device,
        })
    }

    /// Label names in output order
    pub fn labels(&self) -> &[String] {
        &self.metadata.labels
    }

    pub fn metadata(&self) -> &ArtifactMetadata {
        &self.metadata
    }

    /// Classify one image file
    pub fn predict<P: AsRef<Path>>(&self, image_path: P) -> Result<Prediction> {
        let path = image_path.as_ref();
        let params = &self.metadata.model_params;

        let img = decode_image(path)?;
        let pixels = image_to_pixels(&img, params, &self.scaler);

        let start = Instant::now();
        let input = Tensor::<B, 4>::from_data(
            TensorData::new(pixels, [1, params.channels, params.height, params.width]),
            &self.device,
        );
        let probabilities: Vec<f32> = self
            .model
            .forward_softmax(input)
            .into_data()
            .convert::<f32>()
            .to_vec()
            .map_err(|e| ClassifierError::Serialization(format!("{:?}", e)))?;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        debug!("Predicted {:?} in {:.2} ms", path, elapsed_ms);
        Ok(Prediction::new(path, self.labels(), probabilities, elapsed_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::normalizer::ScalerParams;
    use crate::model::cnn::ImageClassifierConfig;
    use crate::model::config::ModelParameters;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn saved_artifact(dir: &Path) -> ImageClassifier<TestBackend> {
        let device = Default::default();
        let metadata = ArtifactMetadata::new(
            vec!["cats".to_string(), "dogs".to_string(), "owls".to_string()],
            ImageClassifierConfig::new(3).with_base_filters(4),
            ModelParameters {
                height: 8,
                width: 8,
                ..ModelParameters::default()
            },
            ScalerParams::default(),
        );
        let model = metadata.classifier.init::<TestBackend>(&device);
        ModelArtifact::new(dir).save(&model, &metadata).unwrap();
        model
    }

    fn write_image(path: &Path) {
        let img = image::RgbImage::from_fn(20, 16, |x, y| image::Rgb([(x * 10) as u8, (y * 12) as u8, 90]));
        img.save(path).unwrap();
    }

    #[test]
    fn test_predict_without_artifact_is_artifact_error() {
        let temp = TempDir::new().unwrap();
        let err = Predictor::<TestBackend>::load(temp.path().join("missing"))
            .err()
            .unwrap();
        assert!(matches!(err, ClassifierError::ArtifactIo { .. }));
    }

    #[test]
    fn test_probabilities_follow_label_order() {
        let temp = TempDir::new().unwrap();
        let model_dir = temp.path().join("model");
        saved_artifact(&model_dir);
        let image = temp.path().join("query.png");
        write_image(&image);

        let predictor = Predictor::<TestBackend>::load(&model_dir).unwrap();
        let prediction = predictor.predict(&image).unwrap();

        let labels: Vec<&str> = prediction.probabilities.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(labels, vec!["cats", "dogs", "owls"]);
        let sum: f32 = prediction.probabilities.iter().map(|(_, p)| p).sum();
        assert!((sum - 1.0).abs() < 1e-4);
        assert_eq!(prediction.label, labels[prediction.label_index]);
        assert!(prediction
            .probabilities
            .iter()
            .all(|(_, p)| *p <= prediction.confidence));
    }

    #[test]
    fn test_reloaded_model_matches_saved_model() {
        let temp = TempDir::new().unwrap();
        let model_dir = temp.path().join("model");
        let model = saved_artifact(&model_dir);
        let image = temp.path().join("query.png");
        write_image(&image);

        let predictor = Predictor::<TestBackend>::load(&model_dir).unwrap();
        let prediction = predictor.predict(&image).unwrap();

        let params = predictor.metadata().model_params.clone();
        let pixels = image_to_pixels(
            &decode_image(&image).unwrap(),
            &params,
            &FittedScaler::from_params(ScalerParams::default()),
        );
        let input = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(pixels, [1, 3, 8, 8]),
            &Default::default(),
        );
        let expected: Vec<f32> = model.forward_softmax(input).into_data().to_vec().unwrap();
        let actual: Vec<f32> = prediction.probabilities.iter().map(|(_, p)| *p).collect();
        assert_eq!(expected, actual);
    }

    #[test]
    fn test_unreadable_image_is_decode_error() {
        let temp = TempDir::new().unwrap();
        let model_dir = temp.path().join("model");
        saved_artifact(&model_dir);
        let bogus = temp.path().join("bogus.jpg");
        std::fs::write(&bogus, b"nope").unwrap();

        let predictor = Predictor::<TestBackend>::load(&model_dir).unwrap();
        let err = predictor.predict(&bogus).err().unwrap();
        assert!(matches!(err, ClassifierError::SampleDecode { .. }));
    }
}
