//! Post-training evaluation over the test split
//!
//! The evaluator only reads the model: it runs the inference (non-autodiff)
//! network, so dropout is off, batch norm uses its running statistics and no
//! gradient is ever recorded.

use std::fmt;

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dataset::burn_dataset::{BatchSource, ImageBatch, ImageBatcher};
use crate::dataset::normalizer::FittedScaler;
use crate::model::cnn::ImageClassifier;
use crate::model::config::ModelParameters;
use crate::utils::error::{ClassifierError, Result};
use crate::utils::metrics::{ConfusionMatrix, LabelStats};

/// Classification metrics over one full pass of a split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub labels: Vec<String>,
    /// Samples that reached the network
    pub examples: usize,
    pub correct: usize,
    pub accuracy: f64,
    pub per_label: Vec<LabelStats>,
    pub macro_precision: f64,
    pub macro_recall: f64,
    pub macro_f1: f64,
    /// Rows are actual labels, columns predicted labels
    pub confusion: ConfusionMatrix,
    /// Samples dropped because they could not be decoded
    pub skipped: usize,
}

impl EvaluationReport {
    pub fn from_confusion(labels: &[String], confusion: ConfusionMatrix, skipped: usize) -> Self {
        let per_label: Vec<LabelStats> = labels
            .iter()
            .enumerate()
            .map(|(i, label)| LabelStats::from_confusion_matrix(&confusion, i, label))
            .collect();

        // macro averages over labels that occur in the split
        let present: Vec<&LabelStats> = per_label.iter().filter(|s| s.support > 0).collect();
        let mean = |f: fn(&LabelStats) -> f64| {
            if present.is_empty() {
                0.0
            } else {
                present.iter().map(|s| f(s)).sum::<f64>() / present.len() as f64
            }
        };
        let macro_precision = mean(|s| s.precision);
        let macro_recall = mean(|s| s.recall);
        let macro_f1 = mean(|s| s.f1);

        Self {
            labels: labels.to_vec(),
            examples: confusion.total(),
            correct: confusion.correct(),
            accuracy: confusion.accuracy(),
            per_label,
            macro_precision,
            macro_recall,
            macro_f1,
            confusion,
            skipped,
        }
    }

    pub fn num_labels(&self) -> usize {
        self.labels.len()
    }
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "========================Evaluation Metrics========================")?;
        writeln!(f, " # of classes:    {}", self.num_labels())?;
        writeln!(f, " Examples:        {}", self.examples)?;
        if self.skipped > 0 {
            writeln!(f, " Skipped:         {}", self.skipped)?;
        }
        writeln!(f, " Accuracy:        {:.4}", self.accuracy)?;
        writeln!(f, " Precision:       {:.4}", self.macro_precision)?;
        writeln!(f, " Recall:          {:.4}", self.macro_recall)?;
        writeln!(f, " F1 Score:        {:.4}", self.macro_f1)?;
        writeln!(f)?;
        for stats in &self.per_label {
            writeln!(
                f,
                " {:<20} precision {:.4}  recall {:.4}  f1 {:.4}  support {}",
                stats.label, stats.precision, stats.recall, stats.f1, stats.support
            )?;
        }
        writeln!(f)?;
        writeln!(f, "=========================Confusion Matrix=========================")?;
        write!(f, "{}", self.confusion.display(&self.labels))?;
        write!(f, "==================================================================")
    }
}

fn tensor_labels<B: Backend>(tensor: Tensor<B, 1, Int>) -> Result<Vec<i64>> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec()
        .map_err(|e| ClassifierError::Serialization(format!("{:?}", e)))
}

/// Run `model` once over every batch of `source` and tally predictions
pub fn evaluate<B: Backend>(
    model: &ImageClassifier<B>,
    source: &BatchSource,
    scaler: &FittedScaler,
    params: &ModelParameters,
    labels: &[String],
    device: &B::Device,
) -> Result<EvaluationReport> {
    info!("Evaluating on {}", source.describe());

    let batcher = ImageBatcher::new(params);
    let mut confusion = ConfusionMatrix::new(labels.len());
    let mut skipped = 0;

    for batch in source.iter(scaler, 0) {
        skipped += batch.skipped.len();
        if batch.is_empty() {
            warn!("Batch {} has no decodable sample", batch.index);
            continue;
        }

        let batch: ImageBatch<B> = batcher.batch(batch.items, device);
        let n = batch.targets.dims()[0];
        let predicted = model.forward(batch.images).argmax(1).reshape([n]);

        let predicted = tensor_labels(predicted)?;
        let actual = tensor_labels(batch.targets)?;
        for (a, p) in actual.iter().zip(predicted.iter()) {
            confusion.add(*a as usize, *p as usize);
        }
    }

    let report = EvaluationReport::from_confusion(labels, confusion, skipped);
    debug!(
        "Evaluation done: {}/{} correct, {} skipped",
        report.correct, report.examples, report.skipped
    );
    Ok(report)
}
