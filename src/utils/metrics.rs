//! Classification metrics
//!
//! Confusion matrix and per-label counts shared by the evaluator and the
//! training loop.

use serde::{Deserialize, Serialize};

/// Confusion matrix for multi-class classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Number of classes
    pub num_classes: usize,

    /// Row-major counts, row = actual, column = predicted
    pub matrix: Vec<usize>,
}

impl Default for ConfusionMatrix {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ConfusionMatrix {
    /// Create a new empty confusion matrix
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    /// Build from parallel slices of predictions and ground truth
    pub fn from_predictions(predictions: &[usize], ground_truth: &[usize], num_classes: usize) -> Self {
        let mut cm = Self::new(num_classes);
        for (&pred, &actual) in predictions.iter().zip(ground_truth.iter()) {
            cm.add(actual, pred);
        }
        cm
    }

    /// Record a single prediction; out-of-range indices are ignored
    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted] += 1;
        }
    }

    /// Count at (actual, predicted)
    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted]
        } else {
            0
        }
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    /// Diagonal sum
    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total > 0 {
            self.correct() as f64 / total as f64
        } else {
            0.0
        }
    }

    /// Actual examples per class
    pub fn row_sums(&self) -> Vec<usize> {
        (0..self.num_classes)
            .map(|row| (0..self.num_classes).map(|col| self.get(row, col)).sum())
            .collect()
    }

    /// Predictions per class
    pub fn col_sums(&self) -> Vec<usize> {
        (0..self.num_classes)
            .map(|col| (0..self.num_classes).map(|row| self.get(row, col)).sum())
            .collect()
    }

    /// Render the matrix with label names as row/column headers
    pub fn display(&self, labels: &[String]) -> String {
        let mut output = String::new();
        output.push_str("Confusion Matrix (rows=actual, cols=predicted):\n\n");

        let short = |idx: usize, width: usize| -> String {
            let name = labels.get(idx).map(|s| s.as_str()).unwrap_or("?");
            name.chars().take(width).collect()
        };

        output.push_str(&" ".repeat(13));
        for col in 0..self.num_classes {
            output.push_str(&format!("{:>7}", short(col, 6)));
        }
        output.push('\n');

        for row in 0..self.num_classes {
            output.push_str(&format!("{:>12} ", short(row, 12)));
            for col in 0..self.num_classes {
                let count = self.get(row, col);
                if row == col {
                    output.push_str(&format!(" [{:>4}]", count));
                } else if count > 0 {
                    output.push_str(&format!("  {:>4} ", count));
                } else {
                    output.push_str("     . ");
                }
            }
            output.push('\n');
        }

        output
    }
}

/// Per-label counts derived from a confusion matrix
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelStats {
    pub label: String,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    /// TP / (TP + FP), 0 when the label was never predicted
    pub precision: f64,
    /// TP / (TP + FN), 0 when the label never occurs
    pub recall: f64,
    pub f1: f64,
    /// Actual examples of this label
    pub support: usize,
}

impl LabelStats {
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class_idx: usize, label: &str) -> Self {
        let true_positives = cm.get(class_idx, class_idx);

        let false_positives: usize = (0..cm.num_classes)
            .filter(|&i| i != class_idx)
            .map(|i| cm.get(i, class_idx))
            .sum();

        let false_negatives: usize = (0..cm.num_classes)
            .filter(|&i| i != class_idx)
            .map(|i| cm.get(class_idx, i))
            .sum();

        let ratio = |num: usize, den: usize| if den > 0 { num as f64 / den as f64 } else { 0.0 };
        let precision = ratio(true_positives, true_positives + false_positives);
        let recall = ratio(true_positives, true_positives + false_negatives);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            label: label.to_string(),
            true_positives,
            false_positives,
            false_negatives,
            precision,
            recall,
            f1,
            support: true_positives + false_negatives,
        }
    }
}

/// Running mean of a scalar, used for per-pass loss
#[derive(Debug, Clone, Default)]
pub struct RunningAverage {
    sum: f64,
    count: usize,
}

impl RunningAverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn average(&self) -> f64 {
        if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_matrix_counts() {
        let predictions = vec![0, 0, 1, 1, 2, 1];
        let truth = vec![0, 1, 1, 1, 2, 2];
        let cm = ConfusionMatrix::from_predictions(&predictions, &truth, 3);

        assert_eq!(cm.total(), 6);
        assert_eq!(cm.correct(), 4);
        assert_eq!(cm.get(1, 0), 1);
        assert_eq!(cm.get(2, 1), 1);
        assert_eq!(cm.row_sums(), vec![1, 3, 2]);
        assert_eq!(cm.col_sums(), vec![2, 3, 1]);
        assert!((cm.accuracy() - 4.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_range_is_ignored() {
        let mut cm = ConfusionMatrix::new(2);
        cm.add(5, 0);
        cm.add(0, 7);
        assert_eq!(cm.total(), 0);
        assert_eq!(cm.accuracy(), 0.0);
    }

    #[test]
    fn test_label_stats() {
        let predictions = vec![0, 0, 1, 1];
        let truth = vec![0, 1, 1, 1];
        let cm = ConfusionMatrix::from_predictions(&predictions, &truth, 2);

        let cats = LabelStats::from_confusion_matrix(&cm, 0, "cats");
        assert_eq!(cats.true_positives, 1);
        assert_eq!(cats.false_positives, 1);
        assert_eq!(cats.false_negatives, 0);
        assert!((cats.precision - 0.5).abs() < 1e-9);
        assert!((cats.recall - 1.0).abs() < 1e-9);
        assert_eq!(cats.support, 1);

        let dogs = LabelStats::from_confusion_matrix(&cm, 1, "dogs");
        assert_eq!(dogs.support, 3);
        assert!((dogs.precision - 1.0).abs() < 1e-9);
        assert!((dogs.recall - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_display_uses_label_names() {
        let cm = ConfusionMatrix::from_predictions(&[0, 1], &[0, 1], 2);
        let text = cm.display(&["cats".to_string(), "dogs".to_string()]);
        assert!(text.contains("cats"));
        assert!(text.contains("[   1]"));
    }

    #[test]
    fn test_running_average() {
        let mut avg = RunningAverage::new();
        assert_eq!(avg.average(), 0.0);
        avg.add(1.0);
        avg.add(3.0);
        assert_eq!(avg.count(), 2);
        assert!((avg.average() - 2.0).abs() < 1e-12);
    }
}
