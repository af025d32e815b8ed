//! Balanced train/test partitioning
//!
//! Each label contributes at most `examples_per_class` files, picked after a
//! seeded shuffle. The per-label lists are then interleaved round-robin so no
//! label is clustered at either end, and the sequence is cut at
//! `floor(ratio × selected)`: the head is the train split, the tail the test split.
//!
//! Labels with fewer files than the cap contribute everything they have.
//! The partition is a pure function of (scan, seed stream, ratio, cap).

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dataset::loader::{LabelScan, LabeledSample};
use crate::utils::error::{ClassifierError, Result};

/// Partitioning settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partitioner {
    /// Fraction of the selected samples that goes to the train split
    pub train_test_split: f64,
    /// Per-label cap
    pub examples_per_class: usize,
}

impl Partitioner {
    pub fn new(train_test_split: f64, examples_per_class: usize) -> Result<Self> {
        if !(train_test_split > 0.0 && train_test_split < 1.0) {
            return Err(ClassifierError::config(format!(
                "train/test split must be in (0, 1), got {}",
                train_test_split
            )));
        }
        if examples_per_class == 0 {
            return Err(ClassifierError::config(
                "per-class sample cap must be greater than 0",
            ));
        }
        Ok(Self {
            train_test_split,
            examples_per_class,
        })
    }

    /// Partition a scanned tree, drawing randomness from `rng`.
    ///
    /// `rng` is the run's main random stream; later consumers see it advanced.
    pub fn partition(&self, scan: &LabelScan, rng: &mut ChaCha8Rng) -> Result<Partition> {
        if scan.labels.is_empty() {
            return Err(ClassifierError::config("cannot partition zero labels"));
        }

        let selected_by_label: Vec<Vec<LabeledSample>> = scan
            .samples_by_label
            .iter()
            .map(|samples| {
                let mut samples = samples.clone();
                samples.shuffle(&mut *rng);
                samples.truncate(self.examples_per_class);
                samples
            })
            .collect();

        for (label, selected) in scan.labels.iter().zip(&selected_by_label) {
            if selected.len() < self.examples_per_class {
                debug!(
                    "Label '{}' has {} files, below the cap of {}",
                    label,
                    selected.len(),
                    self.examples_per_class
                );
            }
        }

        let interleaved = interleave(selected_by_label);
        let cut = (self.train_test_split * interleaved.len() as f64).floor() as usize;
        let mut train = interleaved;
        let test = train.split_off(cut);

        info!(
            "Partitioned {} samples: {} train / {} test",
            train.len() + test.len(),
            train.len(),
            test.len()
        );

        Ok(Partition {
            labels: scan.labels.clone(),
            train,
            test,
        })
    }
}

/// Round-robin merge: first file of every label, then the second, and so on
fn interleave(per_label: Vec<Vec<LabeledSample>>) -> Vec<LabeledSample> {
    let total = per_label.iter().map(|v| v.len()).sum();
    let longest = per_label.iter().map(|v| v.len()).max().unwrap_or(0);
    let mut out = Vec::with_capacity(total);

    let mut queues: Vec<_> = per_label.into_iter().map(|v| v.into_iter()).collect();
    for _ in 0..longest {
        for queue in queues.iter_mut() {
            if let Some(sample) = queue.next() {
                out.push(sample);
            }
        }
    }
    out
}

/// Disjoint train/test splits over the selected samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    /// Label names in index order
    pub labels: Vec<String>,
    pub train: Vec<LabeledSample>,
    pub test: Vec<LabeledSample>,
}

impl Partition {
    pub fn num_labels(&self) -> usize {
        self.labels.len()
    }

    pub fn selected(&self) -> usize {
        self.train.len() + self.test.len()
    }

    pub fn stats(&self) -> PartitionStats {
        let mut per_label: BTreeMap<String, (usize, usize)> = self
            .labels
            .iter()
            .map(|l| (l.clone(), (0, 0)))
            .collect();
        for sample in &self.train {
            per_label.entry(sample.label.clone()).or_default().0 += 1;
        }
        for sample in &self.test {
            per_label.entry(sample.label.clone()).or_default().1 += 1;
        }

        PartitionStats {
            selected: self.selected(),
            train: self.train.len(),
            test: self.test.len(),
            per_label,
        }
    }

    /// Save the partition to a JSON file for reproducibility audits
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a partition saved with [`save_json`](Self::save_json)
    pub fn load_json(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Counts for console reporting
#[derive(Debug, Clone)]
pub struct PartitionStats {
    pub selected: usize,
    pub train: usize,
    pub test: usize,
    /// label -> (train, test)
    pub per_label: BTreeMap<String, (usize, usize)>,
}

impl fmt::Display for PartitionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Number of images selected : {}", self.selected)?;
        writeln!(f, "Number of images in the trainData dataset : {}", self.train)?;
        writeln!(f, "Number of images in the testData dataset : {}", self.test)?;
        for (label, (train, test)) in &self.per_label {
            writeln!(f, "  {:<24} train {:>5}  test {:>5}", label, train, test)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::loader::tests::write_label_images;
    use rand::SeedableRng;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn synthetic_scan(counts: &[(&str, usize)]) -> LabelScan {
        let labels: Vec<String> = counts.iter().map(|(l, _)| l.to_string()).collect();
        let samples_by_label = counts
            .iter()
            .enumerate()
            .map(|(idx, (label, n))| {
                (0..*n)
                    .map(|i| LabeledSample {
                        path: PathBuf::from(format!("{}/{:03}.jpg", label, i)),
                        label: label.to_string(),
                        label_index: idx,
                    })
                    .collect()
            })
            .collect();
        LabelScan {
            root: PathBuf::from("root"),
            labels,
            samples_by_label,
        }
    }

    #[test]
    fn test_cats_and_dogs_scenario() {
        let temp = TempDir::new().unwrap();
        write_label_images(temp.path(), "cats", 12);
        write_label_images(temp.path(), "dogs", 12);
        let scan = LabelScan::new(temp.path()).unwrap();

        let partitioner = Partitioner::new(0.8, 10).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let partition = partitioner.partition(&scan, &mut rng).unwrap();

        assert_eq!(partition.selected(), 20);
        assert_eq!(partition.train.len(), 16);
        assert_eq!(partition.test.len(), 4);

        let stats = partition.stats();
        assert_eq!(stats.per_label["cats"].0 + stats.per_label["cats"].1, 10);
        assert_eq!(stats.per_label["dogs"].0 + stats.per_label["dogs"].1, 10);
    }

    #[test]
    fn test_disjoint_and_bounded() {
        let scan = synthetic_scan(&[("a", 30), ("b", 4), ("c", 17)]);
        let partitioner = Partitioner::new(0.7, 10).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let partition = partitioner.partition(&scan, &mut rng).unwrap();

        let train: HashSet<_> = partition.train.iter().map(|s| &s.path).collect();
        let test: HashSet<_> = partition.test.iter().map(|s| &s.path).collect();
        assert!(train.is_disjoint(&test));
        assert_eq!(train.len() + test.len(), partition.selected());

        // under-filled label degrades gracefully
        assert_eq!(partition.selected(), 10 + 4 + 10);
        assert!(partition.selected() <= scan.num_labels() * 10);
        assert_eq!(partition.train.len(), (0.7f64 * 24.0).floor() as usize);
    }

    #[test]
    fn test_same_seed_same_partition() {
        let scan = synthetic_scan(&[("x", 50), ("y", 50)]);
        let partitioner = Partitioner::new(0.8, 25).unwrap();

        let first = partitioner
            .partition(&scan, &mut ChaCha8Rng::seed_from_u64(42))
            .unwrap();
        let second = partitioner
            .partition(&scan, &mut ChaCha8Rng::seed_from_u64(42))
            .unwrap();
        let other = partitioner
            .partition(&scan, &mut ChaCha8Rng::seed_from_u64(43))
            .unwrap();

        assert_eq!(first, second);
        assert_ne!(first.train, other.train);
    }

    #[test]
    fn test_labels_are_interleaved() {
        let scan = synthetic_scan(&[("x", 5), ("y", 5)]);
        let partitioner = Partitioner::new(0.5, 5).unwrap();
        let partition = partitioner
            .partition(&scan, &mut ChaCha8Rng::seed_from_u64(1))
            .unwrap();

        let order: Vec<usize> = partition
            .train
            .iter()
            .chain(partition.test.iter())
            .map(|s| s.label_index)
            .collect();
        assert_eq!(order, vec![0, 1, 0, 1, 0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn test_invalid_settings() {
        assert!(Partitioner::new(0.0, 10).is_err());
        assert!(Partitioner::new(1.0, 10).is_err());
        assert!(Partitioner::new(0.5, 0).is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let temp = TempDir::new().unwrap();
        let scan = synthetic_scan(&[("x", 3), ("y", 3)]);
        let partition = Partitioner::new(0.5, 3)
            .unwrap()
            .partition(&scan, &mut ChaCha8Rng::seed_from_u64(3))
            .unwrap();

        let path = temp.path().join("partition.json");
        partition.save_json(&path).unwrap();
        assert_eq!(Partition::load_json(&path).unwrap(), partition);
    }
}
