//! Label-per-directory scanner
//!
//! Discovers labels (immediate subdirectories of the data root) and the image
//! files inside each of them. No image is opened here; decoding happens in
//! the batch iterator.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::utils::error::{ClassifierError, Result};

/// File extensions accepted as images (compared case-insensitively)
pub const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif", "tif", "tiff"];

/// One image file and the label taken from its parent directory
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabeledSample {
    /// Path to the image file
    pub path: PathBuf,
    /// Label name (the parent directory name)
    pub label: String,
    /// Position of `label` in the sorted label list
    pub label_index: usize,
}

/// Check a path against [`ALLOWED_EXTENSIONS`]
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Sorted names of the immediate subdirectories of `root`.
///
/// Fails with a configuration error when `root` is missing, is not a
/// directory, or has no subdirectory. Only the root listing is read.
pub fn list_labels(root: &Path) -> Result<Vec<String>> {
    if !root.exists() {
        return Err(ClassifierError::config(format!(
            "data root does not exist: {}",
            root.display()
        )));
    }
    if !root.is_dir() {
        return Err(ClassifierError::config(format!(
            "data root is not a directory: {}",
            root.display()
        )));
    }

    let mut labels = Vec::new();
    let entries = std::fs::read_dir(root).map_err(|e| {
        ClassifierError::config(format!("cannot list data root {}: {e}", root.display()))
    })?;
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            let name = entry.file_name();
            match name.to_str() {
                Some(name) => labels.push(name.to_string()),
                None => {
                    return Err(ClassifierError::config(format!(
                        "label directory {} is not valid UTF-8",
                        entry.path().display()
                    )))
                }
            }
        }
    }
    labels.sort();

    if labels.is_empty() {
        return Err(ClassifierError::config(format!(
            "data root {} contains no label directories",
            root.display()
        )));
    }

    Ok(labels)
}

/// All image files of a data root grouped by label
#[derive(Debug, Clone)]
pub struct LabelScan {
    pub root: PathBuf,
    /// Label names in index order
    pub labels: Vec<String>,
    /// Samples per label, same order as `labels`, paths sorted
    pub samples_by_label: Vec<Vec<LabeledSample>>,
}

impl LabelScan {
    /// Scan a data root
    ///
    /// The directory should be structured as:
    /// ```text
    /// root/
    /// ├── cats/
    /// │   ├── 001.jpg
    /// │   └── 002.png
    /// └── dogs/
    ///     └── ...
    /// ```
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        info!("Scanning image tree at {:?}", root);

        let labels = list_labels(&root)?;
        info!("Found {} labels", labels.len());

        let mut samples_by_label = Vec::with_capacity(labels.len());
        for (label_index, label) in labels.iter().enumerate() {
            let mut samples: Vec<LabeledSample> = WalkDir::new(root.join(label))
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file() && is_image_file(e.path()))
                .map(|e| LabeledSample {
                    path: e.path().to_path_buf(),
                    label: label.clone(),
                    label_index,
                })
                .collect();
            // read_dir order is platform dependent; sort so the seeded shuffle is reproducible
            samples.sort_by(|a, b| a.path.cmp(&b.path));

            debug!("Label '{}' (index {}): {} files", label, label_index, samples.len());
            samples_by_label.push(samples);
        }

        Ok(Self {
            root,
            labels,
            samples_by_label,
        })
    }

    pub fn num_labels(&self) -> usize {
        self.labels.len()
    }

    pub fn total_samples(&self) -> usize {
        self.samples_by_label.iter().map(|s| s.len()).sum()
    }

    /// File count per label name
    pub fn stats(&self) -> BTreeMap<String, usize> {
        self.labels
            .iter()
            .cloned()
            .zip(self.samples_by_label.iter().map(|s| s.len()))
            .collect()
    }
}
