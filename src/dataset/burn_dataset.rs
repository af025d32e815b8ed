//! Batch iteration and Burn integration
//!
//! A [`BatchSource`] is a (split, optional transform) pair. Iterating it decodes
//! images on a rayon pool, applies the transform, resizes to the model
//! geometry and rescales pixels, yielding one [`DecodedBatch`] per
//! `batch_size` samples. [`ImageBatcher`] turns a decoded batch into tensors.
//!
//! ## Failure policy
//!
//! A sample that cannot be read or decoded is skipped with a warning and
//! counted in [`DecodedBatch::skipped`]. The batch is still yielded (possibly
//! empty) so a pass always has `ceil(len / batch_size)` batches.
//!
//! ## Prefetch
//!
//! [`BatchSource::batches`] with a non-zero depth decodes on a background
//! thread feeding a bounded channel; the training step consumes batches in
//! production order.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::warn;

use crate::dataset::augmentation::ImageTransform;
use crate::dataset::loader::LabeledSample;
use crate::dataset::normalizer::FittedScaler;
use crate::model::config::ModelParameters;
use crate::utils::error::{ClassifierError, Result};

/// Rayon pool used for decoding
pub fn decode_pool(num_workers: usize) -> Result<Arc<ThreadPool>> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_workers.max(1))
        .thread_name(|i| format!("decode-{}", i))
        .build()
        .map(Arc::new)
        .map_err(|e| ClassifierError::config(format!("cannot start decode workers: {e}")))
}

/// Read and decode an image file
pub fn decode_image(path: &Path) -> Result<DynamicImage> {
    ImageReader::open(path)
        .map_err(|e| ClassifierError::decode(path, e))?
        .with_guessed_format()
        .map_err(|e| ClassifierError::decode(path, e))?
        .decode()
        .map_err(|e| ClassifierError::decode(path, e))
}

/// Resize to the model geometry and rescale into a flattened CHW vector
pub fn image_to_pixels(img: &DynamicImage, params: &ModelParameters, scaler: &FittedScaler) -> Vec<f32> {
    let (width, height) = (params.width, params.height);
    let resized = img.resize_exact(width as u32, height as u32, FilterType::Triangle);
    let plane = width * height;
    let mut pixels = vec![0.0f32; params.channels * plane];

    let mut write = |channel_values: &[u8], i: usize| {
        for (c, &v) in channel_values.iter().enumerate() {
            pixels[c * plane + i] = scaler.scale(v);
        }
    };

    match params.channels {
        1 => {
            for (i, p) in resized.to_luma8().pixels().enumerate() {
                write(&p.0, i);
            }
        }
        4 => {
            for (i, p) in resized.to_rgba8().pixels().enumerate() {
                write(&p.0, i);
            }
        }
        _ => {
            for (i, p) in resized.to_rgb8().pixels().enumerate() {
                write(&p.0, i);
            }
        }
    }

    pixels
}

/// One normalized image ready for batching
#[derive(Clone, Debug)]
pub struct ImageItem {
    /// Flattened CHW pixels in the scaler range
    pub pixels: Vec<f32>,
    /// Label index
    pub label: usize,
    pub path: PathBuf,
}

impl ImageItem {
    /// Decode, transform, resize and normalize one sample
    pub fn load(
        sample: &LabeledSample,
        transform: Option<(&dyn ImageTransform, usize, usize)>,
        params: &ModelParameters,
        scaler: &FittedScaler,
    ) -> Result<Self> {
        let img = decode_image(&sample.path)?;
        let img = match transform {
            Some((t, epoch, index)) => t.apply_to_sample(&img, epoch, index),
            None => img,
        };

        Ok(Self {
            pixels: image_to_pixels(&img, params, scaler),
            label: sample.label_index,
            path: sample.path.clone(),
        })
    }
}

/// Decoded samples of one batch
#[derive(Debug, Clone)]
pub struct DecodedBatch {
    /// Position of this batch in its pass
    pub index: usize,
    pub items: Vec<ImageItem>,
    /// Paths of the samples dropped because they could not be decoded
    pub skipped: Vec<PathBuf>,
}

impl DecodedBatch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A split, optionally paired with a transform, to be cut into batches
#[derive(Clone)]
pub struct BatchSource {
    samples: Arc<Vec<LabeledSample>>,
    transform: Option<Arc<dyn ImageTransform>>,
    params: ModelParameters,
    batch_size: usize,
    pool: Arc<ThreadPool>,
}

impl std::fmt::Debug for BatchSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchSource")
            .field("len", &self.samples.len())
            .field("transform", &self.transform.as_ref().map(|t| t.name().to_string()))
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl BatchSource {
    pub fn new(
        samples: &[LabeledSample],
        params: &ModelParameters,
        batch_size: usize,
        pool: Arc<ThreadPool>,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(ClassifierError::config("batch size must be greater than 0"));
        }
        Ok(Self {
            samples: Arc::new(samples.to_vec()),
            transform: None,
            params: params.clone(),
            batch_size,
            pool,
        })
    }

    /// Same split, seen through `transform`
    pub fn with_transform(&self, transform: Arc<dyn ImageTransform>) -> Self {
        Self {
            transform: Some(transform),
            ..self.clone()
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn batches_per_pass(&self) -> usize {
        self.samples.len().div_ceil(self.batch_size)
    }

    /// Human-readable summary used in logs
    pub fn describe(&self) -> String {
        match &self.transform {
            Some(t) => format!("{} samples with {}", self.samples.len(), t.name()),
            None => format!("{} samples without transform", self.samples.len()),
        }
    }

    /// Fresh iterator over pass `epoch`, starting at the first batch
    pub fn iter(&self, scaler: &FittedScaler, epoch: usize) -> BatchIterator {
        BatchIterator {
            source: self.clone(),
            scaler: *scaler,
            epoch,
            position: 0,
            batch_index: 0,
        }
    }

    /// Decode pass `epoch` on a background thread, at most `depth` batches ahead
    pub fn prefetch(&self, scaler: &FittedScaler, epoch: usize, depth: usize) -> PrefetchIterator {
        PrefetchIterator::spawn(self.iter(scaler, epoch), depth.max(1))
    }

    /// Iterator over pass `epoch`, prefetching when `prefetch_depth` is non-zero
    pub fn batches(
        &self,
        scaler: &FittedScaler,
        epoch: usize,
        prefetch_depth: usize,
    ) -> Box<dyn Iterator<Item = DecodedBatch> + Send> {
        if prefetch_depth == 0 {
            Box::new(self.iter(scaler, epoch))
        } else {
            Box::new(self.prefetch(scaler, epoch, prefetch_depth))
        }
    }

    fn decode_range(&self, start: usize, end: usize, scaler: &FittedScaler, epoch: usize) -> DecodedBatch {
        let transform = self.transform.as_deref();
        let params = &self.params;

        let results: Vec<Result<ImageItem>> = self.pool.install(|| {
            (start..end)
                .into_par_iter()
                .map(|index| {
                    let sample = &self.samples[index];
                    ImageItem::load(sample, transform.map(|t| (t, epoch, index)), params, scaler)
                })
                .collect()
        });

        let mut items = Vec::with_capacity(results.len());
        let mut skipped = Vec::new();
        for (sample, result) in self.samples[start..end].iter().zip(results) {
            match result {
                Ok(item) => items.push(item),
                Err(e) if e.is_recoverable() => {
                    warn!("Skipping sample: {}", e);
                    skipped.push(sample.path.clone());
                }
                Err(e) => {
                    warn!("Skipping sample after unexpected error: {}", e);
                    skipped.push(sample.path.clone());
                }
            }
        }

        DecodedBatch {
            index: start / self.batch_size,
            items,
            skipped,
        }
    }
}

/// Sequential batch iterator over one pass
pub struct BatchIterator {
    source: BatchSource,
    scaler: FittedScaler,
    epoch: usize,
    position: usize,
    batch_index: usize,
}

impl BatchIterator {
    /// Batches not yet produced
    pub fn remaining(&self) -> usize {
        self.source.len().saturating_sub(self.position).div_ceil(self.source.batch_size)
    }
}

impl Iterator for BatchIterator {
    type Item = DecodedBatch;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.source.len() {
            return None;
        }

        let end = (self.position + self.source.batch_size).min(self.source.len());
        let batch = self
            .source
            .decode_range(self.position, end, &self.scaler, self.epoch);
        debug_assert_eq!(batch.index, self.batch_index);

        self.position = end;
        self.batch_index += 1;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

/// Bounded producer/consumer wrapper around a [`BatchIterator`]
pub struct PrefetchIterator {
    receiver: Option<Receiver<DecodedBatch>>,
    producer: Option<JoinHandle<()>>,
}

impl PrefetchIterator {
    pub fn spawn(iter: BatchIterator, depth: usize) -> Self {
        let (sender, receiver) = mpsc::sync_channel(depth);
        let producer = std::thread::spawn(move || {
            for batch in iter {
                // receiver dropped: the consumer stopped early
                if sender.send(batch).is_err() {
                    break;
                }
            }
        });

        Self {
            receiver: Some(receiver),
            producer: Some(producer),
        }
    }
}

impl Iterator for PrefetchIterator {
    type Item = DecodedBatch;

    fn next(&mut self) -> Option<Self::Item> {
        self.receiver.as_ref()?.recv().ok()
    }
}

impl Drop for PrefetchIterator {
    fn drop(&mut self) {
        // Unblock a producer waiting on a full channel before joining it
        self.receiver.take();
        if let Some(handle) = self.producer.take() {
            if handle.join().is_err() {
                warn!("Prefetch thread panicked");
            }
        }
    }
}

/// Tensors for one training or evaluation step
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// Images with shape [batch_size, channels, height, width]
    pub images: Tensor<B, 4>,
    /// Label indices with shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

/// Builds [`ImageBatch`]es for a fixed geometry
#[derive(Clone, Debug)]
pub struct ImageBatcher {
    channels: usize,
    height: usize,
    width: usize,
}

impl ImageBatcher {
    pub fn new(params: &ModelParameters) -> Self {
        Self {
            channels: params.channels,
            height: params.height,
            width: params.width,
        }
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let mut pixels = Vec::with_capacity(batch_size * self.channels * self.height * self.width);
        let mut labels: Vec<i64> = Vec::with_capacity(batch_size);

        for item in items {
            pixels.extend_from_slice(&item.pixels);
            labels.push(item.label as i64);
        }

        let images = Tensor::<B, 4>::from_data(
            TensorData::new(pixels, [batch_size, self.channels, self.height, self.width]),
            device,
        );
        let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [batch_size]), device);

        ImageBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::augmentation::FlipTransform;
    use crate::dataset::loader::tests::write_label_images;
    use crate::dataset::loader::LabelScan;
    use crate::dataset::normalizer::ImagePreProcessingScaler;
    use burn_ndarray::NdArray;
    use std::fs;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn small_params() -> ModelParameters {
        ModelParameters {
            height: 8,
            width: 6,
            ..ModelParameters::default()
        }
    }

    fn samples(temp: &TempDir, count: usize) -> Vec<LabeledSample> {
        write_label_images(temp.path(), "cats", count);
        let mut scan = LabelScan::new(temp.path()).unwrap();
        scan.samples_by_label.remove(0)
    }

    #[test]
    fn test_batch_counts_and_partial_last_batch() {
        let temp = TempDir::new().unwrap();
        let samples = samples(&temp, 10);
        let source = BatchSource::new(&samples, &small_params(), 4, decode_pool(2).unwrap()).unwrap();
        let scaler = ImagePreProcessingScaler::default().fit(&source);

        let batches: Vec<DecodedBatch> = source.iter(&scaler, 0).collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(source.batches_per_pass(), 3);
        assert_eq!(
            batches.iter().map(|b| b.len()).collect::<Vec<_>>(),
            vec![4, 4, 2]
        );
        assert!(batches.iter().all(|b| b.skipped.is_empty()));
        assert_eq!(batches[2].index, 2);
    }

    #[test]
    fn test_pixels_are_normalized() {
        let temp = TempDir::new().unwrap();
        let samples = samples(&temp, 3);
        let params = small_params();
        let source = BatchSource::new(&samples, &params, 2, decode_pool(1).unwrap()).unwrap();
        let scaler = ImagePreProcessingScaler::default().fit(&source);

        for batch in source.iter(&scaler, 0) {
            for item in batch.items {
                assert_eq!(item.pixels.len(), params.pixels_per_image());
                assert!(item.pixels.iter().all(|v| (0.0..=1.0).contains(v)));
            }
        }
    }

    #[test]
    fn test_restartable_and_deterministic() {
        let temp = TempDir::new().unwrap();
        let samples = samples(&temp, 5);
        let pool = decode_pool(3).unwrap();
        let base = BatchSource::new(&samples, &small_params(), 2, pool).unwrap();
        let source = base.with_transform(Arc::new(FlipTransform::new(11)));
        let scaler = ImagePreProcessingScaler::default().fit(&source);

        let first: Vec<Vec<f32>> = source
            .iter(&scaler, 1)
            .flat_map(|b| b.items.into_iter().map(|i| i.pixels))
            .collect();
        let second: Vec<Vec<f32>> = source
            .iter(&scaler, 1)
            .flat_map(|b| b.items.into_iter().map(|i| i.pixels))
            .collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 5);
    }

    #[test]
    fn test_corrupt_sample_is_skipped_and_counted() {
        let temp = TempDir::new().unwrap();
        let mut samples = samples(&temp, 3);
        let broken = temp.path().join("cats").join("broken.jpg");
        fs::write(&broken, b"definitely not a jpeg").unwrap();
        samples.push(LabeledSample {
            path: broken.clone(),
            label: "cats".to_string(),
            label_index: 0,
        });

        let source = BatchSource::new(&samples, &small_params(), 2, decode_pool(2).unwrap()).unwrap();
        let scaler = ImagePreProcessingScaler::default().fit(&source);
        let batches: Vec<DecodedBatch> = source.iter(&scaler, 0).collect();

        assert_eq!(batches.len(), 2);
        assert_eq!(batches.iter().map(|b| b.skipped.len()).sum::<usize>(), 1);
        assert_eq!(batches[1].skipped, vec![broken]);
        assert_eq!(batches.iter().map(|b| b.len()).sum::<usize>(), 3);
    }

    #[test]
    fn test_prefetch_preserves_order() {
        let temp = TempDir::new().unwrap();
        let samples = samples(&temp, 7);
        let source = BatchSource::new(&samples, &small_params(), 2, decode_pool(2).unwrap()).unwrap();
        let scaler = ImagePreProcessingScaler::default().fit(&source);

        let inline: Vec<PathBuf> = source
            .batches(&scaler, 0, 0)
            .flat_map(|b| b.items.into_iter().map(|i| i.path))
            .collect();
        let prefetched: Vec<DecodedBatch> = source.batches(&scaler, 0, 2).collect();

        assert_eq!(prefetched.len(), 4);
        assert_eq!(
            prefetched.iter().map(|b| b.index).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        let paths: Vec<PathBuf> = prefetched
            .into_iter()
            .flat_map(|b| b.items.into_iter().map(|i| i.path))
            .collect();
        assert_eq!(inline, paths);
    }

    #[test]
    fn test_prefetch_can_be_dropped_early() {
        let temp = TempDir::new().unwrap();
        let samples = samples(&temp, 9);
        let source = BatchSource::new(&samples, &small_params(), 1, decode_pool(1).unwrap()).unwrap();
        let scaler = ImagePreProcessingScaler::default().fit(&source);

        let mut batches = source.batches(&scaler, 0, 1);
        assert!(batches.next().is_some());
        drop(batches);
    }

    #[test]
    fn test_batcher_shapes() {
        let params = small_params();
        let device = Default::default();
        let items: Vec<ImageItem> = (0..3)
            .map(|i| ImageItem {
                pixels: vec![0.5; params.pixels_per_image()],
                label: i % 2,
                path: PathBuf::from(format!("{}.png", i)),
            })
            .collect();

        let batch: ImageBatch<TestBackend> = ImageBatcher::new(&params).batch(items, &device);
        assert_eq!(batch.images.dims(), [3, 3, 8, 6]);
        assert_eq!(batch.targets.dims(), [3]);
    }
}
