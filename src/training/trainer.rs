//! Training pipeline
//!
//! Drives one run from a data root to a trained model and its evaluation:
//!
//! ```text
//! Init -> TrainingBase -> TrainingAugmented(0) -> ... -> Evaluating -> Done
//!   \__________________________________________________________/
//!                              |
//!                            Failed
//! ```
//!
//! - Forward/backward passes with automatic differentiation
//! - Cross-entropy loss, Adam optimizer
//! - One stage per registered augmentation transform, strictly in order
//! - Stops at the next batch boundary when a stop is requested
//!
//! Weight updates happen on the calling thread only. Decoding runs on the
//! rayon pool and, when prefetch is enabled, one producer thread per pass.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use burn::{
    data::dataloader::batcher::Batcher,
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::dataset::augmentation::AugmentationPipeline;
use crate::dataset::burn_dataset::{decode_pool, BatchSource, ImageBatch, ImageBatcher};
use crate::dataset::loader::LabelScan;
use crate::dataset::normalizer::{ImagePreProcessingScaler, ScalerParams};
use crate::dataset::split::{Partition, Partitioner};
use crate::model::artifact::{ArtifactMetadata, ModelArtifact};
use crate::model::cnn::{ImageClassifier, ImageClassifierConfig};
use crate::model::config::{ModelParameters, TrainerParameters};
use crate::training::evaluator::{evaluate, EvaluationReport};
use crate::training::listener::{
    IterationListener, IterationStats, ProgressBarListener, ScoreListener, TimeRemainingListener,
};
use crate::utils::error::{ClassifierError, Result};
use crate::utils::metrics::RunningAverage;

/// Where a run currently is; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingPhase {
    Init,
    TrainingBase,
    /// Stage over the train split seen through transform `i`
    TrainingAugmented(usize),
    Evaluating,
    Done,
    Failed,
}

impl TrainingPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TrainingPhase::Done | TrainingPhase::Failed)
    }
}

impl fmt::Display for TrainingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingPhase::Init => write!(f, "INIT"),
            TrainingPhase::TrainingBase => write!(f, "TRAINING_BASE"),
            TrainingPhase::TrainingAugmented(i) => write!(f, "TRAINING_AUGMENTED[{}]", i),
            TrainingPhase::Evaluating => write!(f, "EVALUATING"),
            TrainingPhase::Done => write!(f, "DONE"),
            TrainingPhase::Failed => write!(f, "FAILED"),
        }
    }
}

/// Cloneable handle used to ask a running trainer to stop
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Counters of a finished run
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    /// Weight updates performed
    pub steps: usize,
    /// Weight updates expected before the run started
    pub estimated_steps: usize,
    /// Distinct training samples that could not be decoded
    pub skipped_samples: usize,
    pub phase_history: Vec<TrainingPhase>,
    pub duration: Duration,
}

/// Everything a successful run produces
pub struct TrainingOutcome<B: AutodiffBackend> {
    /// Trained network, detached from autodiff
    pub model: ImageClassifier<B::InnerBackend>,
    /// Label names in output-index order
    pub labels: Vec<String>,
    pub report: EvaluationReport,
    pub summary: TrainingSummary,
    pub partition: Partition,
    pub classifier: ImageClassifierConfig,
    pub scaler: ScalerParams,
}

impl<B: AutodiffBackend> TrainingOutcome<B> {
    pub fn metadata(&self, model_params: &ModelParameters) -> ArtifactMetadata {
        ArtifactMetadata::new(
            self.labels.clone(),
            self.classifier.clone(),
            model_params.clone(),
            self.scaler,
        )
    }

    /// Persist the model with its label order and normalization
    pub fn save(&self, artifact: &ModelArtifact, model_params: &ModelParameters) -> Result<()> {
        artifact.save(&self.model, &self.metadata(model_params))
    }
}

/// Trainer for the ImageClassifier model using Burn
pub struct Trainer<B: AutodiffBackend> {
    model_params: ModelParameters,
    trainer_params: TrainerParameters,
    classifier: Option<ImageClassifierConfig>,
    pipeline: Option<AugmentationPipeline>,
    scaler: ImagePreProcessingScaler,
    listeners: Vec<Box<dyn IterationListener>>,
    stop: StopHandle,
    phase: TrainingPhase,
    phase_history: Vec<TrainingPhase>,
    device: B::Device,
}

impl<B: AutodiffBackend> Trainer<B> {
    /// Create a trainer with the score and remaining-time listeners installed
    pub fn new(model_params: ModelParameters, trainer_params: TrainerParameters, device: B::Device) -> Self {
        let frequency = trainer_params.progress_frequency;
        let listeners: Vec<Box<dyn IterationListener>> = vec![
            Box::new(ScoreListener::new(frequency)),
            Box::new(TimeRemainingListener::new(frequency)),
        ];
        Self {
            model_params,
            trainer_params,
            classifier: None,
            pipeline: None,
            scaler: ImagePreProcessingScaler::default(),
            listeners,
            stop: StopHandle::new(),
            phase: TrainingPhase::Init,
            phase_history: vec![TrainingPhase::Init],
            device,
        }
    }

    /// Override the network shape; class and channel counts still come from the run
    pub fn with_classifier_config(mut self, config: ImageClassifierConfig) -> Self {
        self.classifier = Some(config);
        self
    }

    /// Replace the standard flip/warp/flip pipeline
    pub fn with_pipeline(mut self, pipeline: AugmentationPipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn with_scaler(mut self, scaler: ImagePreProcessingScaler) -> Self {
        self.scaler = scaler;
        self
    }

    pub fn with_listener(mut self, listener: Box<dyn IterationListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Drop every installed listener, including the default ones
    pub fn without_listeners(mut self) -> Self {
        self.listeners.clear();
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn phase(&self) -> TrainingPhase {
        self.phase
    }

    pub fn phase_history(&self) -> &[TrainingPhase] {
        &self.phase_history
    }

    fn transition(&mut self, next: TrainingPhase) {
        debug!("Phase {} -> {}", self.phase, next);
        self.phase = next;
        self.phase_history.push(next);
    }

    /// Run the whole pipeline on `trainer_params.data_path`
    pub fn run(&mut self) -> Result<TrainingOutcome<B>> {
        if self.phase != TrainingPhase::Init {
            return Err(ClassifierError::config(format!(
                "trainer already ran (phase {})",
                self.phase
            )));
        }

        match self.run_stages() {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!("Training failed in phase {}: {}", self.phase, e);
                self.transition(TrainingPhase::Failed);
                Err(e)
            }
        }
    }

    fn run_stages(&mut self) -> Result<TrainingOutcome<B>> {
        let started = Instant::now();

        // INIT
        self.model_params.validate()?;
        self.trainer_params.validate()?;

        let scan = LabelScan::new(&self.trainer_params.data_path)?;
        self.trainer_params.num_labels = scan.num_labels();

        let mut rng = ChaCha8Rng::seed_from_u64(self.model_params.seed);
        let partitioner = Partitioner::new(
            self.trainer_params.train_test_split,
            self.trainer_params.num_examples_per_class,
        )?;
        let partition = partitioner.partition(&scan, &mut rng)?;
        info!("\n{}", partition.stats());

        if partition.train.is_empty() {
            return Err(ClassifierError::config(format!(
                "no training images under {}",
                self.trainer_params.data_path.display()
            )));
        }

        let pipeline = match self.pipeline.take() {
            Some(pipeline) => pipeline,
            None => AugmentationPipeline::standard(&mut rng),
        };
        for (i, transform) in pipeline.iter().enumerate() {
            debug!("Transform {}: {}", i, transform.name());
        }

        let base = self
            .classifier
            .clone()
            .unwrap_or_else(|| ImageClassifierConfig::new(scan.num_labels()));
        let classifier = ImageClassifierConfig {
            num_classes: scan.num_labels(),
            in_channels: self.model_params.channels,
            ..base
        };

        B::seed(&self.device, self.model_params.seed);
        let mut model: ImageClassifier<B> = classifier.init(&self.device);
        let mut optimizer = AdamConfig::new().init();

        let pool = decode_pool(self.trainer_params.num_workers)?;
        let train_source = BatchSource::new(
            &partition.train,
            &self.model_params,
            self.trainer_params.batch_size,
            pool.clone(),
        )?;
        let test_source = BatchSource::new(
            &partition.test,
            &self.model_params,
            self.trainer_params.batch_size,
            pool,
        )?;

        let total = self
            .trainer_params
            .estimated_iterations(partition.train.len(), pipeline.len());
        info!(
            "Training {} samples for {} weight updates ({} stages x {} epochs x {} batches)",
            partition.train.len(),
            total,
            1 + pipeline.len(),
            self.trainer_params.epochs,
            train_source.batches_per_pass()
        );
        if self.trainer_params.ui_enabled {
            self.listeners.push(Box::new(ProgressBarListener::new(total)));
        }

        let mut progress = Progress {
            steps: 0,
            total,
            skipped: BTreeSet::new(),
            started,
        };

        // TRAINING_BASE
        self.transition(TrainingPhase::TrainingBase);
        model = self.train_stage(model, &mut optimizer, &train_source, &mut progress)?;

        // TRAINING_AUGMENTED[i]
        for (i, transform) in pipeline.iter().enumerate() {
            self.transition(TrainingPhase::TrainingAugmented(i));
            info!("Training with {}", transform.name());
            let source = train_source.with_transform(transform.clone());
            model = self.train_stage(model, &mut optimizer, &source, &mut progress)?;
        }

        // EVALUATING
        self.transition(TrainingPhase::Evaluating);
        let inference_model = model.valid();
        let test_scaler = self.scaler.fit(&test_source);
        let report = evaluate(
            &inference_model,
            &test_source,
            &test_scaler,
            &self.model_params,
            &scan.labels,
            &self.device,
        )?;

        self.transition(TrainingPhase::Done);
        let summary = TrainingSummary {
            steps: progress.steps,
            estimated_steps: total,
            skipped_samples: progress.skipped.len(),
            phase_history: self.phase_history.clone(),
            duration: started.elapsed(),
        };
        info!(
            "Training done: {} steps, {} skipped samples, accuracy {:.4}",
            summary.steps, summary.skipped_samples, report.accuracy
        );

        Ok(TrainingOutcome {
            model: inference_model,
            labels: scan.labels,
            report,
            summary,
            partition,
            classifier,
            scaler: test_scaler.params(),
        })
    }

    /// `epochs` passes over one (split, transform) source
    fn train_stage<O>(
        &mut self,
        mut model: ImageClassifier<B>,
        optimizer: &mut O,
        source: &BatchSource,
        progress: &mut Progress,
    ) -> Result<ImageClassifier<B>>
    where
        O: Optimizer<ImageClassifier<B>, B>,
    {
        let scaler = self.scaler.fit(source);
        let batcher = ImageBatcher::new(&self.model_params);
        let loss_fn = CrossEntropyLossConfig::new().init(&self.device);
        let learning_rate = self.trainer_params.learning_rate;

        for epoch in 0..self.trainer_params.epochs {
            let mut epoch_loss = RunningAverage::new();

            for batch in source.batches(&scaler, epoch, self.trainer_params.prefetch_batches) {
                if self.stop.is_stop_requested() {
                    info!("Stop requested, leaving at iteration {}", progress.steps);
                    return Err(ClassifierError::Stopped {
                        iteration: progress.steps,
                    });
                }

                progress.skipped.extend(batch.skipped.iter().cloned());
                if batch.is_empty() {
                    warn!("Batch {} has no decodable sample, no update", batch.index);
                    continue;
                }

                let batch_size = batch.len();
                let batch: ImageBatch<B> = batcher.batch(batch.items, &self.device);

                let output = model.forward(batch.images);
                let loss = loss_fn.forward(output, batch.targets);
                let loss_value: f64 = loss.clone().into_scalar().elem();

                if !loss_value.is_finite() {
                    return Err(ClassifierError::NumericDivergence {
                        iteration: progress.steps + 1,
                        last_good_iteration: progress.steps,
                    });
                }

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optimizer.step(learning_rate, model, grads);

                progress.steps += 1;
                epoch_loss.add(loss_value);

                let stats = IterationStats {
                    iteration: progress.steps,
                    total_iterations: progress.total,
                    phase: self.phase,
                    epoch,
                    loss: loss_value,
                    batch_size,
                    elapsed: progress.started.elapsed(),
                };
                for listener in self.listeners.iter_mut() {
                    listener.on_iteration_complete(&stats);
                }
            }

            info!(
                "{} epoch {}/{}: mean loss {:.4} over {} updates",
                self.phase,
                epoch + 1,
                self.trainer_params.epochs,
                epoch_loss.average(),
                epoch_loss.count()
            );
        }

        Ok(model)
    }
}

/// Counters shared by all stages of a run
struct Progress {
    steps: usize,
    total: usize,
    /// Each broken file is seen once per pass; count it once
    skipped: BTreeSet<PathBuf>,
    started: Instant,
}
