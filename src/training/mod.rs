//! Training module: the training loop, its observers and evaluation
//!
//! This module provides:
//! - The staged training pipeline (base pass, then one stage per transform)
//! - Per-iteration listeners for score, remaining time and a progress bar
//! - Evaluation of the trained network on the test split

pub mod evaluator;
pub mod listener;
pub mod trainer;

// Re-export main types for convenience
pub use evaluator::{evaluate, EvaluationReport};
pub use listener::{
    IterationListener, IterationStats, ProgressBarListener, ScoreListener, TimeRemainingListener,
};
pub use trainer::{StopHandle, Trainer, TrainingOutcome, TrainingPhase, TrainingSummary};
