//! Per-iteration observers
//!
//! The trainer owns an ordered list of [`IterationListener`]s and calls each
//! of them synchronously after every weight update.

use std::time::Duration;

use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::training::trainer::TrainingPhase;
use crate::utils::{format_duration, format_progress_bar};

/// Snapshot handed to listeners after a weight update
#[derive(Debug, Clone)]
pub struct IterationStats {
    /// Weight updates done so far, starting at 1
    pub iteration: usize,
    /// Expected weight updates for the whole run
    pub total_iterations: usize,
    pub phase: TrainingPhase,
    /// Pass within the current phase, starting at 0
    pub epoch: usize,
    pub loss: f64,
    /// Samples that contributed to this update
    pub batch_size: usize,
    /// Time since training started
    pub elapsed: Duration,
}

impl IterationStats {
    pub fn progress(&self) -> f64 {
        if self.total_iterations == 0 {
            0.0
        } else {
            self.iteration as f64 / self.total_iterations as f64
        }
    }
}

/// Observer invoked at every batch boundary
pub trait IterationListener: Send {
    fn on_iteration_complete(&mut self, stats: &IterationStats);
}

/// Logs the loss every `frequency` iterations
#[derive(Debug, Clone)]
pub struct ScoreListener {
    frequency: usize,
}

impl ScoreListener {
    pub fn new(frequency: usize) -> Self {
        Self {
            frequency: frequency.max(1),
        }
    }
}

impl IterationListener for ScoreListener {
    fn on_iteration_complete(&mut self, stats: &IterationStats) {
        if stats.iteration % self.frequency == 0 {
            info!(
                "Score at iteration {} is {:.6} {} [{}]",
                stats.iteration,
                stats.loss,
                format_progress_bar(stats.progress(), 20),
                stats.phase
            );
        }
    }
}

/// Remaining time extrapolated linearly from the time spent so far
pub fn estimate_remaining(current: usize, total: usize, elapsed: Duration) -> Duration {
    if current == 0 {
        return Duration::ZERO;
    }
    let left = total.saturating_sub(current);
    elapsed.mul_f64(left as f64 / current as f64)
}

/// Logs the expected remaining time and end date every `frequency` iterations
#[derive(Debug, Clone)]
pub struct TimeRemainingListener {
    frequency: usize,
}

impl TimeRemainingListener {
    pub fn new(frequency: usize) -> Self {
        Self {
            frequency: frequency.max(1),
        }
    }
}

impl IterationListener for TimeRemainingListener {
    fn on_iteration_complete(&mut self, stats: &IterationStats) {
        if stats.iteration % self.frequency != 0 {
            return;
        }

        let remaining = estimate_remaining(stats.iteration, stats.total_iterations, stats.elapsed);
        let end = chrono::Duration::from_std(remaining)
            .map(|d| Local::now() + d)
            .unwrap_or_else(|_| Local::now());

        info!(
            "Remaining time : {}mn - End expected : {} (elapsed {})",
            remaining.as_secs() / 60,
            end.format("%a %b %e %H:%M:%S %Y"),
            format_duration(stats.elapsed.as_secs_f64())
        );
    }
}

/// Terminal progress bar, used when the interactive UI is enabled
pub struct ProgressBarListener {
    bar: ProgressBar,
}

impl ProgressBarListener {
    pub fn new(total_iterations: usize) -> Self {
        let bar = ProgressBar::new(total_iterations as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Self { bar }
    }

    /// Bar without a drawing target, for tests
    pub fn hidden(total_iterations: usize) -> Self {
        let bar = ProgressBar::hidden();
        bar.set_length(total_iterations as u64);
        Self { bar }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}

impl IterationListener for ProgressBarListener {
    fn on_iteration_complete(&mut self, stats: &IterationStats) {
        // the real step count may exceed the estimate when it was computed on stale sizes
        if stats.iteration as u64 > self.bar.length().unwrap_or(0) {
            self.bar.set_length(stats.iteration as u64);
        }
        self.bar.set_position(stats.iteration as u64);
        self.bar.set_message(format!("{} loss {:.4}", stats.phase, stats.loss));
        if stats.iteration >= stats.total_iterations {
            self.bar.finish();
        }
    }
}

impl Drop for ProgressBarListener {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.abandon();
        }
    }
}
