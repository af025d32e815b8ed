//! Utilities module for logging, metrics, errors and formatting helpers
//!
//! This module provides:
//! - Structured logging with tracing
//! - Confusion matrix and per-label metrics
//! - The crate error taxonomy

pub mod error;
pub mod logging;
pub mod metrics;

// Re-export main types for convenience
pub use error::{ClassifierError, Result};
pub use logging::init_logging;
pub use metrics::{ConfusionMatrix, LabelStats};

/// Format a duration in a human-readable way
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else if seconds < 3600.0 {
        let minutes = (seconds / 60.0).floor();
        let secs = seconds % 60.0;
        format!("{}m {:.0}s", minutes as u32, secs)
    } else {
        let hours = (seconds / 3600.0).floor();
        let minutes = ((seconds % 3600.0) / 60.0).floor();
        format!("{}h {}m", hours as u32, minutes as u32)
    }
}

/// Format a percentage with a text bar
pub fn format_progress_bar(progress: f64, width: usize) -> String {
    let progress = progress.clamp(0.0, 1.0);
    let filled = (progress * width as f64).round() as usize;
    let empty = width.saturating_sub(filled);

    format!(
        "[{}{}] {:.1}%",
        "█".repeat(filled),
        "░".repeat(empty),
        progress * 100.0
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30.5), "30.5s");
        assert_eq!(format_duration(90.0), "1m 30s");
        assert_eq!(format_duration(3661.0), "1h 1m");
    }

    #[test]
    fn test_format_progress_bar() {
        let bar = format_progress_bar(0.5, 10);
        assert!(bar.contains("50.0%"));
        assert!(bar.contains("█████"));
        assert!(format_progress_bar(1.7, 4).contains("100.0%"));
    }
}
