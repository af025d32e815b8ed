//! Inference module for single-image prediction
//!
//! The predictor reads a model artifact written after training and returns
//! one probability per stored label.

pub mod predictor;

// Re-export main types for convenience
pub use predictor::{Prediction, Predictor};
