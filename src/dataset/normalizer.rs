//! Pixel rescaling
//!
//! Maps raw 8-bit intensities affinely onto `[min_range, max_range]`, `[0, 1]`
//! by default. The scale is fixed, but it still has to be fitted to a batch
//! source before that source can be iterated: [`BatchSource::iter`] only
//! accepts a [`FittedScaler`].
//!
//! [`BatchSource::iter`]: crate::dataset::burn_dataset::BatchSource::iter

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::burn_dataset::BatchSource;

/// Largest raw intensity of an 8-bit channel
pub const MAX_PIXEL_VALUE: f32 = 255.0;

/// Parameters of the affine rescale; stored with the model so prediction
/// reproduces the training-time normalization
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalerParams {
    pub min_range: f32,
    pub max_range: f32,
    pub max_pixel: f32,
}

impl Default for ScalerParams {
    fn default() -> Self {
        Self {
            min_range: 0.0,
            max_range: 1.0,
            max_pixel: MAX_PIXEL_VALUE,
        }
    }
}

/// Unfitted scaler
#[derive(Debug, Clone, Default)]
pub struct ImagePreProcessingScaler {
    params: ScalerParams,
}

impl ImagePreProcessingScaler {
    pub fn new(min_range: f32, max_range: f32) -> Self {
        Self {
            params: ScalerParams {
                min_range,
                max_range,
                max_pixel: MAX_PIXEL_VALUE,
            },
        }
    }

    /// Fit to one (split, transform) source
    pub fn fit(&self, source: &BatchSource) -> FittedScaler {
        debug!(
            "Normalizer fitted to {} -> [{}, {}]",
            source.describe(),
            self.params.min_range,
            self.params.max_range
        );
        FittedScaler {
            params: self.params,
        }
    }
}

/// Scaler ready to normalize pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FittedScaler {
    params: ScalerParams,
}

impl FittedScaler {
    /// Rebuild a scaler from stored parameters, as used at prediction time
    pub fn from_params(params: ScalerParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> ScalerParams {
        self.params
    }

    /// Rescale one raw intensity
    #[inline]
    pub fn scale(&self, raw: u8) -> f32 {
        let p = &self.params;
        (raw as f32 / p.max_pixel) * (p.max_range - p.min_range) + p.min_range
    }
}
