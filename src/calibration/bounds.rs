//! Min/max calibration over training raw scores. The detector emits higher raw values for more
//! normal points, so the exposed score is inverted: 1.0 is maximally anomalous.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Guards the denominator when the bounds coincide.
pub const SCORE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBounds {
    pub score_min: f64,
    pub score_max: f64,
}

impl Default for CalibrationBounds {
    /// Bounds assumed for artifacts written before calibration was recorded.
    fn default() -> Self {
        Self {
            score_min: -0.5,
            score_max: 0.5,
        }
    }
}

impl CalibrationBounds {
    /// Min and max over the raw scores of the whole training set. `None` when `raw` is empty.
    pub fn fit(raw: &[f64]) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }
        let score_min = raw.iter().copied().fold(f64::INFINITY, f64::min);
        let score_max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let bounds = Self {
            score_min,
            score_max,
        };
        bounds.warn_if_degenerate();
        Some(bounds)
    }

    pub fn is_degenerate(&self) -> bool {
        self.score_max == self.score_min
    }

    /// Logs the degenerate-calibration warning; every score will be 1.0.
    pub fn warn_if_degenerate(&self) {
        if self.is_degenerate() {
            warn!(
                score_min = self.score_min,
                score_max = self.score_max,
                "degenerate calibration: constant raw scores, every window will score 1.0"
            );
        }
    }

    /// `1 - clamp((r - min) / (max - min + eps), 0, 1)`.
    ///
    /// Degenerate bounds collapse `norm` to 0, so the score is a constant 1.0. A NaN raw score
    /// is treated the same way.
    pub fn apply(&self, raw: f64) -> f64 {
        if self.is_degenerate() {
            return 1.0;
        }
        let norm = (raw - self.score_min) / (self.score_max - self.score_min + SCORE_EPSILON);
        if norm.is_nan() {
            return 1.0;
        }
        1.0 - norm.clamp(0.0, 1.0)
    }
}
