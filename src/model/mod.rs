//! Scoring capabilities: the outlier detector, distilled regressors, and the ONNX portable export.
//!
//! Detectors emit *higher* raw scores for *more normal* points; score models predict the
//! already-calibrated anomaly score.

mod distill;
mod iforest;
mod onnx;

pub use distill::{distill, mean_absolute_error, verify_score_model, DistillationReport};
pub use iforest::IsolationForest;
pub use onnx::PortableScorer;

use crate::error::DetectorError;
use ndarray::{Array1, ArrayView1, ArrayView2};

/// Trainable outlier detector.
pub trait Detector: Send + Sync {
    /// Fit on a (rows x features) matrix of normalized features.
    fn fit(&mut self, x: ArrayView2<'_, f64>) -> Result<(), DetectorError>;

    /// Raw score per row; higher means more normal.
    fn score_samples(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, DetectorError>;

    /// Input width the fitted model expects, if known.
    fn n_features(&self) -> Option<usize>;
}

/// A model that predicts the calibrated anomaly score directly.
pub trait ScoreModel: Send + Sync {
    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, DetectorError>;
}

/// A score model that can be trained against calibrated targets.
pub trait Regressor: ScoreModel {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<(), DetectorError>;
}
