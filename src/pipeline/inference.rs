//! Single-record scoring against a loaded bundle, plus an atomically reloadable handle for
//! long-lived hosts.

use crate::bundle::ModelBundle;
use crate::calibration::CalibrationBounds;
use crate::error::{AnomalyError, Result};
use crate::features::{FeaturePipeline, FeatureSchema, FeatureVector, RawFeatures, RecordLookup};
use crate::model::{Detector, IsolationForest};
use arc_swap::ArcSwap;
use ndarray::{Array1, Array2};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Output contract of one inference call: `{"score": x}` or `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreOutput {
    Score(f64),
    Error(String),
}

impl ScoreOutput {
    pub fn is_error(&self) -> bool {
        matches!(self, ScoreOutput::Error(_))
    }
}

impl From<Result<f64>> for ScoreOutput {
    fn from(r: Result<f64>) -> Self {
        match r {
            Ok(score) => ScoreOutput::Score(score),
            Err(e) => ScoreOutput::Error(e.to_string()),
        }
    }
}

/// Read-only scorer built from one bundle. Holds no mutable state, so it can be shared freely.
pub struct InferencePipeline<D = IsolationForest> {
    features: FeaturePipeline,
    bounds: CalibrationBounds,
    bundle: ModelBundle<D>,
}

impl<D: Detector> InferencePipeline<D> {
    pub fn new(bundle: ModelBundle<D>) -> Result<Self> {
        let features = FeaturePipeline::new(bundle.schema(), bundle.normalization())?;
        Ok(Self {
            features,
            bounds: bundle.bounds(),
            bundle,
        })
    }

    pub fn bundle(&self) -> &ModelBundle<D> {
        &self.bundle
    }

    pub fn schema(&self) -> &FeatureSchema {
        self.features.schema()
    }

    /// Normalized model input for `record`, exactly as training built it.
    pub fn features<R: RecordLookup + ?Sized>(&self, record: &R) -> Result<FeatureVector> {
        Ok(self.features.build(record)?)
    }

    /// Unbounded detector output for `record`.
    pub fn raw_score<R: RecordLookup + ?Sized>(&self, record: &R) -> Result<f64> {
        let fv = self.features(record)?;
        let x = Array2::from_shape_vec((1, fv.dim()), fv.values)
            .map_err(|e| AnomalyError::InvalidInput(e.to_string()))?;
        let raw = self.bundle.detector().score_samples(x.view())?;
        raw.get(0)
            .copied()
            .ok_or_else(|| AnomalyError::InvalidInput("detector returned no score".to_string()))
    }

    /// Calibrated anomaly score in [0, 1].
    pub fn score<R: RecordLookup + ?Sized>(&self, record: &R) -> Result<f64> {
        let raw = self.raw_score(record)?;
        Ok(self.bounds.apply(raw))
    }

    /// Model inputs and calibrated scores for a batch of raw rows (e.g. the training set).
    pub fn score_rows(&self, rows: &[RawFeatures]) -> Result<(Array2<f64>, Array1<f64>)> {
        let x = self.features.build_matrix(rows)?;
        let raw = self.bundle.detector().score_samples(x.view())?;
        let calibrated = raw.mapv(|r| self.bounds.apply(r));
        Ok((x, calibrated))
    }

    /// Score one JSON object mapping column names to numbers.
    pub fn score_json(&self, input: &str) -> ScoreOutput {
        let parsed = serde_json::from_str::<serde_json::Value>(input)
            .map_err(|e| AnomalyError::InvalidInput(format!("record is not valid JSON: {}", e)))
            .and_then(|v| match v {
                serde_json::Value::Object(map) => Ok(map),
                _ => Err(AnomalyError::InvalidInput(
                    "record must be a JSON object".to_string(),
                )),
            });
        parsed.and_then(|record| self.score(&record)).into()
    }
}

impl<D: Detector + Serialize + DeserializeOwned> InferencePipeline<D> {
    /// Load a bundle, optionally requiring a specific column layout.
    pub fn load(path: &Path, expected: Option<&FeatureSchema>) -> Result<Self> {
        let bundle = match expected {
            Some(schema) => ModelBundle::load_expecting(path, schema)?,
            None => ModelBundle::load(path)?,
        };
        Self::new(bundle)
    }
}

/// Shared scorer whose bundle can be swapped atomically. Readers hold an `Arc` to one complete
/// pipeline, so they never observe parameters from one bundle and a detector from another.
pub struct ScorerHandle<D = IsolationForest> {
    path: PathBuf,
    expected: Option<FeatureSchema>,
    current: ArcSwap<InferencePipeline<D>>,
}

impl<D: Detector + Serialize + DeserializeOwned> ScorerHandle<D> {
    pub fn open(path: &Path, expected: Option<FeatureSchema>) -> Result<Self> {
        let pipeline = InferencePipeline::load(path, expected.as_ref())?;
        Ok(Self {
            path: path.to_path_buf(),
            expected,
            current: ArcSwap::from_pointee(pipeline),
        })
    }

    /// Re-read the bundle from disk. On failure the previous bundle stays in service.
    pub fn reload(&self) -> Result<()> {
        match InferencePipeline::load(&self.path, self.expected.as_ref()) {
            Ok(pipeline) => {
                info!(
                    path = %self.path.display(),
                    bundle_id = ?pipeline.bundle().bundle_id(),
                    "bundle reloaded"
                );
                self.current.store(Arc::new(pipeline));
                Ok(())
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "bundle reload failed; keeping current bundle");
                Err(e)
            }
        }
    }
}

impl<D: Detector> ScorerHandle<D> {
    /// Replace the active pipeline with an already-built one.
    pub fn swap(&self, pipeline: InferencePipeline<D>) {
        self.current.store(Arc::new(pipeline));
    }

    /// Snapshot of the active pipeline.
    pub fn current(&self) -> Arc<InferencePipeline<D>> {
        self.current.load_full()
    }

    pub fn score<R: RecordLookup + ?Sized>(&self, record: &R) -> Result<f64> {
        self.current.load().score(record)
    }
}
