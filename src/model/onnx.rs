//! ONNX Runtime scorer for the portable export. Input: [1, feature_dim] f32, Output: calibrated score.
//! Uses `ort` with a dynamically loaded runtime; nothing touches the runtime until a model file exists.

use super::ScoreModel;
use crate::error::{BundleLoadError, DetectorError};
use ndarray::{Array1, ArrayView2};
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

pub struct PortableScorer {
    session: Session,
    input_name: String,
    output_name: String,
    feature_dim: usize,
}

impl PortableScorer {
    /// Load an exported regressor. A missing file is a load error, never a silent no-op.
    pub fn load(path: &Path, feature_dim: usize) -> Result<Self, BundleLoadError> {
        if !path.exists() {
            return Err(BundleLoadError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "portable model not found"),
            });
        }

        let session = Session::builder()
            .and_then(|b| b.commit_from_file(path))
            .map_err(|e| BundleLoadError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()),
            })?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "input".to_string());
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .unwrap_or_else(|| "score".to_string());
        tracing::info!(path = %path.display(), input = %input_name, output = %output_name, "portable model loaded");

        Ok(Self {
            session,
            input_name,
            output_name,
            feature_dim,
        })
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    fn score_row(&self, row: Vec<f32>) -> Result<f64, DetectorError> {
        let runtime = |e: ort::Error| DetectorError::Runtime(e.to_string());
        let input = Tensor::from_array(([1usize, self.feature_dim], row)).map_err(runtime)?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input].map_err(runtime)?)
            .map_err(runtime)?;
        let out = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| DetectorError::Runtime(format!("missing output `{}`", self.output_name)))?;
        let (_, data) = out.try_extract_raw_tensor::<f32>().map_err(runtime)?;
        let score = data
            .first()
            .copied()
            .ok_or_else(|| DetectorError::Runtime("empty output tensor".to_string()))?;
        Ok(f64::from(score).clamp(0.0, 1.0))
    }
}

impl ScoreModel for PortableScorer {
    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, DetectorError> {
        if x.ncols() != self.feature_dim {
            return Err(DetectorError::DimensionMismatch {
                expected: self.feature_dim,
                actual: x.ncols(),
            });
        }
        x.outer_iter()
            .map(|row| self.score_row(row.iter().map(|&v| v as f32).collect()))
            .collect()
    }
}
