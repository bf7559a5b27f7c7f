//! Application configuration: paths, training hyperparameters, logging.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Data directory (window store, bundles, portable export)
    pub data_dir: PathBuf,
    /// SQLite window store used as the training row source
    pub db_path: PathBuf,
    /// Model bundle written by training and read by inference
    pub bundle_path: PathBuf,
    /// Portable (ONNX) export of the distilled regressor
    pub portable_model_path: PathBuf,
    /// Training run parameters
    pub training: TrainingConfig,
    /// Logging
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Minimum windows required to fit the primary detector
    pub min_rows: usize,
    /// Minimum windows required when the distillation sub-stage runs
    pub min_rows_distill: usize,
    pub detector: DetectorParams,
    pub distillation: DistillationConfig,
}

/// Isolation forest hyperparameters. Fixed defaults keep training reproducible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    /// Ensemble size
    pub n_estimators: usize,
    /// Per-tree subsample size (capped at the row count)
    pub max_samples: usize,
    /// Expected outlier fraction; sets the decision offset only
    pub contamination: f64,
    /// Fraction of features each tree may split on
    pub max_features: f64,
    /// Draw per-tree samples with replacement
    pub bootstrap: bool,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistillationConfig {
    /// Share of rows held out to verify the regressor
    pub holdout_fraction: f64,
    /// Maximum mean absolute error against calibrated scores
    pub tolerance: f64,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            db_path: data_dir.join("anomaly.sqlite"),
            bundle_path: data_dir.join("anomaly_model.json"),
            portable_model_path: data_dir.join("anomaly_model.onnx"),
            data_dir,
            training: TrainingConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            min_rows: 100,
            min_rows_distill: 500,
            detector: DetectorParams::default(),
            distillation: DistillationConfig::default(),
        }
    }
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            max_samples: 256,
            contamination: 0.005,
            max_features: 1.0,
            bootstrap: false,
            seed: 42,
        }
    }
}

impl Default for DistillationConfig {
    fn default() -> Self {
        Self {
            holdout_fraction: 0.2,
            tolerance: 0.02,
            seed: 42,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Platform data directory, e.g. `~/.local/share/flowscore` or `~/Library/Application Support/flowscore`.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("flowscore"))
        .unwrap_or_else(|| PathBuf::from(".flowscore"))
}

impl AppConfig {
    /// Load from JSON file if present; otherwise return default
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|data| serde_json::from_str::<AppConfig>(&data).map_err(|e| e.to_string()))
        {
            Ok(c) => c,
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "unreadable config, using defaults");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"training": {"detector": {"seed": 7}}}"#).unwrap();
        let c = AppConfig::load(&path);
        assert_eq!(c.training.detector.seed, 7);
        assert_eq!(c.training.detector.n_estimators, 200);
        assert_eq!(c.training.min_rows, 100);
    }

    #[test]
    fn garbage_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(AppConfig::load(&path), AppConfig::default());
    }
}
