//! Error taxonomy for feature extraction, bundle loading, detector and pipeline failures.

use std::path::PathBuf;

/// A record could not be turned into a feature vector.
#[derive(Debug, thiserror::Error)]
pub enum FeatureExtractionError {
    #[error("record {record}: missing required column `{column}`")]
    MissingColumn { record: String, column: String },

    #[error("record {record}: column `{column}` is not numeric ({detail})")]
    NotNumeric {
        record: String,
        column: String,
        detail: String,
    },

    #[error("record {record}: column `{column}` value {value} is out of domain (continuous: finite and > -1, indicator: 0 or 1)")]
    OutOfDomain {
        record: String,
        column: String,
        value: f64,
    },

    #[error("no derivation rule for column `{column}`")]
    UnknownDerivedColumn { column: String },

    #[error("feature width mismatch: expected {expected} values, got {actual}")]
    WidthMismatch { expected: usize, actual: usize },
}

/// A persisted bundle is missing, malformed, or incompatible with the caller.
#[derive(Debug, thiserror::Error)]
pub enum BundleLoadError {
    #[error("cannot read bundle {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("bundle {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("bundle is missing required field `{field}`")]
    MissingField { field: &'static str },

    #[error("unsupported bundle format version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("bundle `{field}` mismatch: expected {expected:?}, found {found:?}")]
    SchemaMismatch {
        field: &'static str,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("bundle shape mismatch: {detail}")]
    ShapeMismatch { detail: String },

    #[error("invalid calibration bounds: score_min {score_min} > score_max {score_max}")]
    InvalidBounds { score_min: f64, score_max: f64 },

    #[error("bundle checksum mismatch: recorded {recorded}, computed {computed}")]
    ChecksumMismatch { recorded: String, computed: String },
}

/// Failures inside a detector or score model.
#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("detector has not been fitted")]
    NotFitted,

    #[error("cannot fit on an empty feature matrix")]
    EmptyInput,

    #[error("feature dimension mismatch: model expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid detector parameters: {0}")]
    InvalidParams(String),

    #[error("model runtime error: {0}")]
    Runtime(String),
}

/// Umbrella error for training and inference runs.
#[derive(Debug, thiserror::Error)]
pub enum AnomalyError {
    #[error("not enough data to train ({stage}): need at least {required} windows, got {rows}")]
    InsufficientData {
        stage: &'static str,
        rows: usize,
        required: usize,
    },

    #[error(transparent)]
    FeatureExtraction(#[from] FeatureExtractionError),

    #[error(transparent)]
    BundleLoad(#[from] BundleLoadError),

    #[error(transparent)]
    Detector(#[from] DetectorError),

    #[error("window store error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("cannot persist bundle to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot serialize bundle: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("distilled model error {mae:.4} exceeds tolerance {tolerance:.4} on {holdout_rows} held-out rows")]
    DistillationTolerance {
        mae: f64,
        tolerance: f64,
        holdout_rows: usize,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T, E = AnomalyError> = std::result::Result<T, E>;
