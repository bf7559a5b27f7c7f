//! flowscore — bounded anomaly scores for aggregated network traffic windows.
//!
//! Modular structure:
//! - [`features`] — Ordered schema, indicator derivation, log1p robust scaling
//! - [`model`] — Isolation forest detector, distillation, ONNX portable scorer
//! - [`calibration`] — Raw detector output → [0, 1] anomaly score
//! - [`bundle`] — Versioned model artifact with atomic publish
//! - [`storage`] — SQLite window store (training row source)
//! - [`pipeline`] — Training and inference orchestration
//! - [`logging`] — Structured logging

pub mod config;
pub mod error;
pub mod features;
pub mod model;
pub mod calibration;
pub mod bundle;
pub mod storage;
pub mod pipeline;
pub mod logging;

pub use config::AppConfig;
pub use error::{AnomalyError, BundleLoadError, DetectorError, FeatureExtractionError};
pub use features::{FeaturePipeline, FeatureSchema, FeatureVector, NormalizationParameters};
pub use model::{Detector, IsolationForest, PortableScorer};
pub use calibration::CalibrationBounds;
pub use bundle::ModelBundle;
pub use storage::{RowSource, WindowStore};
pub use pipeline::{InferencePipeline, ScoreOutput, ScorerHandle, TrainingPipeline};
pub use logging::StructuredLogger;
