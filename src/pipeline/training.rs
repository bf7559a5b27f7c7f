//! Training run: Loading → FeatureBuilding → NormalizerFitting → DetectorFitting →
//! CalibratorFitting → (Distilling) → BundleAssembly → Persisted.
//!
//! Any failure aborts the run before anything is written; the bundle is only published at the end.

use crate::bundle::ModelBundle;
use crate::calibration::CalibrationBounds;
use crate::config::TrainingConfig;
use crate::error::{AnomalyError, Result};
use crate::features::{FeaturePipeline, FeatureSchema, NormalizationParameters, RawFeatures};
use crate::model::{distill, Detector, DistillationReport, IsolationForest, Regressor};
use crate::storage::RowSource;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingStage {
    Loading,
    FeatureBuilding,
    NormalizerFitting,
    DetectorFitting,
    CalibratorFitting,
    Distilling,
    BundleAssembly,
    Persisted,
}

impl fmt::Display for TrainingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrainingStage::Loading => "loading",
            TrainingStage::FeatureBuilding => "feature_building",
            TrainingStage::NormalizerFitting => "normalizer_fitting",
            TrainingStage::DetectorFitting => "detector_fitting",
            TrainingStage::CalibratorFitting => "calibrator_fitting",
            TrainingStage::Distilling => "distilling",
            TrainingStage::BundleAssembly => "bundle_assembly",
            TrainingStage::Persisted => "persisted",
        };
        f.write_str(s)
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub bundle_id: Option<Uuid>,
    pub rows: usize,
    pub score_min: f64,
    pub score_max: f64,
    pub degenerate_calibration: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distillation: Option<DistillationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_path: Option<PathBuf>,
}

/// Everything a run produced, before or after persisting.
pub struct TrainedModel<D = IsolationForest> {
    pub bundle: ModelBundle<D>,
    /// Normalized matrix the detector was fit on
    pub features: Array2<f64>,
    /// Calibrated score of every training row
    pub calibrated: Array1<f64>,
    pub report: TrainingReport,
}

pub struct TrainingPipeline {
    config: TrainingConfig,
    schema: FeatureSchema,
}

impl TrainingPipeline {
    pub fn new(config: TrainingConfig) -> Self {
        Self {
            config,
            schema: FeatureSchema::network(),
        }
    }

    pub fn with_schema(mut self, schema: FeatureSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train the configured isolation forest and publish the bundle at `out`.
    pub fn run<S: RowSource + ?Sized>(
        &self,
        source: &S,
        out: &Path,
        regressor: Option<&mut dyn Regressor>,
    ) -> Result<TrainingReport> {
        let detector = IsolationForest::new(self.config.detector.clone());
        let trained = self.fit(source, detector, regressor)?;
        self.persist(trained, out).map(|t| t.report)
    }

    /// Publish an already-fitted model.
    pub fn persist<D: Detector + Serialize>(
        &self,
        mut trained: TrainedModel<D>,
        out: &Path,
    ) -> Result<TrainedModel<D>> {
        trained
            .bundle
            .save(out)
            .inspect_err(|e| abort(TrainingStage::Persisted, e))?;
        trained.report.bundle_path = Some(out.to_path_buf());
        info!(stage = %TrainingStage::Persisted, path = %out.display(), "training complete");
        Ok(trained)
    }

    /// Run every stage up to bundle assembly without touching disk.
    pub fn fit<S, D>(
        &self,
        source: &S,
        mut detector: D,
        regressor: Option<&mut dyn Regressor>,
    ) -> Result<TrainedModel<D>>
    where
        S: RowSource + ?Sized,
        D: Detector + Serialize,
    {
        let schema = &self.schema;

        enter(TrainingStage::Loading);
        let rows = source
            .load_rows(schema)
            .inspect_err(|e| abort(TrainingStage::Loading, e))?;
        self.check_row_count(rows.len(), regressor.is_some())
            .inspect_err(|e| abort(TrainingStage::Loading, e))?;
        info!(rows = rows.len(), "training rows loaded");

        enter(TrainingStage::FeatureBuilding);
        let continuous = RawFeatures::continuous_matrix(&rows, schema.continuous.len());

        enter(TrainingStage::NormalizerFitting);
        let (params, features) = NormalizationParameters::fit(continuous.view(), &schema.continuous)
            .and_then(|params| {
                let pipeline = FeaturePipeline::new(schema.clone(), params.clone())?;
                let features = pipeline.build_matrix(&rows)?;
                Ok((params, features))
            })
            .inspect_err(|e| abort(TrainingStage::NormalizerFitting, e))?;

        enter(TrainingStage::DetectorFitting);
        let raw = detector
            .fit(features.view())
            .and_then(|_| detector.score_samples(features.view()))
            .map_err(AnomalyError::from)
            .inspect_err(|e| abort(TrainingStage::DetectorFitting, e))?;

        enter(TrainingStage::CalibratorFitting);
        let bounds = CalibrationBounds::fit(&raw.to_vec()).ok_or(AnomalyError::InsufficientData {
            stage: "calibration",
            rows: 0,
            required: 1,
        })?;
        let calibrated = raw.mapv(|r| bounds.apply(r));
        info!(
            score_min = bounds.score_min,
            score_max = bounds.score_max,
            "calibration bounds fitted"
        );

        let distillation = match regressor {
            Some(reg) => {
                enter(TrainingStage::Distilling);
                let report = distill(reg, features.view(), calibrated.view(), &self.config.distillation)
                    .inspect_err(|e| abort(TrainingStage::Distilling, e))?;
                Some(report)
            }
            None => None,
        };

        enter(TrainingStage::BundleAssembly);
        let bundle = ModelBundle::new(detector, schema.clone(), params, bounds, rows.len())
            .inspect_err(|e| abort(TrainingStage::BundleAssembly, e))?;

        let report = TrainingReport {
            bundle_id: bundle.bundle_id(),
            rows: rows.len(),
            score_min: bounds.score_min,
            score_max: bounds.score_max,
            degenerate_calibration: bounds.is_degenerate(),
            distillation,
            bundle_path: None,
        };
        Ok(TrainedModel {
            bundle,
            features,
            calibrated,
            report,
        })
    }

    fn check_row_count(&self, rows: usize, distilling: bool) -> Result<()> {
        let (stage, required) = if distilling {
            ("distillation", self.config.min_rows_distill.max(self.config.min_rows))
        } else {
            ("detector", self.config.min_rows)
        };
        if rows < required {
            return Err(AnomalyError::InsufficientData {
                stage,
                rows,
                required,
            });
        }
        Ok(())
    }
}

fn enter(stage: TrainingStage) {
    info!(stage = %stage, "training stage");
}

fn abort(stage: TrainingStage, e: &AnomalyError) {
    error!(stage = %stage, error = %e, "training aborted");
}
