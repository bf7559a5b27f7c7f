//! JSON bundle artifact with versioned load/validate and atomic write-then-publish.
//! Legacy artifacts without calibration bounds load with -0.5 / 0.5.

use crate::calibration::CalibrationBounds;
use crate::error::{AnomalyError, BundleLoadError};
use crate::features::{FeatureSchema, NormalizationParameters};
use crate::model::{Detector, IsolationForest};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

/// Current artifact layout. Bump when the feature vector order or field meaning changes.
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

/// Fields an artifact must carry; everything else has a legacy default.
pub const REQUIRED_FIELDS: [&str; 4] = ["model", "medians", "iqrs", "cont_cols"];

fn legacy_version() -> u32 {
    1
}

fn default_score_min() -> f64 {
    CalibrationBounds::default().score_min
}

fn default_score_max() -> f64 {
    CalibrationBounds::default().score_max
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle<D = IsolationForest> {
    #[serde(default = "legacy_version")]
    format_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bundle_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trained_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    training_rows: Option<usize>,
    model: D,
    medians: Vec<f64>,
    iqrs: Vec<f64>,
    cont_cols: Vec<String>,
    #[serde(default)]
    extra_cols: Vec<String>,
    #[serde(default = "default_score_min")]
    score_min: f64,
    #[serde(default = "default_score_max")]
    score_max: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
}

/// Everything except the checksum, in serialization order.
#[derive(Serialize)]
struct BundleBody<'a, D> {
    format_version: u32,
    bundle_id: &'a Option<Uuid>,
    trained_at: &'a Option<DateTime<Utc>>,
    training_rows: &'a Option<usize>,
    model: &'a D,
    medians: &'a [f64],
    iqrs: &'a [f64],
    cont_cols: &'a [String],
    extra_cols: &'a [String],
    score_min: f64,
    score_max: f64,
}

impl<D: Detector + Serialize> ModelBundle<D> {
    /// Assemble a fresh bundle from fitted parts. Validates shapes and stamps id, time and checksum.
    pub fn new(
        model: D,
        schema: FeatureSchema,
        params: NormalizationParameters,
        bounds: CalibrationBounds,
        training_rows: usize,
    ) -> Result<Self, AnomalyError> {
        let mut bundle = Self {
            format_version: BUNDLE_FORMAT_VERSION,
            bundle_id: Some(Uuid::new_v4()),
            trained_at: Some(Utc::now()),
            training_rows: Some(training_rows),
            model,
            medians: params.medians,
            iqrs: params.iqrs,
            cont_cols: schema.continuous,
            extra_cols: schema.derived,
            score_min: bounds.score_min,
            score_max: bounds.score_max,
            checksum: None,
        };
        bundle.validate_shape()?;
        bundle.checksum = Some(bundle.compute_checksum()?);
        Ok(bundle)
    }

    /// SHA-256 (hex) over the serialized body.
    pub fn compute_checksum(&self) -> Result<String, serde_json::Error> {
        let body = BundleBody {
            format_version: self.format_version,
            bundle_id: &self.bundle_id,
            trained_at: &self.trained_at,
            training_rows: &self.training_rows,
            model: &self.model,
            medians: &self.medians,
            iqrs: &self.iqrs,
            cont_cols: &self.cont_cols,
            extra_cols: &self.extra_cols,
            score_min: self.score_min,
            score_max: self.score_max,
        };
        let mut h = Sha256::new();
        h.update(serde_json::to_vec(&body)?);
        Ok(format!("{:x}", h.finalize()))
    }

    /// Structural and integrity checks that need no caller expectations.
    pub fn validate(&self) -> Result<(), BundleLoadError> {
        self.validate_shape()?;
        if let Some(recorded) = &self.checksum {
            let computed = self
                .compute_checksum()
                .map_err(|e| BundleLoadError::ShapeMismatch {
                    detail: format!("bundle body cannot be serialized: {}", e),
                })?;
            if *recorded != computed {
                return Err(BundleLoadError::ChecksumMismatch {
                    recorded: recorded.clone(),
                    computed,
                });
            }
        }
        Ok(())
    }

    /// Write to a temp file next to `path`, fsync, then rename over `path`.
    pub fn save(&self, path: &Path) -> Result<(), AnomalyError> {
        let persist_err = |source: std::io::Error| AnomalyError::Persist {
            path: path.to_path_buf(),
            source,
        };
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(persist_err)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(persist_err)?;
        {
            let mut w = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer(&mut w, self)?;
            w.flush().map_err(persist_err)?;
        }
        tmp.as_file().sync_all().map_err(persist_err)?;
        tmp.persist(path).map_err(|e| persist_err(e.error))?;
        info!(path = %path.display(), bundle_id = ?self.bundle_id, "bundle published");
        Ok(())
    }

    fn validate_shape(&self) -> Result<(), BundleLoadError> {
        if self.format_version != BUNDLE_FORMAT_VERSION {
            return Err(BundleLoadError::UnsupportedVersion {
                found: self.format_version,
                supported: BUNDLE_FORMAT_VERSION,
            });
        }
        let n = self.cont_cols.len();
        if self.medians.len() != n || self.iqrs.len() != n {
            return Err(BundleLoadError::ShapeMismatch {
                detail: format!(
                    "{} continuous columns but {} medians and {} iqrs",
                    n,
                    self.medians.len(),
                    self.iqrs.len()
                ),
            });
        }
        if let Some(pos) = self
            .medians
            .iter()
            .chain(self.iqrs.iter())
            .position(|v| !v.is_finite())
        {
            return Err(BundleLoadError::ShapeMismatch {
                detail: format!("non-finite normalization parameter at position {}", pos),
            });
        }
        if let Some((column, iqr)) = self
            .cont_cols
            .iter()
            .zip(self.iqrs.iter())
            .find(|(_, iqr)| **iqr < 0.0)
        {
            return Err(BundleLoadError::ShapeMismatch {
                detail: format!("negative iqr {} for column {}", iqr, column),
            });
        }
        if !(self.score_min.is_finite() && self.score_max.is_finite())
            || self.score_max < self.score_min
        {
            return Err(BundleLoadError::InvalidBounds {
                score_min: self.score_min,
                score_max: self.score_max,
            });
        }
        let width = n + self.extra_cols.len();
        match self.model.n_features() {
            Some(expected) if expected != width => Err(BundleLoadError::ShapeMismatch {
                detail: format!("model expects {} features, schema has {}", expected, width),
            }),
            _ => Ok(()),
        }
    }
}

impl<D: Detector + Serialize + DeserializeOwned> ModelBundle<D> {
    /// Read and validate an artifact. Missing required fields are errors; missing bounds,
    /// `extra_cols` and `format_version` take their legacy defaults.
    pub fn load(path: &Path) -> Result<Self, BundleLoadError> {
        let data = std::fs::read_to_string(path).map_err(|source| BundleLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let bundle = Self::from_json_str(&data).map_err(|e| match e {
            BundleLoadError::Parse { source, .. } => BundleLoadError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        debug!(
            path = %path.display(),
            bundle_id = ?bundle.bundle_id,
            features = bundle.width(),
            "bundle loaded"
        );
        Ok(bundle)
    }

    /// Load and require the exact column names and order the caller was built for.
    pub fn load_expecting(path: &Path, expected: &FeatureSchema) -> Result<Self, BundleLoadError> {
        let bundle = Self::load(path)?;
        bundle.validate_schema(expected)?;
        Ok(bundle)
    }

    pub fn from_json_str(data: &str) -> Result<Self, BundleLoadError> {
        let parse_err = |source: serde_json::Error| BundleLoadError::Parse {
            path: "<memory>".into(),
            source,
        };
        let value: serde_json::Value = serde_json::from_str(data).map_err(parse_err)?;
        let obj = value.as_object().ok_or_else(|| {
            parse_err(serde::de::Error::custom("bundle must be a JSON object"))
        })?;
        for field in REQUIRED_FIELDS {
            if obj.get(field).map_or(true, serde_json::Value::is_null) {
                return Err(BundleLoadError::MissingField { field });
            }
        }
        if let Some(found) = obj.get("format_version").and_then(serde_json::Value::as_u64) {
            if found != u64::from(BUNDLE_FORMAT_VERSION) {
                return Err(BundleLoadError::UnsupportedVersion {
                    found: u32::try_from(found).unwrap_or(u32::MAX),
                    supported: BUNDLE_FORMAT_VERSION,
                });
            }
        }
        let bundle: Self = serde_json::from_value(value).map_err(parse_err)?;
        bundle.validate()?;
        bundle.bounds().warn_if_degenerate();
        Ok(bundle)
    }
}

impl<D> ModelBundle<D> {
    pub fn detector(&self) -> &D {
        &self.model
    }

    pub fn schema(&self) -> FeatureSchema {
        FeatureSchema::new(self.cont_cols.clone(), self.extra_cols.clone())
    }

    pub fn normalization(&self) -> NormalizationParameters {
        NormalizationParameters {
            medians: self.medians.clone(),
            iqrs: self.iqrs.clone(),
        }
    }

    pub fn bounds(&self) -> CalibrationBounds {
        CalibrationBounds {
            score_min: self.score_min,
            score_max: self.score_max,
        }
    }

    pub fn width(&self) -> usize {
        self.cont_cols.len() + self.extra_cols.len()
    }

    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    pub fn bundle_id(&self) -> Option<Uuid> {
        self.bundle_id
    }

    pub fn trained_at(&self) -> Option<DateTime<Utc>> {
        self.trained_at
    }

    pub fn training_rows(&self) -> Option<usize> {
        self.training_rows
    }

    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    /// Column names and order must match exactly.
    pub fn validate_schema(&self, expected: &FeatureSchema) -> Result<(), BundleLoadError> {
        if self.cont_cols != expected.continuous {
            return Err(BundleLoadError::SchemaMismatch {
                field: "cont_cols",
                expected: expected.continuous.clone(),
                found: self.cont_cols.clone(),
            });
        }
        if self.extra_cols != expected.derived {
            return Err(BundleLoadError::SchemaMismatch {
                field: "extra_cols",
                expected: expected.derived.clone(),
                found: self.extra_cols.clone(),
            });
        }
        Ok(())
    }
}
