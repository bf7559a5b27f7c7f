//! Feature extraction: schema lookup → log1p robust scaling → model input vector.

mod normalizer;
mod pipeline;
mod record;
mod schema;

pub(crate) use normalizer::percentile_sorted;
pub use normalizer::{NormalizationParameters, IQR_EPSILON};
pub use pipeline::FeaturePipeline;
pub use record::{Field, Identified, RecordLookup};
pub use schema::{
    DerivedColumn, FeatureSchema, PortBucket, Protocol, DEFAULT_CONTINUOUS_COLUMNS,
    DEFAULT_DERIVED_COLUMNS, DST_PORT_FIELD, PROTO_FIELD,
};

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Un-normalized values of one window, in schema order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFeatures {
    pub continuous: Vec<f64>,
    pub derived: Vec<f64>,
}

impl RawFeatures {
    /// Stack the continuous parts of `rows` into a (rows x columns) matrix.
    pub fn continuous_matrix(rows: &[RawFeatures], columns: usize) -> Array2<f64> {
        let mut m = Array2::<f64>::zeros((rows.len(), columns));
        for (i, r) in rows.iter().enumerate() {
            for (j, v) in r.continuous.iter().take(columns).enumerate() {
                m[[i, j]] = *v;
            }
        }
        m
    }
}

/// Model input: normalized continuous values followed by raw indicators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub values: Vec<f64>,
    pub record_id: String,
}

impl FeatureVector {
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}
