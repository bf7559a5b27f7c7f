//! Feature pipeline: record → schema extraction → normalization → vector.
//! Training and inference both go through [`FeaturePipeline::assemble`], so their vectors cannot drift.

use super::{FeatureSchema, FeatureVector, NormalizationParameters, RawFeatures, RecordLookup};
use crate::error::FeatureExtractionError;
use ndarray::Array2;

#[derive(Debug, Clone, PartialEq)]
pub struct FeaturePipeline {
    schema: FeatureSchema,
    params: NormalizationParameters,
}

impl FeaturePipeline {
    pub fn new(
        schema: FeatureSchema,
        params: NormalizationParameters,
    ) -> Result<Self, FeatureExtractionError> {
        if params.medians.len() != schema.continuous.len() || params.iqrs.len() != schema.continuous.len() {
            return Err(FeatureExtractionError::WidthMismatch {
                expected: schema.continuous.len(),
                actual: params.medians.len().min(params.iqrs.len()),
            });
        }
        Ok(Self { schema, params })
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn params(&self) -> &NormalizationParameters {
        &self.params
    }

    /// Build the model input for one inference record (all columns looked up by name).
    pub fn build<R: RecordLookup + ?Sized>(
        &self,
        record: &R,
    ) -> Result<FeatureVector, FeatureExtractionError> {
        let raw = self.schema.extract(record)?;
        self.assemble(&raw, record.record_id())
    }

    /// Normalize continuous values and append derived indicators unchanged.
    pub fn assemble(
        &self,
        raw: &RawFeatures,
        record_id: String,
    ) -> Result<FeatureVector, FeatureExtractionError> {
        if raw.derived.len() != self.schema.derived.len() {
            return Err(FeatureExtractionError::WidthMismatch {
                expected: self.schema.derived.len(),
                actual: raw.derived.len(),
            });
        }
        let mut values = self
            .params
            .transform_row(&raw.continuous, &self.schema.continuous, &record_id)?;
        values.extend_from_slice(&raw.derived);
        Ok(FeatureVector { values, record_id })
    }

    /// Model input matrix for a batch of rows, one row per window.
    pub fn build_matrix(&self, rows: &[RawFeatures]) -> Result<Array2<f64>, FeatureExtractionError> {
        let width = self.schema.width();
        let mut m = Array2::<f64>::zeros((rows.len(), width));
        for (i, raw) in rows.iter().enumerate() {
            let fv = self.assemble(raw, format!("row {}", i))?;
            m.row_mut(i)
                .iter_mut()
                .zip(fv.values)
                .for_each(|(o, v)| *o = v);
        }
        Ok(m)
    }
}
