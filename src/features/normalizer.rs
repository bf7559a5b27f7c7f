//! Robust scaling: log1p compression, then (t - median) / (iqr + epsilon).
//! Statistics are fit on the log1p-transformed training values and frozen afterwards.

use crate::error::{AnomalyError, FeatureExtractionError};
use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Guards division when a column's IQR is (near) zero.
pub const IQR_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationParameters {
    pub medians: Vec<f64>,
    pub iqrs: Vec<f64>,
}

impl NormalizationParameters {
    /// Fit per-column median and IQR over log1p of `continuous` (rows = windows).
    pub fn fit(continuous: ArrayView2<'_, f64>, columns: &[String]) -> Result<Self, AnomalyError> {
        if continuous.ncols() != columns.len() {
            return Err(FeatureExtractionError::WidthMismatch {
                expected: columns.len(),
                actual: continuous.ncols(),
            }
            .into());
        }
        if continuous.nrows() == 0 {
            return Err(AnomalyError::InsufficientData {
                stage: "normalizer",
                rows: 0,
                required: 1,
            });
        }

        let mut medians = Vec::with_capacity(columns.len());
        let mut iqrs = Vec::with_capacity(columns.len());
        for (idx, column) in continuous.axis_iter(Axis(1)).enumerate() {
            let mut logged = column
                .iter()
                .enumerate()
                .map(|(row, &v)| log1p_checked(v, &columns[idx], &format!("row {}", row)))
                .collect::<Result<Vec<_>, _>>()?;
            logged.sort_by(f64::total_cmp);
            medians.push(percentile_sorted(&logged, 50.0));
            iqrs.push(percentile_sorted(&logged, 75.0) - percentile_sorted(&logged, 25.0));
        }
        Ok(Self { medians, iqrs })
    }

    pub fn len(&self) -> usize {
        self.medians.len()
    }

    pub fn is_empty(&self) -> bool {
        self.medians.is_empty()
    }

    /// Normalize one row of continuous values. `columns` and `record` are only used for error context.
    pub fn transform_row(
        &self,
        values: &[f64],
        columns: &[String],
        record: &str,
    ) -> Result<Vec<f64>, FeatureExtractionError> {
        if values.len() != self.len() {
            return Err(FeatureExtractionError::WidthMismatch {
                expected: self.len(),
                actual: values.len(),
            });
        }
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let name = columns.get(i).map(String::as_str).unwrap_or("?");
                let t = log1p_checked(v, name, record)?;
                Ok((t - self.medians[i]) / (self.iqrs[i] + IQR_EPSILON))
            })
            .collect()
    }

    /// Normalize a whole matrix of continuous values, row by row.
    pub fn transform(
        &self,
        continuous: ArrayView2<'_, f64>,
        columns: &[String],
    ) -> Result<Array2<f64>, FeatureExtractionError> {
        let mut out = Array2::<f64>::zeros(continuous.raw_dim());
        for (i, row) in continuous.axis_iter(Axis(0)).enumerate() {
            let values: Vec<f64> = row.to_vec();
            let normalized = self.transform_row(&values, columns, &format!("row {}", i))?;
            out.row_mut(i)
                .iter_mut()
                .zip(normalized)
                .for_each(|(o, v)| *o = v);
        }
        Ok(out)
    }
}

fn log1p_checked(v: f64, column: &str, record: &str) -> Result<f64, FeatureExtractionError> {
    if !v.is_finite() || v <= -1.0 {
        return Err(FeatureExtractionError::OutOfDomain {
            record: record.to_string(),
            column: column.to_string(),
            value: v,
        });
    }
    Ok(v.ln_1p())
}

/// Percentile with linear interpolation between closest ranks. `sorted` must be non-empty and
/// ascending; `q` is clamped to [0, 100].
pub(crate) fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let pos = (q.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn cols(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("c{}", i)).collect()
    }

    #[test]
    fn percentile_matches_linear_interpolation() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile_sorted(&v, 50.0), 2.5);
        assert_eq!(percentile_sorted(&v, 25.0), 1.75);
        assert_eq!(percentile_sorted(&v, 75.0), 3.25);
        assert_eq!(percentile_sorted(&[7.0], 25.0), 7.0);
        assert_eq!(percentile_sorted(&v, 150.0), 4.0);
        assert_eq!(percentile_sorted(&v, -5.0), 1.0);
    }

    #[test]
    fn statistics_are_computed_after_log1p() {
        let data = array![[0.0], [(1.0f64).exp_m1()], [(2.0f64).exp_m1()]];
        let p = NormalizationParameters::fit(data.view(), &cols(1)).unwrap();
        assert!((p.medians[0] - 1.0).abs() < 1e-12);
        assert!((p.iqrs[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn fit_is_row_order_invariant() {
        let data = array![[10.0, 3.0], [200.0, 0.0], [5.0, 9.0], [42.0, 1.0], [7.0, 7.0]];
        let mut rev = data.clone();
        rev.invert_axis(Axis(0));
        let a = NormalizationParameters::fit(data.view(), &cols(2)).unwrap();
        let b = NormalizationParameters::fit(rev.view(), &cols(2)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn transform_zero_with_unit_params() {
        let p = NormalizationParameters {
            medians: vec![0.0],
            iqrs: vec![1.0],
        };
        let out = p.transform_row(&[0.0], &cols(1), "t").unwrap();
        assert!(out[0].abs() < 1e-12);
    }

    #[test]
    fn zero_iqr_does_not_divide_by_zero() {
        let data = array![[3.0], [3.0], [3.0]];
        let p = NormalizationParameters::fit(data.view(), &cols(1)).unwrap();
        assert_eq!(p.iqrs[0], 0.0);
        let out = p.transform_row(&[3.0], &cols(1), "t").unwrap();
        assert!(out[0].is_finite());
        assert_eq!(out[0], 0.0);
    }

    #[test]
    fn values_at_or_below_minus_one_are_rejected() {
        let p = NormalizationParameters {
            medians: vec![0.0],
            iqrs: vec![1.0],
        };
        for bad in [-1.0, -3.0, f64::NAN, f64::INFINITY] {
            let err = p.transform_row(&[bad], &["total_bytes".into()], "rec").unwrap_err();
            match err {
                FeatureExtractionError::OutOfDomain { column, .. } => {
                    assert_eq!(column, "total_bytes")
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn fit_rejects_out_of_domain_rows() {
        let data = array![[1.0], [-2.0]];
        let err = NormalizationParameters::fit(data.view(), &cols(1)).unwrap_err();
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn matrix_transform_matches_row_transform() {
        let data = array![[10.0, 3.0], [200.0, 0.0], [5.0, 9.0]];
        let p = NormalizationParameters::fit(data.view(), &cols(2)).unwrap();
        let m = p.transform(data.view(), &cols(2)).unwrap();
        for (i, row) in data.axis_iter(Axis(0)).enumerate() {
            let r = p.transform_row(&row.to_vec(), &cols(2), "t").unwrap();
            assert_eq!(m.row(i).to_vec(), r);
        }
    }
}
