//! Distillation: fit a portable regressor to the calibrated scores of the primary detector
//! and check it on held-out rows.

use super::{Regressor, ScoreModel};
use crate::config::DistillationConfig;
use crate::error::AnomalyError;
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistillationReport {
    pub train_rows: usize,
    pub holdout_rows: usize,
    pub mean_absolute_error: f64,
    pub tolerance: f64,
}

pub fn mean_absolute_error(predicted: ArrayView1<'_, f64>, expected: ArrayView1<'_, f64>) -> f64 {
    if predicted.is_empty() {
        return 0.0;
    }
    predicted
        .iter()
        .zip(expected.iter())
        .map(|(p, e)| (p - e).abs())
        .sum::<f64>()
        / predicted.len() as f64
}

/// Fit `regressor` on a seeded split of `features`/`targets` and require the held-out MAE to stay
/// within `config.tolerance`.
pub fn distill<R: Regressor + ?Sized>(
    regressor: &mut R,
    features: ArrayView2<'_, f64>,
    targets: ArrayView1<'_, f64>,
    config: &DistillationConfig,
) -> Result<DistillationReport, AnomalyError> {
    let rows = features.nrows();
    if targets.len() != rows {
        return Err(AnomalyError::InvalidInput(format!(
            "distillation targets: expected {} values, got {}",
            rows,
            targets.len()
        )));
    }
    if rows < 2 {
        return Err(AnomalyError::InsufficientData {
            stage: "distillation",
            rows,
            required: 2,
        });
    }

    let holdout = ((rows as f64 * config.holdout_fraction).round() as usize).clamp(1, rows - 1);
    let mut order: Vec<usize> = (0..rows).collect();
    order.shuffle(&mut StdRng::seed_from_u64(config.seed));
    let (test_idx, train_idx) = order.split_at(holdout);

    let train_x = features.select(Axis(0), train_idx);
    let train_y = targets.select(Axis(0), train_idx);
    regressor.fit(train_x.view(), train_y.view())?;

    let test_x = features.select(Axis(0), test_idx);
    let test_y = targets.select(Axis(0), test_idx);
    let report = check(regressor, test_x.view(), test_y.view(), config.tolerance)?;
    info!(
        train_rows = train_idx.len(),
        holdout_rows = report.holdout_rows,
        mae = report.mean_absolute_error,
        "distilled regressor verified"
    );
    Ok(DistillationReport {
        train_rows: train_idx.len(),
        ..report
    })
}

/// Score every row with `model` and compare against `expected` calibrated scores.
pub fn verify_score_model<M: ScoreModel + ?Sized>(
    model: &M,
    features: ArrayView2<'_, f64>,
    expected: ArrayView1<'_, f64>,
    tolerance: f64,
) -> Result<DistillationReport, AnomalyError> {
    check(model, features, expected, tolerance)
}

fn check<M: ScoreModel + ?Sized>(
    model: &M,
    features: ArrayView2<'_, f64>,
    expected: ArrayView1<'_, f64>,
    tolerance: f64,
) -> Result<DistillationReport, AnomalyError> {
    let predicted: Array1<f64> = model.predict(features)?;
    if predicted.len() != expected.len() {
        return Err(AnomalyError::InvalidInput(format!(
            "score model returned {} predictions for {} rows",
            predicted.len(),
            expected.len()
        )));
    }
    let mae = mean_absolute_error(predicted.view(), expected);
    if mae > tolerance {
        return Err(AnomalyError::DistillationTolerance {
            mae,
            tolerance,
            holdout_rows: expected.len(),
        });
    }
    Ok(DistillationReport {
        train_rows: 0,
        holdout_rows: expected.len(),
        mean_absolute_error: mae,
        tolerance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DetectorError;
    use ndarray::{array, Array2};

    /// Predicts the mean of the training targets.
    struct MeanRegressor(f64);

    impl ScoreModel for MeanRegressor {
        fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, DetectorError> {
            Ok(Array1::from_elem(x.nrows(), self.0))
        }
    }

    impl Regressor for MeanRegressor {
        fn fit(&mut self, _x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<(), DetectorError> {
            self.0 = y.mean().unwrap_or(0.0);
            Ok(())
        }
    }

    fn config(tolerance: f64) -> DistillationConfig {
        DistillationConfig {
            tolerance,
            ..DistillationConfig::default()
        }
    }

    #[test]
    fn constant_targets_pass() {
        let x = Array2::<f64>::zeros((50, 3));
        let y = Array1::from_elem(50, 0.3);
        let mut r = MeanRegressor(0.0);
        let report = distill(&mut r, x.view(), y.view(), &config(0.02)).unwrap();
        assert_eq!(report.holdout_rows, 10);
        assert_eq!(report.train_rows, 40);
        assert!(report.mean_absolute_error < 1e-12);
    }

    #[test]
    fn spread_targets_exceed_tolerance() {
        let x = Array2::<f64>::zeros((40, 1));
        let y: Array1<f64> = (0..40).map(|i| if i % 2 == 0 { 0.0 } else { 1.0 }).collect();
        let mut r = MeanRegressor(0.0);
        let err = distill(&mut r, x.view(), y.view(), &config(0.02)).unwrap_err();
        assert!(matches!(err, AnomalyError::DistillationTolerance { .. }));
    }

    #[test]
    fn mae_of_known_vectors() {
        let a = array![0.0, 0.5, 1.0];
        let b = array![0.1, 0.5, 0.7];
        assert!((mean_absolute_error(a.view(), b.view()) - 0.4 / 3.0).abs() < 1e-12);
    }
}
