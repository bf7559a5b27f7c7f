//! Score calibration: raw detector output → bounded anomaly score.

mod bounds;

pub use bounds::{CalibrationBounds, SCORE_EPSILON};
