//! Isolation forest over normalized feature vectors.
//!
//! Raw score is `-2^(-E[h(x)] / c(psi))`: close to -1 for easily isolated points, close to -0.5
//! (or above) for normal ones. Fitting is sequential and seeded, so identical data gives an
//! identical forest.

use super::Detector;
use crate::config::DetectorParams;
use crate::error::DetectorError;
use crate::features::percentile_sorted;
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn build(
        x: ArrayView2<'_, f64>,
        sample: &mut [usize],
        features: &[usize],
        height_limit: usize,
        rng: &mut StdRng,
    ) -> Self {
        let mut tree = IsolationTree { nodes: Vec::new() };
        tree.grow(x, sample, features, 0, height_limit, rng);
        tree
    }

    fn grow(
        &mut self,
        x: ArrayView2<'_, f64>,
        rows: &mut [usize],
        features: &[usize],
        depth: usize,
        height_limit: usize,
        rng: &mut StdRng,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { size: rows.len() });
        if depth >= height_limit || rows.len() <= 1 {
            return id;
        }

        let mut candidates = features.to_vec();
        candidates.shuffle(rng);
        let split = candidates.into_iter().find_map(|f| {
            let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                let v = x[[r, f]];
                (lo.min(v), hi.max(v))
            });
            (hi > lo).then_some((f, lo, hi))
        });
        // every candidate feature is constant over these rows
        let Some((feature, lo, hi)) = split else {
            return id;
        };

        let threshold = rng.gen_range(lo..hi);
        let mut mid = 0;
        for i in 0..rows.len() {
            if x[[rows[i], feature]] <= threshold {
                rows.swap(i, mid);
                mid += 1;
            }
        }
        let (left_rows, right_rows) = rows.split_at_mut(mid);
        let left = self.grow(x, left_rows, features, depth + 1, height_limit, rng);
        let right = self.grow(x, right_rows, features, depth + 1, height_limit, rng);
        self.nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    fn path_length(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut id = 0;
        let mut depth = 0.0;
        loop {
            match self.nodes.get(id) {
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    id = if row[*feature] <= *threshold { *left } else { *right };
                    depth += 1.0;
                }
                Some(Node::Leaf { size }) => return depth + average_path_length(*size),
                None => return depth,
            }
        }
    }
}

/// Average unsuccessful-search path length in a BST of `n` points.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    params: DetectorParams,
    trees: Vec<IsolationTree>,
    n_features: usize,
    sample_size: usize,
    /// Raw score at the contamination percentile of the training set.
    offset: f64,
}

impl IsolationForest {
    pub fn new(params: DetectorParams) -> Self {
        Self {
            params,
            trees: Vec::new(),
            n_features: 0,
            sample_size: 0,
            offset: -0.5,
        }
    }

    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    /// Raw-score threshold below which a point counts as an outlier.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn is_outlier(&self, raw_score: f64) -> bool {
        raw_score < self.offset
    }

    fn score_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mean = self.trees.iter().map(|t| t.path_length(row)).sum::<f64>() / self.trees.len() as f64;
        let norm = average_path_length(self.sample_size).max(f64::MIN_POSITIVE);
        -(2f64.powf(-mean / norm))
    }
}

impl Detector for IsolationForest {
    fn fit(&mut self, x: ArrayView2<'_, f64>) -> Result<(), DetectorError> {
        check_params(&self.params)?;
        let (rows, cols) = x.dim();
        if rows == 0 || cols == 0 {
            return Err(DetectorError::EmptyInput);
        }

        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let sample_size = self.params.max_samples.clamp(1, rows);
        let height_limit = (sample_size.max(2) as f64).log2().ceil() as usize;
        let n_tree_features = ((self.params.max_features * cols as f64) as usize).clamp(1, cols);

        let mut trees = Vec::with_capacity(self.params.n_estimators);
        for _ in 0..self.params.n_estimators {
            let mut sample: Vec<usize> = if self.params.bootstrap {
                (0..sample_size).map(|_| rng.gen_range(0..rows)).collect()
            } else {
                index::sample(&mut rng, rows, sample_size).into_vec()
            };
            let features: Vec<usize> = if n_tree_features == cols {
                (0..cols).collect()
            } else {
                index::sample(&mut rng, cols, n_tree_features).into_vec()
            };
            trees.push(IsolationTree::build(x, &mut sample, &features, height_limit, &mut rng));
        }

        self.trees = trees;
        self.n_features = cols;
        self.sample_size = sample_size;

        let mut scores = self.score_samples(x)?.to_vec();
        scores.sort_by(f64::total_cmp);
        self.offset = percentile_sorted(&scores, 100.0 * self.params.contamination);
        tracing::debug!(
            trees = self.trees.len(),
            sample_size,
            offset = self.offset,
            "isolation forest fitted"
        );
        Ok(())
    }

    fn score_samples(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>, DetectorError> {
        if !self.is_fitted() {
            return Err(DetectorError::NotFitted);
        }
        if x.ncols() != self.n_features {
            return Err(DetectorError::DimensionMismatch {
                expected: self.n_features,
                actual: x.ncols(),
            });
        }
        Ok(x.outer_iter().map(|row| self.score_row(row)).collect())
    }

    fn n_features(&self) -> Option<usize> {
        self.is_fitted().then_some(self.n_features)
    }
}

/// Rejects hyperparameters that would make the forest or its offset meaningless.
fn check_params(p: &DetectorParams) -> Result<(), DetectorError> {
    if p.n_estimators == 0 {
        return Err(DetectorError::InvalidParams("n_estimators must be at least 1".into()));
    }
    if p.max_samples == 0 {
        return Err(DetectorError::InvalidParams("max_samples must be at least 1".into()));
    }
    if !(p.contamination > 0.0 && p.contamination <= 0.5) {
        return Err(DetectorError::InvalidParams(format!(
            "contamination must be in (0, 0.5], got {}",
            p.contamination
        )));
    }
    if !(p.max_features > 0.0 && p.max_features <= 1.0) {
        return Err(DetectorError::InvalidParams(format!(
            "max_features must be in (0, 1], got {}",
            p.max_features
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn small_params() -> DetectorParams {
        DetectorParams {
            n_estimators: 50,
            max_samples: 64,
            ..DetectorParams::default()
        }
    }

    /// A tight cluster around the origin plus one far-away point at the end.
    fn cluster_with_outlier() -> Array2<f64> {
        let mut rows = Vec::new();
        for i in 0..120 {
            let a = (i % 11) as f64 * 0.01;
            let b = (i % 7) as f64 * 0.01;
            rows.extend_from_slice(&[a, b]);
        }
        rows.extend_from_slice(&[25.0, -30.0]);
        Array2::from_shape_vec((121, 2), rows).unwrap()
    }

    #[test]
    fn outlier_scores_lower_than_inliers() {
        let x = cluster_with_outlier();
        let mut f = IsolationForest::new(small_params());
        f.fit(x.view()).unwrap();
        let s = f.score_samples(x.view()).unwrap();
        let outlier = s[120];
        let inlier_min = s.iter().take(120).copied().fold(f64::INFINITY, f64::min);
        assert!(outlier < inlier_min, "outlier {} inlier min {}", outlier, inlier_min);
        assert!(s.iter().all(|&v| (-1.0..0.0).contains(&v)));
        assert!(f.is_outlier(outlier));
    }

    #[test]
    fn fitting_is_deterministic() {
        let x = cluster_with_outlier();
        let mut a = IsolationForest::new(small_params());
        let mut b = IsolationForest::new(small_params());
        a.fit(x.view()).unwrap();
        b.fit(x.view()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.score_samples(x.view()).unwrap(), b.score_samples(x.view()).unwrap());
    }

    #[test]
    fn unfitted_and_mismatched_inputs_fail() {
        let f = IsolationForest::new(small_params());
        let x = Array2::<f64>::zeros((1, 2));
        assert!(matches!(f.score_samples(x.view()), Err(DetectorError::NotFitted)));

        let mut f = IsolationForest::new(small_params());
        f.fit(cluster_with_outlier().view()).unwrap();
        let wrong = Array2::<f64>::zeros((1, 3));
        assert!(matches!(
            f.score_samples(wrong.view()),
            Err(DetectorError::DimensionMismatch { expected: 2, actual: 3 })
        ));
        assert_eq!(f.n_features(), Some(2));
    }

    #[test]
    fn constant_data_gives_constant_scores() {
        let x = Array2::<f64>::ones((30, 3));
        let mut f = IsolationForest::new(small_params());
        f.fit(x.view()).unwrap();
        let s = f.score_samples(x.view()).unwrap();
        assert!(s.iter().all(|&v| v == s[0]));
    }

    #[test]
    fn serde_round_trip_preserves_scores() {
        let x = cluster_with_outlier();
        let mut f = IsolationForest::new(small_params());
        f.fit(x.view()).unwrap();
        let json = serde_json::to_string(&f).unwrap();
        let back: IsolationForest = serde_json::from_str(&json).unwrap();
        assert_eq!(f.score_samples(x.view()).unwrap(), back.score_samples(x.view()).unwrap());
    }

    #[test]
    fn average_path_length_small_cases() {
        assert_eq!(average_path_length(0), 0.0);
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!(average_path_length(256) > 9.0 && average_path_length(256) < 11.0);
    }

    #[test]
    fn out_of_range_params_are_rejected_before_fitting() {
        let x = cluster_with_outlier();
        for params in [
            DetectorParams { contamination: 1.5, ..small_params() },
            DetectorParams { contamination: f64::NAN, ..small_params() },
            DetectorParams { contamination: 0.0, ..small_params() },
            DetectorParams { n_estimators: 0, ..small_params() },
            DetectorParams { max_features: 0.0, ..small_params() },
            DetectorParams { max_features: 1.5, ..small_params() },
        ] {
            let mut f = IsolationForest::new(params.clone());
            let err = f.fit(x.view()).unwrap_err();
            assert!(matches!(err, DetectorError::InvalidParams(_)), "{:?}", params);
            assert!(!f.is_fitted());
        }
    }
}
