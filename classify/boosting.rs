//! Gradient boosting with binomial deviance, and discrete AdaBoost (SAMME).

use super::params::{AdaBoostParams, GradientBoostingParams};
use super::tree::{Criterion, DecisionTree, MaxFeatures, TreeSettings};
use super::{FitError, check_training_inputs, sigmoid};
use ndarray::{Array1, ArrayView1, ArrayView2, Zip};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

/// Smallest class prior used for the initial log-odds.
const PRIOR_EPSILON: f64 = 1e-12;
/// Newton denominators below this give a zero leaf update.
const HESSIAN_EPSILON: f64 = 1e-150;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    init: f64,
    learning_rate: f64,
    trees: Vec<DecisionTree>,
}

impl GradientBoosting {
    pub fn fit(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        params: &GradientBoostingParams,
        seed: u64,
    ) -> Result<Self, FitError> {
        check_training_inputs(x, y)?;
        let n = x.nrows();
        let settings = TreeSettings {
            criterion: Criterion::SquaredError,
            max_depth: Some(params.max_depth()),
            min_samples_split: params.min_samples_split(),
            min_samples_leaf: params.min_samples_leaf(),
            max_leaf_nodes: None,
            min_weight_fraction_leaf: 0.0,
            max_features: MaxFeatures::All,
        };
        let mut rng = StdRng::seed_from_u64(seed);

        let prior = (y.sum() / n as f64).clamp(PRIOR_EPSILON, 1.0 - PRIOR_EPSILON);
        let init = (prior / (1.0 - prior)).ln();
        let mut raw = Array1::from_elem(n, init);
        let ones = Array1::<f64>::ones(n);
        let mut trees = Vec::with_capacity(params.n_estimators());

        for _ in 0..params.n_estimators() {
            let prob = raw.mapv(sigmoid);
            let residual = &y - &prob;
            let mut tree = DecisionTree::fit(x, residual.view(), ones.view(), &settings, &mut rng)?;

            let leaves = tree.apply(x);
            let mut numerator = vec![0.0; tree.n_nodes()];
            let mut denominator = vec![0.0; tree.n_nodes()];
            for (i, &leaf) in leaves.iter().enumerate() {
                numerator[leaf] += residual[i];
                denominator[leaf] += prob[i] * (1.0 - prob[i]);
            }
            let steps: Vec<f64> = numerator
                .iter()
                .zip(&denominator)
                .map(|(num, den)| if den.abs() < HESSIAN_EPSILON { 0.0 } else { num / den })
                .collect();
            for (leaf, &step) in steps.iter().enumerate() {
                tree.set_leaf_value(leaf, step);
            }

            for (i, &leaf) in leaves.iter().enumerate() {
                raw[i] += params.learning_rate() * steps[leaf];
            }
            trees.push(tree);
        }

        log::debug!("Gradient boosting fitted with {} stages", trees.len());
        Ok(Self {
            init,
            learning_rate: params.learning_rate(),
            trees,
        })
    }

    pub fn decision_function(&self, x: ArrayView2<f64>) -> Array1<f64> {
        let mut raw = Array1::from_elem(x.nrows(), self.init);
        for tree in &self.trees {
            Zip::from(&mut raw)
                .and(x.rows())
                .for_each(|r, row| *r += self.learning_rate * tree.predict_row(row));
        }
        raw
    }

    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Array1<f64> {
        self.decision_function(x).mapv(sigmoid)
    }

    pub fn n_stages(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features_in(&self) -> usize {
        self.trees.iter().map(DecisionTree::n_features_in).max().unwrap_or(0)
    }
}

/// SAMME boosting of depth-one trees for a binary target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaBoost {
    stumps: Vec<DecisionTree>,
    weights: Vec<f64>,
}

impl AdaBoost {
    /// Stops early when a stump classifies the weighted sample perfectly or
    /// is no better than chance. The latter is an error only for the first
    /// stump, since nothing would remain to vote.
    pub fn fit(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        params: &AdaBoostParams,
        seed: u64,
    ) -> Result<Self, FitError> {
        check_training_inputs(x, y)?;
        let n = x.nrows();
        let settings = TreeSettings::stump();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut sample_weight = Array1::from_elem(n, 1.0 / n as f64);
        let mut stumps = Vec::new();
        let mut weights = Vec::new();

        for round in 0..params.n_estimators() {
            let stump = DecisionTree::fit(x, y, sample_weight.view(), &settings, &mut rng)?;
            let missed: Vec<bool> = stump
                .predict(x)
                .iter()
                .zip(y.iter())
                .map(|(p, t)| vote(*p) != (*t > 0.5))
                .collect();
            let total: f64 = sample_weight.sum();
            let error = missed
                .iter()
                .zip(sample_weight.iter())
                .filter(|(m, _)| **m)
                .map(|(_, w)| *w)
                .sum::<f64>()
                / total;

            if error <= 0.0 {
                stumps.push(stump);
                weights.push(1.0);
                break;
            }
            if error >= 0.5 {
                if stumps.is_empty() {
                    return Err(FitError::WorseThanRandom { error });
                }
                log::debug!("AdaBoost stopped after {round} stumps: weighted error {error:.4}");
                break;
            }

            let alpha = params.learning_rate() * ((1.0 - error) / error).ln();
            stumps.push(stump);
            weights.push(alpha);
            if round + 1 == params.n_estimators() {
                break;
            }

            for (w, &m) in sample_weight.iter_mut().zip(&missed) {
                if m && *w > 0.0 {
                    *w *= alpha.exp();
                }
            }
            let norm = sample_weight.sum();
            sample_weight /= norm;
        }

        log::debug!("AdaBoost fitted with {} stumps", stumps.len());
        Ok(Self { stumps, weights })
    }

    /// Weighted vote normalized to [-1, 1]; positive favours class 1.
    pub fn decision_function(&self, x: ArrayView2<f64>) -> Array1<f64> {
        let total: f64 = self.weights.iter().sum();
        let mut decision = Array1::<f64>::zeros(x.nrows());
        for (stump, alpha) in self.stumps.iter().zip(&self.weights) {
            for (d, p) in decision.iter_mut().zip(stump.predict(x).iter()) {
                *d += if vote(*p) { *alpha } else { -*alpha };
            }
        }
        if total > 0.0 { decision / total } else { decision }
    }

    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Array1<f64> {
        self.decision_function(x).mapv(sigmoid)
    }

    pub fn n_stumps(&self) -> usize {
        self.stumps.len()
    }

    pub fn n_features_in(&self) -> usize {
        self.stumps.iter().map(DecisionTree::n_features_in).max().unwrap_or(0)
    }
}

fn vote(class_one_fraction: f64) -> bool {
    class_one_fraction > 0.5
}
