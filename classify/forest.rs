use super::params::RandomForestParams;
use super::tree::{Criterion, DecisionTree, MaxFeatures, TreeSettings};
use super::{FitError, check_training_inputs};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Bagged Gini trees with a random feature subset at every split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    /// Each tree sees a bootstrap resample of the rows, expressed as integer
    /// sample weights. Tree seeds are drawn up front from `seed`, so the
    /// forest is identical whatever the thread count.
    pub fn fit(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        params: &RandomForestParams,
        seed: u64,
    ) -> Result<Self, FitError> {
        check_training_inputs(x, y)?;
        let settings = TreeSettings {
            criterion: Criterion::Gini,
            max_depth: Some(params.max_depth()),
            min_samples_split: params.min_samples_split(),
            min_samples_leaf: params.min_samples_leaf(),
            max_leaf_nodes: Some(params.max_leaf_nodes()),
            min_weight_fraction_leaf: params.min_weight_fraction_leaf(),
            max_features: MaxFeatures::Sqrt,
        };

        let mut master = StdRng::seed_from_u64(seed);
        let tree_seeds: Vec<u64> = (0..params.n_estimators()).map(|_| master.next_u64()).collect();
        let n = x.nrows();

        let trees = tree_seeds
            .par_iter()
            .map(|&tree_seed| {
                let mut rng = StdRng::seed_from_u64(tree_seed);
                let mut weights = Array1::<f64>::zeros(n);
                for _ in 0..n {
                    weights[rng.gen_range(0..n)] += 1.0;
                }
                DecisionTree::fit(x, y, weights.view(), &settings, &mut rng)
            })
            .collect::<Result<Vec<_>, _>>()?;

        log::debug!("Random forest fitted with {} trees", trees.len());
        Ok(Self { trees })
    }

    /// Mean class-1 probability over the trees.
    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Array1<f64> {
        let mut total = Array1::<f64>::zeros(x.nrows());
        for tree in &self.trees {
            total += &tree.predict(x);
        }
        total / self.trees.len().max(1) as f64
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features_in(&self) -> usize {
        self.trees.iter().map(DecisionTree::n_features_in).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};

    fn separable() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((40, 3), |(i, j)| match j {
            0 => i as f64,
            1 => ((i * 7) % 11) as f64,
            _ => ((i * 3) % 5) as f64,
        });
        let y = (0..40).map(|i| if i >= 20 { 1.0 } else { 0.0 }).collect();
        (x, y)
    }

    fn small_params() -> RandomForestParams {
        RandomForestParams::builder()
            .n_estimators(25)
            .max_depth(6)
            .min_samples_split(2)
            .min_samples_leaf(1)
            .max_leaf_nodes(20)
            .min_weight_fraction_leaf(0.0)
            .build()
            .unwrap()
    }

    #[test]
    fn forest_separates_an_easy_problem() {
        let (x, y) = separable();
        let forest = RandomForest::fit(x.view(), y.view(), &small_params(), 42).unwrap();
        assert_eq!(forest.n_trees(), 25);
        let proba = forest.predict_proba(array![[2.0, 3.0, 1.0], [37.0, 3.0, 1.0]].view());
        assert!(proba[0] < 0.5, "low row scored {}", proba[0]);
        assert!(proba[1] > 0.5, "high row scored {}", proba[1]);
    }

    #[test]
    fn same_seed_gives_same_forest() {
        let (x, y) = separable();
        let a = RandomForest::fit(x.view(), y.view(), &small_params(), 7).unwrap();
        let b = RandomForest::fit(x.view(), y.view(), &small_params(), 7).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn probabilities_stay_in_unit_interval() {
        let (x, y) = separable();
        let forest = RandomForest::fit(x.view(), y.view(), &small_params(), 42).unwrap();
        assert!(forest.predict_proba(x.view()).iter().all(|p| (0.0..=1.0).contains(p)));
    }
}
