//! CART decision trees over a dense `ndarray` feature matrix.
//!
//! A fitted tree is stored as parallel arrays indexed by node id, the layout
//! scikit-learn exports and the one that serializes cleanly to TOML:
//! `feature[i] == -1` marks a leaf, otherwise samples with
//! `x[feature[i]] <= threshold[i]` go to `left[i]` and the rest to `right[i]`.
//! `value[i]` is the node prediction (class-1 fraction for classification,
//! mean target for regression).

use super::{FitError, check_training_inputs};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

const LEAF: i64 = -1;
const IMPURITY_EPSILON: f64 = 1e-12;
/// Consecutive sorted values closer than this are treated as equal.
const FEATURE_THRESHOLD: f64 = 1e-7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criterion {
    /// Weighted Gini impurity of a 0/1 target.
    Gini,
    /// Weighted variance of a continuous target.
    SquaredError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxFeatures {
    All,
    /// `floor(sqrt(n_features))`, at least one, redrawn at every node.
    Sqrt,
}

/// Growth limits of a single tree.
#[derive(Debug, Clone)]
pub struct TreeSettings {
    pub criterion: Criterion,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_leaf_nodes: Option<usize>,
    pub min_weight_fraction_leaf: f64,
    pub max_features: MaxFeatures,
}

impl TreeSettings {
    /// One split, as used by AdaBoost.
    pub fn stump() -> Self {
        Self {
            criterion: Criterion::Gini,
            max_depth: Some(1),
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_leaf_nodes: None,
            min_weight_fraction_leaf: 0.0,
            max_features: MaxFeatures::All,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TreeArrays")]
pub struct DecisionTree {
    feature: Vec<i64>,
    threshold: Vec<f64>,
    left: Vec<i64>,
    right: Vec<i64>,
    value: Vec<f64>,
}

#[derive(Deserialize)]
struct TreeArrays {
    feature: Vec<i64>,
    threshold: Vec<f64>,
    left: Vec<i64>,
    right: Vec<i64>,
    value: Vec<f64>,
}

impl TryFrom<TreeArrays> for DecisionTree {
    type Error = String;

    fn try_from(raw: TreeArrays) -> Result<Self, Self::Error> {
        let n = raw.feature.len();
        Self::from_arrays(raw.feature, raw.threshold, raw.left, raw.right, raw.value)
            .ok_or_else(|| format!("malformed decision tree with {n} nodes"))
    }
}

/// Running weighted sums over a set of samples.
#[derive(Debug, Clone, Copy, Default)]
struct Moments {
    count: usize,
    w: f64,
    wy: f64,
    wyy: f64,
}

impl Moments {
    fn add(&mut self, w: f64, y: f64) {
        self.count += 1;
        self.w += w;
        self.wy += w * y;
        self.wyy += w * y * y;
    }

    fn minus(&self, other: &Moments) -> Moments {
        Moments {
            count: self.count - other.count,
            w: self.w - other.w,
            wy: self.wy - other.wy,
            wyy: self.wyy - other.wyy,
        }
    }

    fn mean(&self) -> f64 {
        if self.w > 0.0 { self.wy / self.w } else { 0.0 }
    }

    /// Node impurity multiplied by node weight.
    fn weighted_impurity(&self, criterion: Criterion) -> f64 {
        if self.w <= 0.0 {
            return 0.0;
        }
        match criterion {
            Criterion::Gini => {
                let p = self.wy / self.w;
                self.w * 2.0 * p * (1.0 - p)
            }
            Criterion::SquaredError => (self.wyy - self.wy * self.wy / self.w).max(0.0),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Split {
    feature: usize,
    threshold: f64,
    improvement: f64,
}

/// A node waiting to be split, ordered by how much the split would help.
struct Candidate {
    node: usize,
    depth: usize,
    split: Split,
    samples: Vec<usize>,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for Candidate {}
impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.split
            .improvement
            .total_cmp(&other.split.improvement)
            .then_with(|| other.node.cmp(&self.node))
    }
}

struct Builder<'a> {
    x: ArrayView2<'a, f64>,
    y: ArrayView1<'a, f64>,
    w: ArrayView1<'a, f64>,
    settings: &'a TreeSettings,
    min_weight_leaf: f64,
    tree: DecisionTree,
}

impl DecisionTree {
    /// Grows a tree on the samples with positive weight.
    ///
    /// Nodes are expanded best-first by impurity decrease, so when
    /// `max_leaf_nodes` is reached the tree keeps the most useful splits.
    pub fn fit(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        sample_weight: ArrayView1<f64>,
        settings: &TreeSettings,
        rng: &mut StdRng,
    ) -> Result<Self, FitError> {
        check_training_inputs(x, y)?;
        if sample_weight.len() != y.len() {
            return Err(FitError::LengthMismatch {
                rows: x.nrows(),
                targets: sample_weight.len(),
            });
        }
        let samples: Vec<usize> = (0..x.nrows()).filter(|&i| sample_weight[i] > 0.0).collect();
        if samples.is_empty() {
            return Err(FitError::EmptyTrainingSet);
        }

        let total_weight: f64 = samples.iter().map(|&i| sample_weight[i]).sum();
        let mut builder = Builder {
            x: x.view(),
            y: y.view(),
            w: sample_weight.view(),
            settings,
            min_weight_leaf: settings.min_weight_fraction_leaf * total_weight,
            tree: DecisionTree {
                feature: Vec::new(),
                threshold: Vec::new(),
                left: Vec::new(),
                right: Vec::new(),
                value: Vec::new(),
            },
        };

        let mut frontier = BinaryHeap::new();
        let root = builder.push_node(&samples);
        if let Some(candidate) = builder.candidate(root, 0, samples, rng) {
            frontier.push(candidate);
        }

        let mut leaves = 1usize;
        while let Some(candidate) = frontier.pop() {
            if settings.max_leaf_nodes.is_some_and(|max| leaves >= max) {
                break;
            }
            let Candidate {
                node,
                depth,
                split,
                samples,
            } = candidate;
            let (left_samples, right_samples): (Vec<usize>, Vec<usize>) = samples
                .into_iter()
                .partition(|&i| x[[i, split.feature]] <= split.threshold);

            let left = builder.push_node(&left_samples);
            let right = builder.push_node(&right_samples);
            builder.tree.feature[node] = split.feature as i64;
            builder.tree.threshold[node] = split.threshold;
            builder.tree.left[node] = left as i64;
            builder.tree.right[node] = right as i64;
            leaves += 1;

            if let Some(c) = builder.candidate(left, depth + 1, left_samples, rng) {
                frontier.push(c);
            }
            if let Some(c) = builder.candidate(right, depth + 1, right_samples, rng) {
                frontier.push(c);
            }
        }

        Ok(builder.tree)
    }

    /// Builds a tree from exported arrays. Every child must come after its
    /// parent, which rules out cycles.
    pub fn from_arrays(
        feature: Vec<i64>,
        threshold: Vec<f64>,
        left: Vec<i64>,
        right: Vec<i64>,
        value: Vec<f64>,
    ) -> Option<Self> {
        let n = feature.len();
        if n == 0 || [threshold.len(), left.len(), right.len(), value.len()] != [n; 4] {
            return None;
        }
        let child_of = |i: usize, c: i64| c > i as i64 && (c as usize) < n;
        let valid = (0..n).all(|i| {
            feature[i] == LEAF || (feature[i] >= 0 && child_of(i, left[i]) && child_of(i, right[i]))
        });
        valid.then_some(Self {
            feature,
            threshold,
            left,
            right,
            value,
        })
    }

    /// Index of the leaf `row` falls into.
    pub fn apply_row(&self, row: ArrayView1<f64>) -> usize {
        let mut node = 0usize;
        while self.feature[node] != LEAF {
            node = if row[self.feature[node] as usize] <= self.threshold[node] {
                self.left[node] as usize
            } else {
                self.right[node] as usize
            };
        }
        node
    }

    pub fn apply(&self, x: ArrayView2<f64>) -> Vec<usize> {
        x.outer_iter().map(|row| self.apply_row(row)).collect()
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        self.value[self.apply_row(row)]
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Array1<f64> {
        x.outer_iter().map(|row| self.predict_row(row)).collect()
    }

    /// Overwrites the prediction of a leaf. Used by boosting to install
    /// Newton-step leaf values after the structure has been grown.
    pub fn set_leaf_value(&mut self, leaf: usize, value: f64) {
        if self.feature.get(leaf) == Some(&LEAF) {
            self.value[leaf] = value;
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.feature.len()
    }

    /// Number of leading feature columns the splits read.
    pub fn n_features_in(&self) -> usize {
        self.feature
            .iter()
            .filter(|f| **f != LEAF)
            .map(|f| *f as usize + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn n_leaves(&self) -> usize {
        self.feature.iter().filter(|f| **f == LEAF).count()
    }

    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(0usize, 0usize)];
        while let Some((node, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            if self.feature[node] != LEAF {
                stack.push((self.left[node] as usize, depth + 1));
                stack.push((self.right[node] as usize, depth + 1));
            }
        }
        deepest
    }
}

impl Builder<'_> {
    fn moments(&self, samples: &[usize]) -> Moments {
        let mut m = Moments::default();
        for &i in samples {
            m.add(self.w[i], self.y[i]);
        }
        m
    }

    fn push_node(&mut self, samples: &[usize]) -> usize {
        let id = self.tree.feature.len();
        self.tree.feature.push(LEAF);
        self.tree.threshold.push(0.0);
        self.tree.left.push(LEAF);
        self.tree.right.push(LEAF);
        self.tree.value.push(self.moments(samples).mean());
        id
    }

    /// Returns the best admissible split of a node, if the node may be split.
    fn candidate(
        &self,
        node: usize,
        depth: usize,
        samples: Vec<usize>,
        rng: &mut StdRng,
    ) -> Option<Candidate> {
        let s = self.settings;
        let total = self.moments(&samples);
        let splittable = s.max_depth.is_none_or(|d| depth < d)
            && samples.len() >= s.min_samples_split
            && samples.len() >= 2 * s.min_samples_leaf
            && total.w >= 2.0 * self.min_weight_leaf
            && total.weighted_impurity(s.criterion) > IMPURITY_EPSILON * total.w.max(1.0);
        if !splittable {
            return None;
        }

        let n_features = self.x.ncols();
        let features: Vec<usize> = match s.max_features {
            MaxFeatures::All => (0..n_features).collect(),
            MaxFeatures::Sqrt => {
                let k = ((n_features as f64).sqrt().floor() as usize).clamp(1, n_features);
                let mut drawn = rand::seq::index::sample(rng, n_features, k).into_vec();
                drawn.sort_unstable();
                drawn
            }
        };

        let parent_impurity = total.weighted_impurity(s.criterion);
        let mut best: Option<Split> = None;
        let mut order = samples.clone();
        for feature in features {
            order.sort_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]));
            let mut left = Moments::default();
            for pos in 0..order.len() - 1 {
                let i = order[pos];
                left.add(self.w[i], self.y[i]);
                let here = self.x[[i, feature]];
                let next = self.x[[order[pos + 1], feature]];
                if next <= here + FEATURE_THRESHOLD {
                    continue;
                }
                let right = total.minus(&left);
                if left.count < s.min_samples_leaf
                    || right.count < s.min_samples_leaf
                    || left.w < self.min_weight_leaf
                    || right.w < self.min_weight_leaf
                {
                    continue;
                }
                let improvement = parent_impurity
                    - left.weighted_impurity(s.criterion)
                    - right.weighted_impurity(s.criterion);
                if best.is_none_or(|b| improvement > b.improvement) {
                    let mut threshold = (here + next) / 2.0;
                    if threshold >= next {
                        threshold = here;
                    }
                    best = Some(Split {
                        feature,
                        threshold,
                        improvement,
                    });
                }
            }
        }

        best.map(|split| Candidate {
            node,
            depth,
            split,
            samples,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, array};
    use rand::SeedableRng;

    fn unlimited(criterion: Criterion) -> TreeSettings {
        TreeSettings {
            criterion,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_leaf_nodes: None,
            min_weight_fraction_leaf: 0.0,
            max_features: MaxFeatures::All,
        }
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn stump_splits_at_the_midpoint() {
        let x = array![[1.0], [2.0], [3.0], [10.0], [11.0], [12.0]];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let w = Array1::ones(6);
        let tree = DecisionTree::fit(x.view(), y.view(), w.view(), &TreeSettings::stump(), &mut rng())
            .unwrap();
        assert_eq!(tree.n_nodes(), 3);
        assert_eq!(tree.n_leaves(), 2);
        assert_eq!(tree.depth(), 1);
        assert_abs_diff_eq!(tree.threshold[0], 6.5);
        assert_eq!(tree.predict(x.view()), y);
    }

    #[test]
    fn unlimited_tree_fits_training_data_exactly() {
        let x = array![[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]];
        let y = array![0.0, 1.0, 1.0, 0.0];
        let w = Array1::ones(4);
        let tree = DecisionTree::fit(x.view(), y.view(), w.view(), &unlimited(Criterion::Gini), &mut rng())
            .unwrap();
        assert_eq!(tree.predict(x.view()), y);
        assert_eq!(tree.n_leaves(), 4);
    }

    #[test]
    fn max_leaf_nodes_caps_growth() {
        let x = Array1::range(0.0, 16.0, 1.0).insert_axis(ndarray::Axis(1));
        let y: Array1<f64> = (0..16).map(|i| (i % 2) as f64).collect();
        let w = Array1::ones(16);
        let settings = TreeSettings {
            max_leaf_nodes: Some(3),
            ..unlimited(Criterion::Gini)
        };
        let tree = DecisionTree::fit(x.view(), y.view(), w.view(), &settings, &mut rng()).unwrap();
        assert_eq!(tree.n_leaves(), 3);
    }

    #[test]
    fn min_samples_leaf_is_respected() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0], [6.0]];
        let y = array![1.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let w = Array1::ones(6);
        let settings = TreeSettings {
            min_samples_leaf: 2,
            ..unlimited(Criterion::Gini)
        };
        let tree = DecisionTree::fit(x.view(), y.view(), w.view(), &settings, &mut rng()).unwrap();
        for leaf in tree.apply(x.view()).iter().collect::<std::collections::BTreeSet<_>>() {
            let members = tree.apply(x.view()).iter().filter(|l| *l == leaf).count();
            assert!(members >= 2);
        }
    }

    #[test]
    fn zero_weight_samples_are_ignored() {
        let x = array![[1.0], [2.0], [3.0], [4.0]];
        let y = array![0.0, 1.0, 0.0, 1.0];
        let w = array![1.0, 0.0, 1.0, 0.0];
        let tree = DecisionTree::fit(x.view(), y.view(), w.view(), &unlimited(Criterion::Gini), &mut rng())
            .unwrap();
        assert_eq!(tree.n_nodes(), 1);
        assert_abs_diff_eq!(tree.value[0], 0.0);
    }

    #[test]
    fn regression_leaves_hold_weighted_means() {
        let x = array![[1.0], [2.0], [8.0], [9.0]];
        let y = array![1.0, 3.0, 10.0, 20.0];
        let w = array![1.0, 1.0, 3.0, 1.0];
        let settings = TreeSettings {
            max_depth: Some(1),
            ..unlimited(Criterion::SquaredError)
        };
        let tree = DecisionTree::fit(x.view(), y.view(), w.view(), &settings, &mut rng()).unwrap();
        assert_abs_diff_eq!(tree.predict_row(array![1.5].view()), 2.0);
        assert_abs_diff_eq!(tree.predict_row(array![8.5].view()), 12.5);
    }

    #[test]
    fn from_arrays_validates_children() {
        let stump = DecisionTree::from_arrays(
            vec![0, -1, -1],
            vec![70.0, 0.0, 0.0],
            vec![1, -1, -1],
            vec![2, -1, -1],
            vec![0.5, 0.0, 1.0],
        )
        .unwrap();
        assert_eq!(stump.predict_row(array![71.0].view()), 1.0);
        assert!(DecisionTree::from_arrays(vec![0], vec![1.0], vec![5], vec![6], vec![0.0]).is_none());
    }

    #[test]
    fn cyclic_tree_is_rejected_on_load() {
        let looped = r#"
feature = [0, 0, -1]
threshold = [1.0, 1.0, 0.0]
left = [1, 0, -1]
right = [2, 2, -1]
value = [0.5, 0.5, 1.0]
"#;
        assert!(toml::from_str::<DecisionTree>(looped).is_err());
        let fine = looped.replace("left = [1, 0, -1]", "left = [1, 2, -1]");
        assert!(toml::from_str::<DecisionTree>(&fine).is_ok());
    }

    #[test]
    fn mismatched_weights_are_rejected() {
        let x = array![[1.0], [2.0]];
        let y = array![0.0, 1.0];
        let w = array![1.0];
        assert!(matches!(
            DecisionTree::fit(x.view(), y.view(), w.view(), &TreeSettings::stump(), &mut rng()),
            Err(FitError::LengthMismatch { .. })
        ));
    }
}
