use super::boosting::{AdaBoost, GradientBoosting};
use super::forest::RandomForest;
use super::params::EnsembleParams;
use super::{FitError, RANDOM_STATE};
use itertools::Itertools;
use ndarray::{Array1, ArrayView2};
use serde::{Deserialize, Serialize};

/// The fitted soft-voting ensemble. `classes` holds the two training labels
/// in ascending order; probabilities always refer to `classes[1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingEnsemble {
    classes: [i64; 2],
    random_forest: RandomForest,
    gradient_boosting: GradientBoosting,
    adaboost: AdaBoost,
}

impl VotingEnsemble {
    pub fn fit(
        x: ArrayView2<f64>,
        labels: &[i64],
        params: &EnsembleParams,
    ) -> Result<Self, FitError> {
        let found: Vec<i64> = labels.iter().copied().unique().sorted().collect();
        let classes = match found.as_slice() {
            [negative, positive] => [*negative, *positive],
            _ => return Err(FitError::NotBinary { found }),
        };
        let y: Array1<f64> = labels
            .iter()
            .map(|l| if *l == classes[1] { 1.0 } else { 0.0 })
            .collect();

        log::info!("Training random forest ({} trees)", params.random_forest.n_estimators());
        let random_forest = RandomForest::fit(x, y.view(), &params.random_forest, RANDOM_STATE)?;
        log::info!(
            "Training gradient boosting ({} stages)",
            params.gradient_boosting.n_estimators()
        );
        let gradient_boosting =
            GradientBoosting::fit(x, y.view(), &params.gradient_boosting, RANDOM_STATE)?;
        log::info!("Training AdaBoost ({} stumps)", params.adaboost.n_estimators());
        let adaboost = AdaBoost::fit(x, y.view(), &params.adaboost, RANDOM_STATE)?;

        Ok(Self {
            classes,
            random_forest,
            gradient_boosting,
            adaboost,
        })
    }

    pub fn classes(&self) -> [i64; 2] {
        self.classes
    }

    /// Number of feature columns the learners index into.
    pub fn n_features_in(&self) -> usize {
        self.random_forest
            .n_features_in()
            .max(self.gradient_boosting.n_features_in())
            .max(self.adaboost.n_features_in())
    }

    /// Unweighted mean of the three learners' class-1 probabilities.
    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Array1<f64> {
        (self.random_forest.predict_proba(x)
            + self.gradient_boosting.predict_proba(x)
            + self.adaboost.predict_proba(x))
            / 3.0
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Vec<i64> {
        self.predict_proba(x)
            .iter()
            .map(|p| self.label_for(*p))
            .collect()
    }

    pub fn label_for(&self, class_one_probability: f64) -> i64 {
        if class_one_probability > 0.5 {
            self.classes[1]
        } else {
            self.classes[0]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::params::{AdaBoostParams, GradientBoostingParams, RandomForestParams};
    use ndarray::{Array2, array};

    fn quick_params() -> EnsembleParams {
        EnsembleParams {
            random_forest: RandomForestParams::builder()
                .n_estimators(15)
                .max_depth(5)
                .min_samples_split(2)
                .min_samples_leaf(1)
                .max_leaf_nodes(16)
                .min_weight_fraction_leaf(0.0)
                .build()
                .unwrap(),
            gradient_boosting: GradientBoostingParams::builder()
                .n_estimators(15)
                .max_depth(3)
                .min_samples_split(2)
                .min_samples_leaf(1)
                .learning_rate(0.3)
                .build()
                .unwrap(),
            adaboost: AdaBoostParams::builder()
                .n_estimators(10)
                .learning_rate(0.5)
                .build()
                .unwrap(),
        }
    }

    fn threshold_data() -> (Array2<f64>, Vec<i64>) {
        let x = Array2::from_shape_fn((30, 2), |(i, j)| if j == 0 { i as f64 } else { (i % 4) as f64 });
        let labels = (0..30).map(|i| if i < 15 { 3 } else { 7 }).collect();
        (x, labels)
    }

    #[test]
    fn labels_are_mapped_back_to_the_training_classes() {
        let (x, labels) = threshold_data();
        let ensemble = VotingEnsemble::fit(x.view(), &labels, &quick_params()).unwrap();
        assert_eq!(ensemble.classes(), [3, 7]);
        assert_eq!(ensemble.predict(array![[1.0, 1.0], [28.0, 1.0]].view()), vec![3, 7]);
    }

    #[test]
    fn single_class_labels_are_rejected() {
        let (x, _) = threshold_data();
        match VotingEnsemble::fit(x.view(), &[1; 30], &quick_params()) {
            Err(FitError::NotBinary { found }) => assert_eq!(found, vec![1]),
            other => panic!("Expected NotBinary, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn three_classes_are_rejected() {
        let (x, mut labels) = threshold_data();
        labels[0] = 9;
        assert!(matches!(
            VotingEnsemble::fit(x.view(), &labels, &quick_params()),
            Err(FitError::NotBinary { .. })
        ));
    }

    #[test]
    fn soft_vote_is_the_mean_of_the_learners() {
        let (x, labels) = threshold_data();
        let ensemble = VotingEnsemble::fit(x.view(), &labels, &quick_params()).unwrap();
        let rows = array![[4.0, 0.0], [14.0, 2.0], [16.0, 3.0]];
        let expected = (ensemble.random_forest.predict_proba(rows.view())
            + ensemble.gradient_boosting.predict_proba(rows.view())
            + ensemble.adaboost.predict_proba(rows.view()))
            / 3.0;
        assert_eq!(ensemble.predict_proba(rows.view()), expected);
    }
}
