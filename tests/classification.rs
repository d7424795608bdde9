use digcnv::classify::dataset::create_training_testing_datasets;
use digcnv::classify::{
    AdaBoostParams, DigCnvModel, EnsembleParams, GradientBoostingParams, ModelError,
    RandomForestParams,
};
use digcnv::verify::compute_na_percentage;
use polars::prelude::*;

fn labelled_cnvs(n: usize) -> DataFrame {
    let label: Vec<i64> = (0..n).map(|i| (i % 2) as i64).collect();
    let two_algs: Vec<Option<f64>> = (0..n)
        .map(|i| match i {
            7 | 19 => None,
            _ if i % 2 == 1 => Some(50.0 + (i % 50) as f64),
            _ => Some((i % 40) as f64),
        })
        .collect();
    let wf: Vec<f64> = (0..n).map(|i| 0.01 * (i % 6) as f64 - 0.02).collect();
    let density: Vec<f64> = (0..n).map(|i| 2e-4 * (1 + i % 4) as f64).collect();
    df!(
        "TwoAlgs" => two_algs,
        "WF" => wf,
        "DENSITY" => density,
        "SnipPeep_Ok" => label
    )
    .unwrap()
}

fn small_params() -> EnsembleParams {
    EnsembleParams::from_toml_str(
        r#"
[random_forest]
n_estimators = 10
max_depth = 4
min_samples_split = 2
min_samples_leaf = 1
max_leaf_nodes = 12
min_weight_fraction_leaf = 0.0

[gradient_boosting]
n_estimators = 12
max_depth = 2
min_samples_split = 2
min_samples_leaf = 1
learning_rate = 0.3
"#,
    )
    .unwrap()
}

#[test]
fn absent_tables_keep_default_hyperparameters() {
    let params = small_params();
    assert_eq!(params.random_forest.n_estimators(), 10);
    assert_eq!(params.gradient_boosting.max_depth(), 2);
    assert_eq!(params.adaboost, AdaBoostParams::default());
    assert_eq!(params.adaboost.n_estimators(), 117);
}

#[test]
fn incomplete_cnvs_are_removed_before_a_reproducible_split() {
    let report =
        compute_na_percentage(&labelled_cnvs(100), &["TwoAlgs", "WF", "DENSITY"], true).unwrap();
    assert_eq!(report.cleaned.height(), 98);
    assert_eq!(report.removed.height(), 2);

    let split =
        create_training_testing_datasets(&report.cleaned, "SnipPeep_Ok", 0.33, 42, false).unwrap();
    assert_eq!(split.x_test.height(), 33);
    assert_eq!(split.x_train.height(), 65);
    assert_eq!(split.x_train.get_column_names_str(), ["TwoAlgs", "WF", "DENSITY"]);

    let mut model = DigCnvModel::with_params(small_params());
    model.create_digcnv_classifier();
    model
        .train_digcnv_model(&split.x_train, &split.y_train)
        .unwrap();
    assert_eq!(model.classes(), Some([0, 1]));

    let report = model
        .evaluate_cnv_classification(&split.x_test, &split.y_test)
        .unwrap();
    assert!(report.accuracy > 0.9, "accuracy {}", report.accuracy);
    assert!(report.auc > 0.9, "auc {}", report.auc);
    assert_eq!(report.confusion.total(), 33);

    let mut again = DigCnvModel::with_params(small_params());
    again.create_digcnv_classifier();
    again
        .train_digcnv_model(&split.x_train, &split.y_train)
        .unwrap();
    let mut first = split.x_test.clone();
    let mut second = split.x_test.clone();
    let p1 = model.predict_cnv_classes(&mut first, true).unwrap().unwrap();
    let p2 = again.predict_cnv_classes(&mut second, true).unwrap().unwrap();
    assert_eq!(p1, p2);
}

#[test]
fn setters_after_assembly_apply_to_the_next_classifier_only() {
    let mut model = DigCnvModel::new();
    model.create_digcnv_classifier();
    let stumps = AdaBoostParams::builder()
        .n_estimators(3)
        .learning_rate(1.0)
        .build()
        .unwrap();
    model.set_ada_params(stumps);
    assert_eq!(model.ada_params().n_estimators(), 3);
    assert_eq!(model.rf_params(), &RandomForestParams::default());
    assert_eq!(model.gtb_params(), &GradientBoostingParams::default());
    assert!(!model.is_fitted());
}

#[test]
fn training_with_a_single_class_is_rejected() {
    let features = df!("TwoAlgs" => [10.0, 20.0, 30.0]).unwrap();
    let mut model = DigCnvModel::with_params(small_params());
    model.create_digcnv_classifier();
    assert!(matches!(
        model.train_digcnv_model(&features, &[1, 1, 1]),
        Err(ModelError::Fit(_))
    ));
    assert!(!model.is_fitted());
}
