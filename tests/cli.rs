use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::process::Command;

use tempfile::tempdir;

const PARAMS: &str = r#"
[random_forest]
n_estimators = 12
max_depth = 5
min_samples_split = 2
min_samples_leaf = 1
max_leaf_nodes = 16
min_weight_fraction_leaf = 0.0

[gradient_boosting]
n_estimators = 15
max_depth = 3
min_samples_split = 2
min_samples_leaf = 1
learning_rate = 0.3

[adaboost]
n_estimators = 10
learning_rate = 0.5
"#;

/// Fully annotated CNVs; those supported by both callers are labelled true.
fn write_annotated(path: &Path, rows: usize, offset: usize) {
    let mut data = String::from(
        "SampleID\tCHR\tSTART\tSTOP\tScore_SNP\tWF\tTwoAlgs\toverlapCNV_Centromere\t\
         overlapCNV_SegDup\tDENSITY\tCallRate\tNb_Probe_tech\tSnipPeep_Ok\n",
    );
    for i in offset..offset + rows {
        let label = i % 2;
        let two_algs = if label == 1 { 55 + i % 45 } else { i % 35 };
        writeln!(
            data,
            "S{}\t{}\t{}\t{}\t{:.2}\t{:.3}\t{}\t0.0\t{:.2}\t{:.6}\t{:.3}\t650000\t{}",
            i % 9,
            1 + i % 22,
            10_000 * i,
            10_000 * i + 4_999,
            1.0 + (i % 7) as f64 * 0.4,
            0.01 * (i % 4) as f64,
            two_algs,
            0.1 * (i % 3) as f64,
            1e-4 * (1 + i % 5) as f64,
            0.97 + 0.005 * (i % 5) as f64,
            label
        )
        .unwrap();
    }
    fs::write(path, data).unwrap();
}

fn digcnv(dir: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_digcnv"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("run digcnv cli")
}

#[test]
fn train_predict_and_evaluate_from_the_command_line() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path();
    write_annotated(&dir.join("train.tsv"), 90, 0);
    write_annotated(&dir.join("new.tsv"), 20, 1000);
    fs::write(dir.join("params.toml"), PARAMS).unwrap();

    let out = digcnv(
        dir,
        &[
            "train",
            "train.tsv",
            "--dimensions",
            "Score_SNP,TwoAlgs,DENSITY,CallRate",
            "--params",
            "params.toml",
        ],
    );
    assert!(out.status.success(), "train failed: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(String::from_utf8_lossy(&out.stderr).matches("Sensitivity:").count(), 1);
    let model = fs::read_to_string(dir.join("model.toml")).unwrap();
    assert!(model.contains("TwoAlgs"));

    let out = digcnv(
        dir,
        &["predict", "new.tsv", "--model", "model.toml", "--output", "pred.tsv", "--probabilities"],
    );
    assert!(out.status.success(), "predict failed: {}", String::from_utf8_lossy(&out.stderr));
    let predicted = fs::read_to_string(dir.join("pred.tsv")).unwrap();
    let header = predicted.lines().next().unwrap();
    assert!(header.contains("DigCNVpred"));
    assert!(header.contains("DigCNVproba_C1"));
    assert_eq!(predicted.lines().count(), 21);

    let out = digcnv(
        dir,
        &["evaluate", "new.tsv", "--model", "model.toml", "--images-dir", "plots"],
    );
    assert!(out.status.success(), "evaluate failed: {}", String::from_utf8_lossy(&out.stderr));
    assert!(String::from_utf8_lossy(&out.stdout).contains("Sensitivity"));
    let log = String::from_utf8_lossy(&out.stderr);
    assert_eq!(log.matches("Sensitivity:").count(), 1, "metrics logged more than once: {log}");
    for file in ["roc.tsv", "probability_histogram.tsv", "correlations.tsv"] {
        assert!(dir.join("plots").join(file).exists(), "{file} missing");
    }
}

#[test]
fn example_config_is_written_once() {
    let tmp = tempdir().unwrap();
    let out = digcnv(tmp.path(), &["example-config", "digcnv.toml"]);
    assert!(out.status.success());
    assert!(tmp.path().join("digcnv.toml").exists());

    let out = digcnv(tmp.path(), &["example-config", "digcnv.toml"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("already exists"));
}

#[test]
fn incomplete_hyperparameters_stop_training() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path();
    write_annotated(&dir.join("train.tsv"), 30, 0);
    fs::write(
        dir.join("params.toml"),
        "[adaboost]\nn_estimators = 10\n",
    )
    .unwrap();

    let out = digcnv(
        dir,
        &["train", "train.tsv", "--dimensions", "TwoAlgs", "--params", "params.toml"],
    );
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("learning_rate"));
    assert!(!dir.join("model.toml").exists());
}
