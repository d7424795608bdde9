#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use polars::prelude::*;
use std::path::{Path, PathBuf};
use std::process;

use digcnv::classify::dataset::{self, create_training_testing_datasets};
use digcnv::classify::{DigCnvModel, EnsembleParams, RANDOM_STATE};
use digcnv::config::DigCnvConfig;
use digcnv::pipeline::{classify_prepared_cnvs, prepare_cnvs, run_whole_annotation_process};
use digcnv::table;
use digcnv::verify::{self, Stage};

#[derive(Parser)]
#[command(
    name = "digcnv",
    about = "Annotation and classification of microarray CNV calls",
    long_about = "Merges PennCNV and QuantiSNP calls, annotates each CNV with quality \
                 features and separates true CNVs from false positives with an ensemble \
                 of tree-based classifiers."
)]
struct Cli {
    /// Log verbosity (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct TrainArgs {
    /// Tab-separated table of annotated CNVs with a label column
    #[arg(value_name = "DATA_PATH")]
    data: PathBuf,

    /// Column holding the 0/1 label of each CNV
    #[arg(long, default_value = "SnipPeep_Ok")]
    label_column: String,

    /// Predictors to train on, comma-separated
    #[arg(long, value_delimiter = ',', required = true)]
    dimensions: Vec<String>,

    /// TOML file with [random_forest], [gradient_boosting] and [adaboost] tables
    #[arg(long, value_name = "PATH")]
    params: Option<PathBuf>,

    /// Share of CNVs held out for evaluation
    #[arg(long, default_value_t = 0.33)]
    test_fraction: f64,

    #[arg(long, default_value_t = RANDOM_STATE)]
    seed: u64,

    /// Train on every CNV and evaluate on the same rows
    #[arg(long)]
    all_data: bool,

    #[arg(long, default_value = "model.toml")]
    output: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the whole process from the callers' outputs to classified CNVs
    #[command(about = "Merge, annotate and classify CNVs described by a configuration file")]
    Annotate {
        #[arg(long, value_name = "CONFIG_PATH")]
        config: PathBuf,

        /// Append class probabilities to the output
        #[arg(long)]
        probabilities: bool,
    },

    /// Write a template configuration file
    #[command(about = "Write an example configuration file")]
    ExampleConfig {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },

    /// Add derived and annotation features to an already merged CNV table
    #[command(about = "Annotate a merged CNV table (outputs: annotated TSV)")]
    Prepare {
        /// Merged CNV calls carrying the TwoAlgs column
        #[arg(value_name = "CNV_PATH")]
        cnvs: PathBuf,

        /// Configuration providing call rates, probes and annotation regions
        #[arg(long, value_name = "CONFIG_PATH")]
        config: PathBuf,

        #[arg(long)]
        output: PathBuf,
    },

    /// Train a DigCNV model on labelled CNVs
    #[command(about = "Train a DigCNV model (outputs: model.toml)")]
    Train(TrainArgs),

    /// Classify annotated CNVs with a trained model
    #[command(about = "Classify annotated CNVs (outputs: classified TSV)")]
    Predict {
        #[arg(value_name = "CNV_PATH")]
        cnvs: PathBuf,

        #[arg(long, value_name = "MODEL_PATH")]
        model: PathBuf,

        #[arg(long)]
        output: PathBuf,

        #[arg(long)]
        probabilities: bool,
    },

    /// Score a trained model against labelled CNVs
    #[command(about = "Evaluate a trained model (outputs: roc.tsv, probability_histogram.tsv)")]
    Evaluate {
        #[arg(value_name = "DATA_PATH")]
        data: PathBuf,

        #[arg(long, value_name = "MODEL_PATH")]
        model: PathBuf,

        #[arg(long, default_value = "SnipPeep_Ok")]
        label_column: String,

        /// Directory receiving the ROC curve, probability histogram and
        /// predictor correlation tables
        #[arg(long, value_name = "DIR")]
        images_dir: Option<PathBuf>,
    },

    /// Display version information
    #[command(about = "Display version information")]
    Version,
}

fn main() {
    let cli = Cli::parse();

    let log_level = cli.log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!(
            "Warning: Invalid log level '{}' provided. Defaulting to Info.",
            cli.log_level
        );
        log::LevelFilter::Info
    });
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_micros()
        .init();

    let result = match cli.command {
        Some(Commands::Annotate {
            config,
            probabilities,
        }) => run_annotate(&config, probabilities),
        Some(Commands::ExampleConfig { path }) => {
            DigCnvConfig::write_example(&path).map_err(Into::into)
        }
        Some(Commands::Prepare {
            cnvs,
            config,
            output,
        }) => run_prepare(&cnvs, &config, &output),
        Some(Commands::Train(args)) => run_train(args),
        Some(Commands::Predict {
            cnvs,
            model,
            output,
            probabilities,
        }) => run_predict(&cnvs, &model, &output, probabilities),
        Some(Commands::Evaluate {
            data,
            model,
            label_column,
            images_dir,
        }) => run_evaluate(&data, &model, &label_column, images_dir.as_deref()),
        Some(Commands::Version) => {
            println!("digcnv {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        None => Cli::command().print_help().map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_annotate(config_path: &Path, probabilities: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = DigCnvConfig::load(config_path)?;
    if config.output.path.is_none() {
        log::warn!("No [output] path configured; classified CNVs will not be written");
    }
    let classified = run_whole_annotation_process(&config, probabilities)?;

    let predictions = table::i64_values(&classified.table, table::PREDICTION)?;
    let positive = classified.classes[1];
    let positives = predictions.iter().flatten().filter(|&&p| p == positive).count();
    println!(
        "{} CNVs classified ({} predicted true), {} removed for missing predictors",
        classified.table.height(),
        positives,
        classified.removed.height()
    );
    Ok(())
}

fn run_prepare(
    cnvs_path: &Path,
    config_path: &Path,
    output: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = DigCnvConfig::load(config_path)?;
    let cnvs = table::read_tsv(cnvs_path)?;
    verify::check_if_mandatory_columns_exist(&cnvs, Stage::PreFeatureDerivation)?;
    verify::check_columns_formats(&cnvs, Stage::PreFeatureDerivation);

    let mut prepared = prepare_cnvs(cnvs, &config)?;
    table::write_tsv(&mut prepared, output)?;
    println!(
        "{} annotated CNVs written to '{}'",
        prepared.height(),
        output.display()
    );
    Ok(())
}

fn run_train(args: TrainArgs) -> Result<(), Box<dyn std::error::Error>> {
    let params = match &args.params {
        Some(path) => EnsembleParams::load(path)?,
        None => EnsembleParams::default(),
    };

    let data = table::read_tsv(&args.data)?;
    let dimensions: Vec<&str> = args.dimensions.iter().map(String::as_str).collect();
    let report = verify::compute_na_percentage(&data, &dimensions, true)?;

    let mut columns = dimensions.clone();
    columns.push(args.label_column.as_str());
    let labelled = report.cleaned.select(columns)?;
    let split = create_training_testing_datasets(
        &labelled,
        &args.label_column,
        args.test_fraction,
        args.seed,
        args.all_data,
    )?;

    let mut model = DigCnvModel::with_params(params);
    model.create_digcnv_classifier();
    model.train_digcnv_model(&split.x_train, &split.y_train)?;
    model.evaluate_cnv_classification(&split.x_test, &split.y_test)?;

    model.save_digcnv_model(&args.output)?;
    println!("Model written to '{}'", args.output.display());
    Ok(())
}

fn run_predict(
    cnvs_path: &Path,
    model_path: &Path,
    output: &Path,
    probabilities: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut model = DigCnvModel::new();
    model.open_pretrained_digcnv_model(model_path)?;

    let cnvs = table::read_tsv(cnvs_path)?;
    let mut classified = classify_prepared_cnvs(&cnvs, &model, probabilities)?;
    table::write_tsv(&mut classified.table, output)?;
    println!(
        "{} CNVs classified and written to '{}'",
        classified.table.height(),
        output.display()
    );
    Ok(())
}

fn run_evaluate(
    data_path: &Path,
    model_path: &Path,
    label_column: &str,
    images_dir: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut model = DigCnvModel::new();
    model.open_pretrained_digcnv_model(model_path)?;
    let dimensions: Vec<String> = model.dimensions().unwrap_or_default().to_vec();
    let dimensions: Vec<&str> = dimensions.iter().map(String::as_str).collect();

    let data = table::read_tsv(data_path)?;
    let mut required = dimensions.clone();
    required.push(label_column);
    let report = verify::compute_na_percentage(&data, &required, true)?;
    let expected = dataset::labels(&report.cleaned, label_column)?;

    let evaluation = model.evaluate_cnv_classification(&report.cleaned, &expected)?;
    println!(
        "Sensitivity {:.4}  Specificity {:.4}  AUC {:.4}  Accuracy {:.4}  F1 {:.4}",
        evaluation.sensitivity,
        evaluation.specificity,
        evaluation.auc,
        evaluation.accuracy,
        evaluation.f1
    );

    if let Some(dir) = images_dir {
        std::fs::create_dir_all(dir)?;
        evaluation.write_roc_tsv(&dir.join("roc.tsv"))?;
        evaluation.write_histogram_tsv(&dir.join("probability_histogram.tsv"))?;

        let correlations = verify::correlation_matrix(&report.cleaned, &dimensions)?;
        let mut columns = vec![Column::new(
            "predictor".into(),
            dimensions.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
        )];
        for (j, name) in dimensions.iter().enumerate() {
            columns.push(Column::new((*name).into(), correlations.column(j).to_vec()));
        }
        let mut matrix = DataFrame::new(columns)?;
        table::write_tsv(&mut matrix, &dir.join("correlations.tsv"))?;
        log::info!("Evaluation tables written to '{}'", dir.display());
    }
    Ok(())
}
