//! The complete annotation run: merge the callers' outputs, derive and
//! annotate features, gate the data, then classify with a trained model.

use crate::classify::{DigCnvModel, ModelError};
use crate::config::{ConfigError, DigCnvConfig};
use crate::features::{self, FeatureError};
use crate::merge::{self, CnVision, MergeError};
use crate::overlap::{self, OverlapError};
use crate::table::{self, TableError};
use crate::verify::{self, Stage, VerifyError};
use ndarray::Array2;
use polars::prelude::DataFrame;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    Feature(#[from] FeatureError),
    #[error(transparent)]
    Overlap(#[from] OverlapError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Output of the classification stage.
#[derive(Debug, Clone)]
pub struct ClassifiedCnvs {
    /// Complete CNVs with `DigCNVpred` (and probability columns if requested).
    pub table: DataFrame,
    /// CNVs set aside because a predictor was missing.
    pub removed: DataFrame,
    pub probabilities: Option<Array2<f64>>,
    /// Labels of the model, negative class first.
    pub classes: [i64; 2],
}

/// Adds every derived and annotation feature to a merged CNV table.
pub fn prepare_cnvs(cnvs: DataFrame, config: &DigCnvConfig) -> Result<DataFrame, PipelineError> {
    let cnvs = features::add_derived_features(cnvs)?;
    let cnvs = features::add_call_rate_to_dataset(
        cnvs,
        &config.call_rates.path,
        &config.call_rates.callrate_colname,
        &config.call_rates.individual_colname,
    )?;
    let cnvs = features::add_nb_probe_by_tech(cnvs, &config.probes.source())?;
    let cnvs = features::transform_two_algs_feature(cnvs)?;
    let cnvs = overlap::add_chromosomic_annotation(
        cnvs,
        &config.annotation.centromeres,
        &config.annotation.segdups,
    )?;
    let cnvs = match &config.annotation.quality {
        Some(path) => features::add_micro_array_quality_data(cnvs, path)?,
        None => cnvs,
    };
    Ok(cnvs)
}

/// Gates a prepared table on the model's predictors and classifies the
/// complete rows.
pub fn classify_prepared_cnvs(
    cnvs: &DataFrame,
    model: &DigCnvModel,
    use_probabilities: bool,
) -> Result<ClassifiedCnvs, PipelineError> {
    verify::check_if_mandatory_columns_exist(cnvs, Stage::PostFeatureDerivation)?;
    verify::check_columns_formats(cnvs, Stage::PostFeatureDerivation);
    let classes = model.classes().ok_or(ModelError::NotFitted)?;

    let dimensions: Vec<&str> = model
        .dimensions()
        .ok_or(ModelError::NotFitted)?
        .iter()
        .map(String::as_str)
        .collect();
    let report = verify::compute_na_percentage(cnvs, &dimensions, true)?;

    let mut table = report.cleaned;
    let probabilities = model.predict_cnv_classes(&mut table, use_probabilities)?;
    Ok(ClassifiedCnvs {
        table,
        removed: report.removed,
        probabilities,
        classes,
    })
}

/// Runs the whole process described by `config` and writes the classified
/// table when an output path is configured.
pub fn run_whole_annotation_process(
    config: &DigCnvConfig,
    use_probabilities: bool,
) -> Result<ClassifiedCnvs, PipelineError> {
    let merger = CnVision::new(&config.merge.script)
        .with_interpreter(&config.merge.perl)
        .with_timeout(config.merge.timeout());
    let cnvs = merge::merge_multiple_cnv_calling_outputs(
        &merger,
        &[config.inputs.penncnv.clone(), config.inputs.quantisnp.clone()],
        &["PennCNV", "QuantiSNP"],
    )?;

    let cnvs = prepare_cnvs(cnvs, config)?;

    let mut model = DigCnvModel::new();
    model.open_pretrained_digcnv_model(&config.model.path)?;

    let mut classified = classify_prepared_cnvs(&cnvs, &model, use_probabilities)?;
    if let Some(path) = &config.output.path {
        table::write_tsv(&mut classified.table, path)?;
        log::info!("Classified CNVs written to '{}'", path.display());
    }
    Ok(classified)
}
