use super::dataset::{self, DatasetError};
use super::metrics::EvaluationReport;
use super::params::{AdaBoostParams, EnsembleParams, GradientBoostingParams, RandomForestParams};
use super::voting::VotingEnsemble;
use super::FitError;
use crate::table::{PREDICTION, PROBABILITY_C0, PROBABILITY_C1, TableError};
use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error(transparent)]
    Fit(#[from] FitError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
    #[error("The classifier has not been created. Call create_digcnv_classifier() before training.")]
    NotAssembled,
    #[error("The model is not trained. Train it or open a pre-trained model first.")]
    NotFitted,
    #[error("Training table has {rows} rows but {labels} labels were given")]
    LabelCountMismatch { rows: usize, labels: usize },
    #[error("Expected label {label} is not one of the model classes {classes:?}")]
    UnknownLabel { label: i64, classes: [i64; 2] },
    #[error("The model file lists no predictors")]
    NoDimensions,
    #[error("The model's trees read {required} predictors but the model file lists {dimensions}")]
    DimensionMismatch { required: usize, dimensions: usize },
}

/// What gets written to disk: the predictor names, in the column order the
/// ensemble expects, and the ensemble itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    pub dimensions: Vec<String>,
    pub ensemble: VotingEnsemble,
}

#[derive(Debug, Clone)]
enum ModelState {
    Configured,
    /// Snapshot of the hyperparameters the classifier was created with.
    Assembled(EnsembleParams),
    Fitted(FittedModel),
}

/// The DigCNV classifier through its lifecycle: configured with
/// hyperparameters, assembled into an untrained ensemble, then fitted either
/// by training or by opening a saved model.
#[derive(Debug, Clone)]
pub struct DigCnvModel {
    params: EnsembleParams,
    state: ModelState,
}

impl Default for DigCnvModel {
    fn default() -> Self {
        Self::new()
    }
}

impl DigCnvModel {
    /// A configured model with the tuned default hyperparameters.
    pub fn new() -> Self {
        Self::with_params(EnsembleParams::default())
    }

    pub fn with_params(params: EnsembleParams) -> Self {
        Self {
            params,
            state: ModelState::Configured,
        }
    }

    pub fn rf_params(&self) -> &RandomForestParams {
        &self.params.random_forest
    }

    pub fn gtb_params(&self) -> &GradientBoostingParams {
        &self.params.gradient_boosting
    }

    pub fn ada_params(&self) -> &AdaBoostParams {
        &self.params.adaboost
    }

    // Setters only change the configuration. An already created classifier
    // keeps the parameters it was created with until it is created again.
    pub fn set_rf_params(&mut self, params: RandomForestParams) {
        self.params.random_forest = params;
    }

    pub fn set_gtb_params(&mut self, params: GradientBoostingParams) {
        self.params.gradient_boosting = params;
    }

    pub fn set_ada_params(&mut self, params: AdaBoostParams) {
        self.params.adaboost = params;
    }

    /// Builds the untrained voting ensemble from the current parameters.
    /// Discards any fitted ensemble.
    pub fn create_digcnv_classifier(&mut self) {
        if self.is_fitted() {
            log::warn!("Discarding the fitted ensemble to create a new classifier");
        }
        self.state = ModelState::Assembled(self.params);
        log::info!("DigCNV classifier created");
    }

    pub fn is_fitted(&self) -> bool {
        matches!(self.state, ModelState::Fitted(_))
    }

    /// Predictor names of the fitted model, in matrix column order.
    pub fn dimensions(&self) -> Option<&[String]> {
        match &self.state {
            ModelState::Fitted(fitted) => Some(&fitted.dimensions),
            _ => None,
        }
    }

    pub fn classes(&self) -> Option<[i64; 2]> {
        self.fitted().ok().map(|f| f.ensemble.classes())
    }

    /// Trains on every column of `features`, in order. `labels` must hold
    /// exactly two distinct classes.
    pub fn train_digcnv_model(
        &mut self,
        features: &DataFrame,
        labels: &[i64],
    ) -> Result<(), ModelError> {
        let ModelState::Assembled(params) = &self.state else {
            return Err(ModelError::NotAssembled);
        };
        if features.height() != labels.len() {
            return Err(ModelError::LabelCountMismatch {
                rows: features.height(),
                labels: labels.len(),
            });
        }
        let dimensions: Vec<String> = features
            .get_column_names()
            .iter()
            .map(|c| c.to_string())
            .collect();
        let names: Vec<&str> = dimensions.iter().map(String::as_str).collect();
        let x = dataset::feature_matrix(features, &names)?;

        log::info!(
            "Training DigCNV on {} CNVs with predictors {:?}",
            x.nrows(),
            dimensions
        );
        let ensemble = VotingEnsemble::fit(x.view(), labels, params)?;
        self.state = ModelState::Fitted(FittedModel {
            dimensions,
            ensemble,
        });
        log::info!("DigCNV model trained");
        Ok(())
    }

    /// Replaces the current state with a saved model. On error the model is
    /// left as it was.
    pub fn open_pretrained_digcnv_model(&mut self, path: &Path) -> Result<(), ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let fitted: FittedModel = toml::from_str(&toml_string)?;
        if fitted.dimensions.is_empty() {
            return Err(ModelError::NoDimensions);
        }
        let required = fitted.ensemble.n_features_in();
        if required > fitted.dimensions.len() {
            return Err(ModelError::DimensionMismatch {
                required,
                dimensions: fitted.dimensions.len(),
            });
        }
        log::info!("Model loaded from '{}'", path.display());
        log::info!("Predictors used: {:?}", fitted.dimensions);
        self.state = ModelState::Fitted(fitted);
        Ok(())
    }

    pub fn save_digcnv_model(&self, path: &Path) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self.fitted()?)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        log::info!("Model saved to '{}'", path.display());
        Ok(())
    }

    /// Classifies every row of `df` and appends the `DigCNVpred` column.
    ///
    /// With `use_probabilities` the class probabilities are also appended as
    /// `DigCNVproba_C0`/`DigCNVproba_C1` and returned as an `n x 2` matrix
    /// whose columns follow the sorted class labels.
    pub fn predict_cnv_classes(
        &self,
        df: &mut DataFrame,
        use_probabilities: bool,
    ) -> Result<Option<Array2<f64>>, ModelError> {
        let fitted = self.fitted()?;
        let names: Vec<&str> = fitted.dimensions.iter().map(String::as_str).collect();
        let x = dataset::feature_matrix(df, &names)?;

        let proba = fitted.ensemble.predict_proba(x.view());
        let predictions: Vec<i64> = proba.iter().map(|p| fitted.ensemble.label_for(*p)).collect();
        df.with_column(Series::new(PREDICTION.into(), predictions))?;
        log::info!("{} CNVs classified", df.height());

        if !use_probabilities {
            return Ok(None);
        }
        let mut matrix = Array2::<f64>::zeros((proba.len(), 2));
        for (i, p) in proba.iter().enumerate() {
            matrix[[i, 0]] = 1.0 - p;
            matrix[[i, 1]] = *p;
        }
        df.with_column(Series::new(PROBABILITY_C0.into(), matrix.column(0).to_vec()))?;
        df.with_column(Series::new(PROBABILITY_C1.into(), matrix.column(1).to_vec()))?;
        Ok(Some(matrix))
    }

    /// Scores the model on `df` against the `expected` labels.
    pub fn evaluate_cnv_classification(
        &self,
        df: &DataFrame,
        expected: &[i64],
    ) -> Result<EvaluationReport, ModelError> {
        let fitted = self.fitted()?;
        if df.height() != expected.len() {
            return Err(ModelError::LabelCountMismatch {
                rows: df.height(),
                labels: expected.len(),
            });
        }
        let classes = fitted.ensemble.classes();
        let truth = expected
            .iter()
            .map(|&label| {
                if label == classes[1] {
                    Ok(true)
                } else if label == classes[0] {
                    Ok(false)
                } else {
                    Err(ModelError::UnknownLabel { label, classes })
                }
            })
            .collect::<Result<Vec<bool>, _>>()?;

        let names: Vec<&str> = fitted.dimensions.iter().map(String::as_str).collect();
        let x = dataset::feature_matrix(df, &names)?;
        let scores = fitted.ensemble.predict_proba(x.view()).to_vec();
        let predicted: Vec<bool> = scores.iter().map(|p| *p > 0.5).collect();

        let report = EvaluationReport::new(&truth, &predicted, &scores);
        report.log_summary();
        Ok(report)
    }

    fn fitted(&self) -> Result<&FittedModel, ModelError> {
        match &self.state {
            ModelState::Fitted(fitted) => Ok(fitted),
            _ => Err(ModelError::NotFitted),
        }
    }
}
