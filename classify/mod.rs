//! # Ensemble Classification of CNV Calls
//!
//! A soft-voting ensemble of a random forest, gradient-boosted trees and
//! AdaBoost decides whether each annotated CNV is real. All three learners are
//! built on the same CART implementation in [`tree`]; the fitted ensemble is a
//! plain serde structure persisted as TOML next to the predictor names it was
//! trained on.
//!
//! - [`params`]: validated hyperparameters for the three learners.
//! - [`model::DigCnvModel`]: the configured/assembled/fitted state machine and
//!   the public training, prediction and evaluation entry points.
//! - [`metrics`]: sensitivity, specificity, AUC and the plot data tables.
//! - [`dataset`]: conversion between annotated tables and numeric matrices.

pub mod boosting;
pub mod dataset;
pub mod forest;
pub mod metrics;
pub mod model;
pub mod params;
pub mod tree;
pub mod voting;

use ndarray::{ArrayView1, ArrayView2};
use thiserror::Error;

pub use metrics::EvaluationReport;
pub use model::{DigCnvModel, ModelError};
pub use params::{
    AdaBoostParams, EnsembleParams, GradientBoostingParams, ParamsError, RandomForestParams,
};

/// Seed shared by every learner so that a training run is reproducible.
pub const RANDOM_STATE: u64 = 42;

/// Errors raised while fitting a learner.
#[derive(Error, Debug)]
pub enum FitError {
    #[error("Cannot fit a model on an empty training set")]
    EmptyTrainingSet,
    #[error("Feature matrix has {rows} rows but {targets} targets were given")]
    LengthMismatch { rows: usize, targets: usize },
    #[error("Training data contains non-finite values")]
    NonFiniteInput,
    #[error("Training labels must contain exactly two classes. Found: {found:?}")]
    NotBinary { found: Vec<i64> },
    #[error(
        "The first AdaBoost stump is no better than random guessing (weighted error {error:.4}); the ensemble cannot be fitted"
    )]
    WorseThanRandom { error: f64 },
}

/// Shape and finiteness checks shared by every learner.
pub(crate) fn check_training_inputs(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
) -> Result<(), FitError> {
    if x.nrows() == 0 {
        return Err(FitError::EmptyTrainingSet);
    }
    if x.nrows() != y.len() {
        return Err(FitError::LengthMismatch {
            rows: x.nrows(),
            targets: y.len(),
        });
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(FitError::NonFiniteInput);
    }
    Ok(())
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    let z = z.clamp(-700.0, 700.0);
    1.0 / (1.0 + f64::exp(-z))
}
