//! Data-quality gate applied before classification: schema checks, advisory
//! type checks, missing-value accounting and the correlation table of the
//! chosen predictors.

pub mod columns;
pub mod correlation;
pub mod missing;

use crate::table::TableError;
use polars::prelude::PolarsError;
use thiserror::Error;

pub use columns::{
    ExpectedType, FormatIssue, Stage, check_columns_formats, check_if_mandatory_columns_exist,
};
pub use correlation::correlation_matrix;
pub use missing::{NaReport, compute_na_percentage};

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
    #[error("Some columns are mandatory {stage}: {mandatory:?}. {missing:?} are missing")]
    MissingMandatoryColumns {
        stage: Stage,
        mandatory: Vec<String>,
        missing: Vec<String>,
    },
}
