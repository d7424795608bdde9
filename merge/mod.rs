//! Merging of per-algorithm CNV call lists into one table of CNVs, each
//! carrying the `TwoAlgs` overlap between callers.
//!
//! The merge itself is delegated to an external tool behind the
//! [`CnvMerger`] trait; [`cnvision::CnVision`] drives the CNVision Perl
//! script.

pub mod cnvision;

pub use cnvision::CnVision;

use crate::table::{self, TableError};
use polars::prelude::DataFrame;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("IO error during CNV merge: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(
        "Given calling software: '{0}' isn't supported. Supported callers are PennCNV and QuantiSNP."
    )]
    UnsupportedAlgorithm(String),
    #[error("Both lists must have the same size: {files} files for {algorithms} calling softwares")]
    LengthMismatch { files: usize, algorithms: usize },
    #[error("Merging requires exactly one PennCNV and one QuantiSNP output")]
    UnsupportedCombination,
    #[error("Could not start '{}': {source}", .program.display())]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },
    #[error("CNVision {step} step failed (exit code {exit_code:?}): {stderr}")]
    ExternalTool {
        step: &'static str,
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("CNVision {step} step did not finish within {timeout:?} and was killed")]
    Timeout {
        step: &'static str,
        timeout: Duration,
    },
    #[error("CNVision finished but did not produce '{}'", .0.display())]
    MissingOutput(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallingSoftware {
    PennCnv,
    QuantiSnp,
}

impl FromStr for CallingSoftware {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "penncnv" => Ok(Self::PennCnv),
            "quantisnp" => Ok(Self::QuantiSnp),
            _ => Err(MergeError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

/// One caller's raw output, tagged with the caller that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedInput {
    pub software: CallingSoftware,
    pub path: PathBuf,
}

/// Pairs call files with the names of the software that produced them.
pub fn pair_inputs(files: &[PathBuf], softwares: &[&str]) -> Result<Vec<FormattedInput>, MergeError> {
    if files.len() != softwares.len() {
        return Err(MergeError::LengthMismatch {
            files: files.len(),
            algorithms: softwares.len(),
        });
    }
    files
        .iter()
        .zip(softwares)
        .map(|(path, name)| {
            Ok(FormattedInput {
                software: name.parse()?,
                path: path.clone(),
            })
        })
        .collect()
}

pub trait CnvMerger {
    /// Merges the inputs and writes the merged table inside `output_dir`,
    /// returning its path.
    fn merge(&self, inputs: &[FormattedInput], output_dir: &Path) -> Result<PathBuf, MergeError>;
}

/// Runs `merger` in a scratch directory and loads the merged calls.
pub fn merge_multiple_cnv_calling_outputs(
    merger: &dyn CnvMerger,
    files: &[PathBuf],
    softwares: &[&str],
) -> Result<DataFrame, MergeError> {
    let inputs = pair_inputs(files, softwares)?;
    let scratch = tempfile::tempdir()?;
    let merged = merger.merge(&inputs, scratch.path())?;
    let cnvs = table::read_tsv(&merged)?;
    log::info!("{} CNVs after merging {} call files", cnvs.height(), inputs.len());
    Ok(cnvs)
}
