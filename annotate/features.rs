//! # Feature Derivation
//!
//! Independent, composable steps that enrich a CNV table with the predictors
//! consumed by the classifier. Each step takes the table by value and returns
//! the augmented table; there is no state shared between calls.
//!
//! Joins against per-sample side tables (call rates, micro-array quality) are
//! left joins keyed on the textual rendering of the sample identifier. A side
//! table with a repeated identifier is rejected before anything is joined.

use crate::table::{
    self, CALL_RATE, DENSITY, NB_PROBE_TECH, SAMPLE_ID, SCORE, SCORE_SNP, SIZE, SNP, START, STOP,
    TWO_ALGS, TableError,
};
use ahash::AHashMap;
use flate2::read::MultiGzDecoder;
use itertools::Itertools;
use polars::prelude::*;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Positional column names of the micro-array quality file.
pub const QUALITY_COLUMNS: [&str; 10] = [
    "SampleID",
    "LRR_mean",
    "LRR_median",
    "LRR_SD",
    "BAF_mean",
    "BAF_median",
    "BAF_SD",
    "BAF_DRIFT",
    "WF",
    "GCWF",
];

#[derive(Error, Debug)]
pub enum FeatureError {
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(
        "The '{column}' column of '{}' must contain only unique individuals. Duplicated: {keys:?}",
        .path.display()
    )]
    DuplicateKey {
        path: PathBuf,
        column: String,
        keys: Vec<String>,
    },
    #[error(
        "TwoAlgs must be either a rate in [0, 1] or a percentage in [0, 100], but its maximum is {max}"
    )]
    TwoAlgsFormat { max: f64 },
    #[error("TwoAlgs value '{value}' is not an integer followed by a unit marker")]
    TwoAlgsUnparseable { value: String },
    #[error(
        "The micro-array quality file '{}' must contain {expected} columns, found {found}",
        .path.display()
    )]
    QualityColumnCount {
        path: PathBuf,
        expected: usize,
        found: usize,
    },
    #[error("The PFB file '{}' lists no probes below its header", .0.display())]
    EmptyPfbFile(PathBuf),
}

/// Where the number of probes of the genotyping technology comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeCount {
    /// A known probe count for the array.
    Fixed(i64),
    /// A population frequency of B-allele file: one probe per line plus a header.
    PfbFile(PathBuf),
    /// Nothing was provided; the table is left untouched.
    Unspecified,
}

/// Adds `SIZE`, `DENSITY` and `Score_SNP`.
pub fn add_derived_features(df: DataFrame) -> Result<DataFrame, FeatureError> {
    table::require_columns(&df, &[START, STOP, SNP, SCORE])?;

    let df = df
        .lazy()
        .with_columns([
            (col(STOP).cast(DataType::Int64) - col(START).cast(DataType::Int64) + lit(1i64))
                .alias(SIZE),
        ])
        .with_columns([
            (col(SNP).cast(DataType::Float64) / col(SIZE).cast(DataType::Float64)).alias(DENSITY),
            (col(SCORE).cast(DataType::Float64) / col(SNP).cast(DataType::Float64))
                .alias(SCORE_SNP),
        ])
        .collect()?;

    log::info!("Derived features (SIZE, DENSITY and Score_SNP columns) created");
    Ok(df)
}

/// Left-joins a per-sample call rate onto the CNV table.
///
/// `callrate_colname` is renamed to `CallRate`. The join key column is dropped
/// from the result unless it is the canonical `SampleID`.
pub fn add_call_rate_to_dataset(
    df: DataFrame,
    call_rate_path: &Path,
    callrate_colname: &str,
    individual_colname: &str,
) -> Result<DataFrame, FeatureError> {
    let mut callrates = table::read_tsv(call_rate_path)?;
    table::require_columns(&callrates, &[individual_colname, callrate_colname])?;
    if callrate_colname != CALL_RATE {
        callrates.rename(callrate_colname, CALL_RATE.into())?;
    }
    reject_duplicate_keys(&callrates, individual_colname, call_rate_path)?;
    table::require_columns(&df, &[individual_colname])?;

    let mut df = df;
    if table::has_column(&df, CALL_RATE) {
        log::info!("Clean existing CallRate column");
        df = df.drop(CALL_RATE)?;
    }

    let mut df = left_join_numeric(
        df,
        individual_colname,
        &callrates,
        individual_colname,
        &[CALL_RATE],
    )?;

    if individual_colname != SAMPLE_ID {
        df = df.drop(individual_colname)?;
    }
    log::info!("CallRate added to dataset");
    Ok(df)
}

/// Sets the `Nb_Probe_tech` column from a fixed count or a PFB file.
pub fn add_nb_probe_by_tech(df: DataFrame, source: &ProbeCount) -> Result<DataFrame, FeatureError> {
    let count = match source {
        ProbeCount::Fixed(count) => {
            log::info!("Number of probes in technology added from the given number ({count})");
            *count
        }
        ProbeCount::PfbFile(path) => {
            let lines = count_lines(path)?;
            if lines <= 1 {
                return Err(FeatureError::EmptyPfbFile(path.clone()));
            }
            let count = lines as i64 - 1;
            log::info!(
                "Number of probes in technology ({count}) added after counting lines in '{}'",
                path.display()
            );
            count
        }
        ProbeCount::Unspecified => {
            log::info!(
                "You have to give at least one of these two parameters (number of probes or PFB file path)"
            );
            return Ok(df);
        }
    };

    let mut df = df;
    let values = vec![count; df.height()];
    df.with_column(Series::new(NB_PROBE_TECH.into(), values))?;
    Ok(df)
}

/// Normalizes the two-algorithm confidence column to a percentage.
///
/// Text values such as `85%` lose their trailing marker and are parsed as
/// integers. The column maximum then decides the convention: at most 1.0 is a
/// rate and is rescaled to a percentage, up to 100.0 is kept, anything larger
/// is rejected as ambiguous.
pub fn transform_two_algs_feature(df: DataFrame) -> Result<DataFrame, FeatureError> {
    table::require_columns(&df, &[TWO_ALGS])?;

    let column = df.column(TWO_ALGS)?;
    let mut values: Vec<Option<f64>> = if column.dtype() == &DataType::String {
        column
            .str()?
            .into_iter()
            .map(|v| v.map(strip_unit_marker).transpose())
            .collect::<Result<_, _>>()?
    } else {
        table::f64_values(&df, TWO_ALGS)?
    };

    let Some(max) = values.iter().flatten().copied().reduce(f64::max) else {
        log::warn!("TwoAlgs column holds no values; left untouched");
        return Ok(df);
    };

    if max <= 1.0 {
        values.iter_mut().flatten().for_each(|v| *v *= 100.0);
        log::info!("Transform TwoAlgs feature into percentage format");
    } else if max <= 100.0 {
        log::info!("Keep TwoAlgs feature in percentage format");
    } else {
        log::error!("Error in TwoAlgs format: must be a percentage or a rate (max = {max})");
        return Err(FeatureError::TwoAlgsFormat { max });
    }

    let mut df = df;
    df.with_column(Series::new(TWO_ALGS.into(), values))?;
    Ok(df)
}

/// Left-joins the nine micro-array quality columns by `SampleID`.
///
/// The quality file's columns are assigned positionally, whatever its header says.
pub fn add_micro_array_quality_data(df: DataFrame, path: &Path) -> Result<DataFrame, FeatureError> {
    let mut quality = table::read_tsv(path)?;
    log::info!("Micro-array quality data opened");
    if quality.width() != QUALITY_COLUMNS.len() {
        return Err(FeatureError::QualityColumnCount {
            path: path.to_path_buf(),
            expected: QUALITY_COLUMNS.len(),
            found: quality.width(),
        });
    }
    quality.set_column_names(QUALITY_COLUMNS)?;
    reject_duplicate_keys(&quality, SAMPLE_ID, path)?;
    table::require_columns(&df, &[SAMPLE_ID])?;

    log::info!("Add {:?} columns", &QUALITY_COLUMNS[1..]);
    let df = left_join_numeric(df, SAMPLE_ID, &quality, SAMPLE_ID, &QUALITY_COLUMNS[1..])?;
    log::info!("Micro-array quality data merged to CNV data");
    Ok(df)
}

fn strip_unit_marker(raw: &str) -> Result<f64, FeatureError> {
    let trimmed = raw.trim();
    let mut chars = trimmed.chars();
    chars.next_back();
    chars
        .as_str()
        .trim()
        .parse::<i64>()
        .map(|v| v as f64)
        .map_err(|_| FeatureError::TwoAlgsUnparseable {
            value: raw.to_string(),
        })
}

fn reject_duplicate_keys(source: &DataFrame, key: &str, path: &Path) -> Result<(), FeatureError> {
    let ids = table::string_values(source, key)?;
    let keys: Vec<String> = ids.iter().flatten().duplicates().cloned().collect();
    if keys.is_empty() {
        Ok(())
    } else {
        Err(FeatureError::DuplicateKey {
            path: path.to_path_buf(),
            column: key.to_string(),
            keys,
        })
    }
}

/// Appends `columns` of `source` to `df`, matching `df[key]` against
/// `source[source_key]`. Rows without a match receive nulls; a column already
/// present in `df` is replaced.
fn left_join_numeric(
    mut df: DataFrame,
    key: &str,
    source: &DataFrame,
    source_key: &str,
    columns: &[&str],
) -> Result<DataFrame, FeatureError> {
    let source_rows: AHashMap<String, usize> = table::string_values(source, source_key)?
        .into_iter()
        .enumerate()
        .filter_map(|(row, id)| id.map(|id| (id, row)))
        .collect();
    let matches: Vec<Option<usize>> = table::string_values(&df, key)?
        .into_iter()
        .map(|id| id.and_then(|id| source_rows.get(&id).copied()))
        .collect();

    let unmatched = matches.iter().filter(|m| m.is_none()).count();
    if unmatched > 0 {
        log::warn!("{unmatched} CNV rows have no match on '{source_key}' in the joined table");
    }

    for &name in columns {
        let values = table::f64_values(source, name)?;
        let joined: Vec<Option<f64>> = matches
            .iter()
            .map(|m| m.and_then(|row| values[row]))
            .collect();
        if table::has_column(&df, name) {
            log::info!("Replace existing {name} column");
        }
        df.with_column(Series::new(name.into(), joined))?;
    }
    Ok(df)
}

/// Counts lines the way a line iterator would: a final line without a
/// trailing newline still counts. Gzip input is decompressed on the fly.
fn count_lines(path: &Path) -> Result<usize, FeatureError> {
    if !path.exists() {
        return Err(TableError::FileNotFound(path.to_path_buf()).into());
    }
    let file = File::open(path)?;
    let mut reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(MultiGzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let mut buffer = vec![0u8; 64 * 1024];
    let mut lines = 0usize;
    let mut last_byte = None;
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        lines += memchr::memchr_iter(b'\n', &buffer[..read]).count();
        last_byte = Some(buffer[read - 1]);
    }
    if last_byte.is_some_and(|b| b != b'\n') {
        lines += 1;
    }
    Ok(lines)
}
