//! # Tabular I/O and Column Access
//!
//! Every table this crate touches (CNV calls, reference regions, call rates,
//! micro-array quality summaries) is a tab-separated file read into a polars
//! `DataFrame`. This module owns that boundary: reading and writing TSV files,
//! checking column presence, and extracting typed column values for the
//! numerical code.
//!
//! - Missing values are polars nulls. Floating-point `NaN` is reported as
//!   missing as well, since upstream tools write it for undefined values.
//! - Extraction never silently drops rows: the returned vectors are aligned
//!   with the frame's row order.

use polars::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SAMPLE_ID: &str = "SampleID";
pub const CHR: &str = "CHR";
pub const START: &str = "START";
pub const STOP: &str = "STOP";
pub const SNP: &str = "SNP";
pub const SCORE: &str = "SCORE";
pub const TWO_ALGS: &str = "TwoAlgs";
pub const WF: &str = "WF";
pub const SIZE: &str = "SIZE";
pub const DENSITY: &str = "DENSITY";
pub const SCORE_SNP: &str = "Score_SNP";
pub const CALL_RATE: &str = "CallRate";
pub const NB_PROBE_TECH: &str = "Nb_Probe_tech";
pub const OVERLAP_CENTROMERE: &str = "overlapCNV_Centromere";
pub const OVERLAP_SEGDUP: &str = "overlapCNV_SegDup";
pub const PREDICTION: &str = "DigCNVpred";
pub const PROBABILITY_C0: &str = "DigCNVproba_C0";
pub const PROBABILITY_C1: &str = "DigCNVproba_C1";

/// Errors raised while reading, writing or interrogating a table.
#[derive(Error, Debug)]
pub enum TableError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("File '{}' not found.", .0.display())]
    FileNotFound(PathBuf),
    #[error("Some columns are mandatory: {required:?}. Missing: {missing:?}")]
    MissingColumns {
        required: Vec<String>,
        missing: Vec<String>,
    },
    #[error(
        "The column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
}

/// Reads a tab-separated file with a header line.
///
/// The whole file is scanned for schema inference so that a chromosome column
/// holding `X` after thousands of numeric rows is still typed as text.
pub fn read_tsv(path: &Path) -> Result<DataFrame, TableError> {
    if !path.exists() {
        return Err(TableError::FileNotFound(path.to_path_buf()));
    }

    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(None)
                .with_parse_options(
                    CsvParseOptions::default()
                        .with_separator(b'\t')
                        .with_null_values(Some(NullValues::AllColumns(vec![
                            "NA".into(),
                            "NaN".into(),
                        ]))),
                ),
        )
        .finish()?;

    log::debug!(
        "Read {} rows and {} columns from '{}'",
        df.height(),
        df.width(),
        path.display()
    );
    Ok(df)
}

/// Writes a frame as a tab-separated file with a header line.
pub fn write_tsv(df: &mut DataFrame, path: &Path) -> Result<(), TableError> {
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(b'\t')
        .finish(df)?;
    Ok(())
}

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_names().iter().any(|c| c.as_str() == name)
}

/// Returns the subset of `required` absent from `df`, in `required` order.
pub fn missing_columns(df: &DataFrame, required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|name| !has_column(df, name))
        .map(|name| name.to_string())
        .collect()
}

pub fn require_columns(df: &DataFrame, required: &[&str]) -> Result<(), TableError> {
    let missing = missing_columns(df, required);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(TableError::MissingColumns {
            required: required.iter().map(|s| s.to_string()).collect(),
            missing,
        })
    }
}

/// Extracts a numeric column as `f64`, mapping nulls and `NaN` to `None`.
///
/// A value that was present but could not be cast (for example free text in a
/// numeric column) is reported as a type error rather than turned into a null.
pub fn f64_values(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>, TableError> {
    let column = df.column(name)?;
    let casted = column
        .cast(&DataType::Float64)
        .map_err(|_| wrong_type(name, "f64 (numeric)", column.dtype()))?;
    if casted.null_count() > column.null_count() {
        return Err(wrong_type(name, "f64 (numeric)", column.dtype()));
    }
    Ok(casted
        .f64()?
        .into_iter()
        .map(|v| v.filter(|x| !x.is_nan()))
        .collect())
}

/// Extracts an integer column as `i64`. Floating values are truncated.
pub fn i64_values(df: &DataFrame, name: &str) -> Result<Vec<Option<i64>>, TableError> {
    let column = df.column(name)?;
    let casted = column
        .cast(&DataType::Int64)
        .map_err(|_| wrong_type(name, "i64 (integer)", column.dtype()))?;
    if casted.null_count() > column.null_count() {
        return Err(wrong_type(name, "i64 (integer)", column.dtype()));
    }
    Ok(casted.i64()?.into_iter().collect())
}

/// Extracts any column rendered as text (sample identifiers, chromosomes).
pub fn string_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>, TableError> {
    let column = df.column(name)?;
    let casted = column.cast(&DataType::String)?;
    Ok(casted
        .str()?
        .into_iter()
        .map(|v| v.map(|s| s.to_string()))
        .collect())
}

/// Per-row missingness of a column: null, or `NaN` for float columns.
pub fn missing_mask(df: &DataFrame, name: &str) -> Result<Vec<bool>, TableError> {
    let column = df.column(name)?;
    match column.dtype() {
        DataType::Float32 | DataType::Float64 => {
            let casted = column.cast(&DataType::Float64)?;
            Ok(casted
                .f64()?
                .into_iter()
                .map(|v| v.is_none_or(|x| x.is_nan()))
                .collect())
        }
        _ => Ok(column
            .is_null()
            .into_iter()
            .map(|v| v.unwrap_or(true))
            .collect()),
    }
}

fn wrong_type(name: &str, expected_type: &'static str, found: &DataType) -> TableError {
    TableError::ColumnWrongType {
        column_name: name.to_string(),
        expected_type,
        found_type: format!("{found:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_tsv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", content).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn reads_tab_separated_file_with_missing_values() {
        let file = create_test_tsv("SampleID\tCHR\tSTART\tSCORE\nS1\t1\t100\t2.5\nS2\tX\t200\tNA");
        let df = read_tsv(file.path()).unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(
            string_values(&df, CHR).unwrap(),
            vec![Some("1".to_string()), Some("X".to_string())]
        );
        assert_eq!(i64_values(&df, START).unwrap(), vec![Some(100), Some(200)]);
        assert_eq!(f64_values(&df, SCORE).unwrap(), vec![Some(2.5), None]);
        assert_eq!(missing_mask(&df, SCORE).unwrap(), vec![false, true]);
    }

    #[test]
    fn absent_file_is_reported_as_not_found() {
        let err = read_tsv(Path::new("/nonexistent/digcnv/input.tsv")).unwrap_err();
        assert!(matches!(err, TableError::FileNotFound(_)));
    }

    #[test]
    fn text_in_numeric_column_is_a_type_error() {
        let file = create_test_tsv("SCORE\n1.5\nhigh");
        let df = read_tsv(file.path()).unwrap();
        match f64_values(&df, SCORE) {
            Err(TableError::ColumnWrongType { column_name, .. }) => {
                assert_eq!(column_name, "SCORE")
            }
            other => panic!("Expected ColumnWrongType, got {:?}", other),
        }
    }

    #[test]
    fn missing_columns_are_listed_in_required_order() {
        let df = df!("START" => [1i64], "CHR" => ["1"]).unwrap();
        assert_eq!(
            missing_columns(&df, &[STOP, START, SNP]),
            vec!["STOP".to_string(), "SNP".to_string()]
        );
        assert!(require_columns(&df, &[START, CHR]).is_ok());
    }

    #[test]
    fn write_then_read_preserves_values() {
        let mut df = df!("SampleID" => ["S1", "S2"], "SCORE" => [1.25, 3.5]).unwrap();
        let out = NamedTempFile::new().unwrap();
        write_tsv(&mut df, out.path()).unwrap();
        let back = read_tsv(out.path()).unwrap();
        assert_eq!(f64_values(&back, SCORE).unwrap(), vec![Some(1.25), Some(3.5)]);
    }
}
