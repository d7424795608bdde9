use super::VerifyError;
use crate::table;
use polars::prelude::*;

/// Outcome of the missing-value pass.
#[derive(Debug, Clone)]
pub struct NaReport {
    /// Fraction of non-missing values per scanned column, in scan order.
    /// Each fraction is taken over the rows still present when the column was scanned.
    pub completeness: Vec<(String, f64)>,
    /// Input rows kept, in input order.
    pub cleaned: DataFrame,
    /// Rows dropped for missing data, in the order they were detected.
    pub removed: DataFrame,
}

/// Reports per-column completeness over `dimensions` and, when `remove_na`
/// is set, moves every row with a missing value in any scanned column from
/// the cleaned table to the removed table.
///
/// The two outputs partition the input: no row is in both and together they
/// hold every input row. Without `remove_na` the cleaned table is the input
/// and the removed table is empty.
pub fn compute_na_percentage(
    df: &DataFrame,
    dimensions: &[&str],
    remove_na: bool,
) -> Result<NaReport, VerifyError> {
    table::require_columns(df, dimensions)?;
    log::info!("Check if no data is missing:");

    let mut removed_flags = vec![false; df.height()];
    let mut removed_order: Vec<IdxSize> = Vec::new();
    let mut completeness = Vec::with_capacity(dimensions.len());

    for &name in dimensions {
        let mask = table::missing_mask(df, name)?;
        let remaining = removed_flags.iter().filter(|r| !**r).count();
        let newly_missing: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter(|(row, missing)| **missing && !removed_flags[*row])
            .map(|(row, _)| row)
            .collect();

        let fraction = if remaining == 0 {
            1.0
        } else {
            (remaining - newly_missing.len()) as f64 / remaining as f64
        };
        if newly_missing.is_empty() {
            log::info!("{name}: 100%");
        } else {
            log::info!("{name}: {:.1}%", fraction * 100.0);
        }
        completeness.push((name.to_string(), fraction));

        if remove_na && !newly_missing.is_empty() {
            log::info!("{} CNV removed due to Null Data", newly_missing.len());
            for row in newly_missing {
                removed_flags[row] = true;
                removed_order.push(row as IdxSize);
            }
        }
    }

    let keep: Vec<bool> = removed_flags.iter().map(|r| !r).collect();
    let cleaned = df.filter(&BooleanChunked::from_slice("keep".into(), &keep))?;
    let removed = df.take(&IdxCa::from_vec("removed".into(), removed_order))?;

    Ok(NaReport {
        completeness,
        cleaned,
        removed,
    })
}
