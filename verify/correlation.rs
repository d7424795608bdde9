use super::VerifyError;
use crate::table;
use ndarray::Array2;
use polars::prelude::*;

/// Pearson correlation between every pair of `dimensions`, computed over the
/// rows complete in all of them. Entry `(i, j)` pairs `dimensions[i]` with
/// `dimensions[j]`. A constant column correlates as `NaN` with everything,
/// itself included.
pub fn correlation_matrix(df: &DataFrame, dimensions: &[&str]) -> Result<Array2<f64>, VerifyError> {
    table::require_columns(df, dimensions)?;

    let columns = dimensions
        .iter()
        .map(|name| table::f64_values(df, name))
        .collect::<Result<Vec<_>, _>>()?;

    let complete: Vec<usize> = (0..df.height())
        .filter(|&row| columns.iter().all(|c| c[row].is_some()))
        .collect();
    let values: Vec<Vec<f64>> = columns
        .iter()
        .map(|c| complete.iter().filter_map(|&row| c[row]).collect())
        .collect();

    let d = dimensions.len();
    let mut matrix = Array2::<f64>::zeros((d, d));
    for i in 0..d {
        for j in i..d {
            let r = pearson(&values[i], &values[j]);
            matrix[[i, j]] = r;
            matrix[[j, i]] = r;
        }
    }
    log::debug!(
        "Correlation between {} predictors over {} complete rows",
        d,
        complete.len()
    );
    Ok(matrix)
}

fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len() as f64;
    if x.len() < 2 {
        return f64::NAN;
    }
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        let (dx, dy) = (a - mean_x, b - mean_y);
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return f64::NAN;
    }
    cov / (var_x.sqrt() * var_y.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn perfectly_related_columns() {
        let df = df!(
            "x" => [1.0, 2.0, 3.0, 4.0],
            "up" => [2.0, 4.0, 6.0, 8.0],
            "down" => [4i64, 3, 2, 1]
        )
        .unwrap();
        let m = correlation_matrix(&df, &["x", "up", "down"]).unwrap();
        assert_eq!(m.dim(), (3, 3));
        assert_abs_diff_eq!(m[[0, 0]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(m[[0, 1]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(m[[2, 0]], -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(m[[1, 2]], m[[2, 1]], epsilon = 1e-15);
    }

    #[test]
    fn incomplete_rows_are_skipped() {
        let df = df!(
            "x" => [Some(1.0), Some(2.0), None, Some(3.0)],
            "y" => [Some(1.0), Some(2.0), Some(100.0), Some(3.0)]
        )
        .unwrap();
        let m = correlation_matrix(&df, &["x", "y"]).unwrap();
        assert_abs_diff_eq!(m[[0, 1]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn constant_column_has_undefined_correlation() {
        let df = df!("x" => [1.0, 2.0, 3.0], "flat" => [5.0, 5.0, 5.0]).unwrap();
        let m = correlation_matrix(&df, &["x", "flat"]).unwrap();
        assert!(m[[0, 1]].is_nan());
        assert!(m[[1, 1]].is_nan());
    }
}
