use crate::table::{self, TableError};
use ndarray::Array2;
use polars::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
    #[error(
        "Column '{column}' has {count} missing values. Remove incomplete CNVs before classification."
    )]
    MissingValues { column: String, count: usize },
    #[error("Test fraction must lie strictly between 0 and 1 (got {0})")]
    InvalidTestFraction(f64),
    #[error("Cannot split {rows} rows into non-empty training and testing sets")]
    TooFewRows { rows: usize },
}

/// Rows are the frame's rows, columns follow `dimensions` order.
pub fn feature_matrix(df: &DataFrame, dimensions: &[&str]) -> Result<Array2<f64>, DatasetError> {
    table::require_columns(df, dimensions)?;
    let mut matrix = Array2::<f64>::zeros((df.height(), dimensions.len()));
    for (j, name) in dimensions.iter().enumerate() {
        let values = table::f64_values(df, name)?;
        let count = values.iter().filter(|v| v.is_none()).count();
        if count > 0 {
            return Err(DatasetError::MissingValues {
                column: name.to_string(),
                count,
            });
        }
        for (i, v) in values.into_iter().flatten().enumerate() {
            matrix[[i, j]] = v;
        }
    }
    Ok(matrix)
}

pub fn labels(df: &DataFrame, column: &str) -> Result<Vec<i64>, DatasetError> {
    table::require_columns(df, &[column])?;
    let values = table::i64_values(df, column)?;
    let count = values.iter().filter(|v| v.is_none()).count();
    if count > 0 {
        return Err(DatasetError::MissingValues {
            column: column.to_string(),
            count,
        });
    }
    Ok(values.into_iter().flatten().collect())
}

/// Features and labels of the training and testing partitions.
#[derive(Debug, Clone)]
pub struct TrainTestSplit {
    pub x_train: DataFrame,
    pub x_test: DataFrame,
    pub y_train: Vec<i64>,
    pub y_test: Vec<i64>,
}

/// Separates `label_column` from the features (every other column) and
/// holds out a shuffled `test_fraction` of the rows, rounded up, for testing.
///
/// With `all_data` no rows are held out: both partitions are the whole table.
pub fn create_training_testing_datasets(
    df: &DataFrame,
    label_column: &str,
    test_fraction: f64,
    seed: u64,
    all_data: bool,
) -> Result<TrainTestSplit, DatasetError> {
    let y = labels(df, label_column)?;
    let x = df.drop(label_column)?;

    let split = if all_data {
        TrainTestSplit {
            x_train: x.clone(),
            x_test: x,
            y_train: y.clone(),
            y_test: y,
        }
    } else {
        if !(test_fraction > 0.0 && test_fraction < 1.0) {
            return Err(DatasetError::InvalidTestFraction(test_fraction));
        }
        let rows = df.height();
        let n_test = (rows as f64 * test_fraction).ceil() as usize;
        if n_test == 0 || n_test >= rows {
            return Err(DatasetError::TooFewRows { rows });
        }

        let mut order: Vec<usize> = (0..rows).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));
        let (test_rows, train_rows) = order.split_at(n_test);
        let take = |rows: &[usize]| -> Result<DataFrame, DatasetError> {
            let idx = rows.iter().map(|&r| r as IdxSize).collect::<Vec<_>>();
            Ok(x.take(&IdxCa::from_vec("rows".into(), idx))?)
        };
        TrainTestSplit {
            x_train: take(train_rows)?,
            x_test: take(test_rows)?,
            y_train: train_rows.iter().map(|&r| y[r]).collect(),
            y_test: test_rows.iter().map(|&r| y[r]).collect(),
        }
    };

    log::info!(
        "Training dataset: {:?}",
        (split.x_train.height(), split.x_train.width())
    );
    log::info!(
        "Testing dataset: {:?}",
        (split.x_test.height(), split.x_test.width())
    );
    Ok(split)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labelled() -> DataFrame {
        df!(
            "id" => (0i64..10).collect::<Vec<_>>(),
            "a" => (0..10).map(|i| i as f64 * 0.5).collect::<Vec<_>>(),
            "b" => (0i64..10).map(|i| i * 10).collect::<Vec<_>>(),
            "output" => [0i64, 1, 0, 1, 0, 1, 0, 1, 0, 1]
        )
        .unwrap()
    }

    #[test]
    fn matrix_follows_dimension_order() {
        let m = feature_matrix(&labelled(), &["b", "a"]).unwrap();
        assert_eq!(m.dim(), (10, 2));
        assert_eq!(m[[3, 0]], 30.0);
        assert_eq!(m[[3, 1]], 1.5);
    }

    #[test]
    fn missing_values_block_matrix_construction() {
        let df = df!("a" => [Some(1.0), None, Some(f64::NAN)]).unwrap();
        match feature_matrix(&df, &["a"]) {
            Err(DatasetError::MissingValues { column, count }) => {
                assert_eq!(column, "a");
                assert_eq!(count, 2);
            }
            other => panic!("Expected MissingValues, got {:?}", other),
        }
    }

    #[test]
    fn split_is_a_seeded_partition() {
        let df = labelled();
        let split = create_training_testing_datasets(&df, "output", 0.33, 42, false).unwrap();
        assert_eq!(split.x_test.height(), 4);
        assert_eq!(split.x_train.height(), 6);
        assert_eq!(split.x_train.width(), 3);
        assert!(!table::has_column(&split.x_train, "output"));

        let mut ids: Vec<i64> = labels(&split.x_train, "id")
            .unwrap()
            .into_iter()
            .chain(labels(&split.x_test, "id").unwrap())
            .collect();
        ids.sort();
        assert_eq!(ids, (0..10).collect::<Vec<_>>());

        // Labels stay attached to their rows: odd ids are labelled 1.
        let test_ids = labels(&split.x_test, "id").unwrap();
        for (id, label) in test_ids.iter().zip(&split.y_test) {
            assert_eq!(id % 2, *label);
        }

        let again = create_training_testing_datasets(&df, "output", 0.33, 42, false).unwrap();
        assert_eq!(labels(&again.x_test, "id").unwrap(), test_ids);
    }

    #[test]
    fn all_data_uses_every_row_for_both_partitions() {
        let split = create_training_testing_datasets(&labelled(), "output", 0.33, 42, true).unwrap();
        assert_eq!(split.x_train.height(), 10);
        assert_eq!(split.x_test.height(), 10);
        assert_eq!(split.y_train, split.y_test);
    }

    #[test]
    fn invalid_fraction_is_rejected() {
        assert!(matches!(
            create_training_testing_datasets(&labelled(), "output", 1.0, 42, false),
            Err(DatasetError::InvalidTestFraction(_))
        ));
    }
}
