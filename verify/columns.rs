use super::VerifyError;
use crate::table::{
    self, CALL_RATE, CHR, DENSITY, NB_PROBE_TECH, OVERLAP_CENTROMERE, OVERLAP_SEGDUP, SCORE,
    SCORE_SNP, SNP, START, STOP, TWO_ALGS, WF,
};
use polars::prelude::*;
use std::fmt;

/// Which point of the pipeline a table is checked at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Raw merged calls, before any derived feature exists.
    PreFeatureDerivation,
    /// Fully annotated table, ready for the classifier.
    PostFeatureDerivation,
}

impl Stage {
    pub fn mandatory_columns(self) -> &'static [&'static str] {
        match self {
            Self::PreFeatureDerivation => &[START, STOP, CHR, SNP, SCORE, WF, TWO_ALGS],
            Self::PostFeatureDerivation => &[
                SCORE_SNP,
                WF,
                TWO_ALGS,
                OVERLAP_CENTROMERE,
                OVERLAP_SEGDUP,
                DENSITY,
                CALL_RATE,
                NB_PROBE_TECH,
            ],
        }
    }

    pub fn integer_columns(self) -> &'static [&'static str] {
        match self {
            Self::PreFeatureDerivation => &[START, STOP, SNP],
            Self::PostFeatureDerivation => &[NB_PROBE_TECH],
        }
    }

    pub fn float_columns(self) -> &'static [&'static str] {
        &[SCORE, "LRR_mean", WF]
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreFeatureDerivation => f.write_str("before feature derivation"),
            Self::PostFeatureDerivation => f.write_str("after feature derivation"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedType {
    Integer,
    Float,
}

/// A column whose storage type does not match what the stage expects.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatIssue {
    pub column: String,
    pub expected: ExpectedType,
    /// `None` when the column is absent altogether.
    pub found: Option<String>,
}

/// Fails naming exactly the mandatory columns absent at `stage`.
pub fn check_if_mandatory_columns_exist(df: &DataFrame, stage: Stage) -> Result<(), VerifyError> {
    let mandatory = stage.mandatory_columns();
    let missing = table::missing_columns(df, mandatory);
    if !missing.is_empty() {
        return Err(VerifyError::MissingMandatoryColumns {
            stage,
            mandatory: mandatory.iter().map(|s| s.to_string()).collect(),
            missing,
        });
    }
    log::info!("All mandatory columns exist in the given dataframe");
    Ok(())
}

/// Advisory type check. Mismatches are logged and returned, never raised.
pub fn check_columns_formats(df: &DataFrame, stage: Stage) -> Vec<FormatIssue> {
    let mut issues = Vec::new();
    let expectations = stage
        .integer_columns()
        .iter()
        .map(|c| (*c, ExpectedType::Integer))
        .chain(
            stage
                .float_columns()
                .iter()
                .map(|c| (*c, ExpectedType::Float)),
        );

    for (name, expected) in expectations {
        let found = df.column(name).ok().map(|c| c.dtype().clone());
        let matches = match (&found, expected) {
            (Some(dtype), ExpectedType::Integer) => dtype.is_integer(),
            (Some(dtype), ExpectedType::Float) => dtype.is_float(),
            (None, _) => false,
        };
        if !matches {
            let issue = FormatIssue {
                column: name.to_string(),
                expected,
                found: found.map(|d| format!("{d:?}")),
            };
            match &issue.found {
                Some(dtype) => log::info!("{name} column must be {expected:?} (found {dtype})"),
                None => log::info!("{name} column must be {expected:?} but is absent"),
            }
            issues.push(issue);
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_cnvs() -> DataFrame {
        df!(
            "START" => [100i64, 500],
            "STOP" => [200i64, 900],
            "CHR" => ["1", "2"],
            "SNP" => [10i64, 12],
            "SCORE" => [12.5, 30.0],
            "WF" => [0.01, -0.02],
            "TwoAlgs" => [50.0, 80.0],
            "extra" => ["a", "b"]
        )
        .unwrap()
    }

    #[test]
    fn all_mandatory_columns_present_succeeds() {
        assert!(check_if_mandatory_columns_exist(&raw_cnvs(), Stage::PreFeatureDerivation).is_ok());
    }

    #[test]
    fn missing_columns_are_named_exactly() {
        let df = raw_cnvs().drop("SNP").unwrap().drop("WF").unwrap();
        match check_if_mandatory_columns_exist(&df, Stage::PreFeatureDerivation) {
            Err(VerifyError::MissingMandatoryColumns {
                missing, mandatory, ..
            }) => {
                assert_eq!(missing, vec!["SNP".to_string(), "WF".to_string()]);
                assert_eq!(mandatory.len(), 7);
            }
            other => panic!("Expected MissingMandatoryColumns, got {:?}", other),
        }
    }

    #[test]
    fn post_derivation_stage_requires_derived_columns() {
        match check_if_mandatory_columns_exist(&raw_cnvs(), Stage::PostFeatureDerivation) {
            Err(VerifyError::MissingMandatoryColumns { missing, .. }) => assert_eq!(
                missing,
                vec![
                    "Score_SNP",
                    "overlapCNV_Centromere",
                    "overlapCNV_SegDup",
                    "DENSITY",
                    "CallRate",
                    "Nb_Probe_tech"
                ]
            ),
            other => panic!("Expected MissingMandatoryColumns, got {:?}", other),
        }
    }

    #[test]
    fn format_check_reports_without_failing() {
        let df = df!(
            "START" => [100.5, 500.0],
            "STOP" => [200i64, 900],
            "SNP" => [10i64, 12],
            "SCORE" => [12i64, 30],
            "WF" => [0.01, -0.02]
        )
        .unwrap();
        let issues = check_columns_formats(&df, Stage::PreFeatureDerivation);
        let flagged: Vec<&str> = issues.iter().map(|i| i.column.as_str()).collect();
        assert_eq!(flagged, vec!["START", "SCORE", "LRR_mean"]);
        assert_eq!(issues[2].found, None);
        assert_eq!(issues[1].expected, ExpectedType::Float);
    }
}
