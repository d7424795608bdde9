//! Validated hyperparameters for the three learners of the ensemble.
//!
//! Each parameter set is an immutable value object. The only ways to obtain
//! one are its `Default` (the tuned DigCNV values), its builder, or
//! `from_map`; all three go through the same validation so a half-specified
//! learner can never reach training.

use ahash::AHashMap;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParamsError {
    #[error("Some parameters are mandatory for {learner}: {mandatory:?}. Missing: {missing:?}")]
    IncompleteHyperparameters {
        learner: &'static str,
        mandatory: Vec<String>,
        missing: Vec<String>,
    },
    #[error("Invalid value {value} for {learner} parameter '{key}': {reason}")]
    InvalidValue {
        learner: &'static str,
        key: String,
        value: f64,
        reason: &'static str,
    },
    #[error("Failed to read hyperparameter file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML hyperparameter file: {0}")]
    TomlParse(#[from] toml::de::Error),
}

const RANDOM_FOREST: &str = "RandomForestClassifier";
const GRADIENT_BOOSTING: &str = "GradientBoostingClassifier";
const ADABOOST: &str = "AdaBoostClassifier";

const RANDOM_FOREST_KEYS: [&str; 6] = [
    "n_estimators",
    "max_depth",
    "min_samples_split",
    "min_samples_leaf",
    "max_leaf_nodes",
    "min_weight_fraction_leaf",
];
const GRADIENT_BOOSTING_KEYS: [&str; 5] = [
    "n_estimators",
    "max_depth",
    "min_samples_split",
    "min_samples_leaf",
    "learning_rate",
];
const ADABOOST_KEYS: [&str; 2] = ["n_estimators", "learning_rate"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RandomForestParams {
    n_estimators: usize,
    max_depth: usize,
    min_samples_split: usize,
    min_samples_leaf: usize,
    max_leaf_nodes: usize,
    min_weight_fraction_leaf: f64,
}

impl RandomForestParams {
    pub fn builder() -> RandomForestParamsBuilder {
        RandomForestParamsBuilder::default()
    }

    pub fn from_map(map: &AHashMap<String, f64>) -> Result<Self, ParamsError> {
        warn_unknown_keys(RANDOM_FOREST, map, &RANDOM_FOREST_KEYS);
        RandomForestParamsBuilder {
            n_estimators: count(RANDOM_FOREST, map, "n_estimators")?,
            max_depth: count(RANDOM_FOREST, map, "max_depth")?,
            min_samples_split: count(RANDOM_FOREST, map, "min_samples_split")?,
            min_samples_leaf: count(RANDOM_FOREST, map, "min_samples_leaf")?,
            max_leaf_nodes: count(RANDOM_FOREST, map, "max_leaf_nodes")?,
            min_weight_fraction_leaf: map.get("min_weight_fraction_leaf").copied(),
        }
        .build()
    }

    pub fn n_estimators(&self) -> usize {
        self.n_estimators
    }
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }
    pub fn min_samples_split(&self) -> usize {
        self.min_samples_split
    }
    pub fn min_samples_leaf(&self) -> usize {
        self.min_samples_leaf
    }
    pub fn max_leaf_nodes(&self) -> usize {
        self.max_leaf_nodes
    }
    pub fn min_weight_fraction_leaf(&self) -> f64 {
        self.min_weight_fraction_leaf
    }
}

impl Default for RandomForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 142,
            max_depth: 24,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_leaf_nodes: 151,
            min_weight_fraction_leaf: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientBoostingParams {
    n_estimators: usize,
    max_depth: usize,
    min_samples_split: usize,
    min_samples_leaf: usize,
    learning_rate: f64,
}

impl GradientBoostingParams {
    pub fn builder() -> GradientBoostingParamsBuilder {
        GradientBoostingParamsBuilder::default()
    }

    pub fn from_map(map: &AHashMap<String, f64>) -> Result<Self, ParamsError> {
        warn_unknown_keys(GRADIENT_BOOSTING, map, &GRADIENT_BOOSTING_KEYS);
        GradientBoostingParamsBuilder {
            n_estimators: count(GRADIENT_BOOSTING, map, "n_estimators")?,
            max_depth: count(GRADIENT_BOOSTING, map, "max_depth")?,
            min_samples_split: count(GRADIENT_BOOSTING, map, "min_samples_split")?,
            min_samples_leaf: count(GRADIENT_BOOSTING, map, "min_samples_leaf")?,
            learning_rate: map.get("learning_rate").copied(),
        }
        .build()
    }

    pub fn n_estimators(&self) -> usize {
        self.n_estimators
    }
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }
    pub fn min_samples_split(&self) -> usize {
        self.min_samples_split
    }
    pub fn min_samples_leaf(&self) -> usize {
        self.min_samples_leaf
    }
    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }
}

impl Default for GradientBoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 209,
            max_depth: 12,
            min_samples_split: 12,
            min_samples_leaf: 31,
            learning_rate: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaBoostParams {
    n_estimators: usize,
    learning_rate: f64,
}

impl AdaBoostParams {
    pub fn builder() -> AdaBoostParamsBuilder {
        AdaBoostParamsBuilder::default()
    }

    pub fn from_map(map: &AHashMap<String, f64>) -> Result<Self, ParamsError> {
        warn_unknown_keys(ADABOOST, map, &ADABOOST_KEYS);
        AdaBoostParamsBuilder {
            n_estimators: count(ADABOOST, map, "n_estimators")?,
            learning_rate: map.get("learning_rate").copied(),
        }
        .build()
    }

    pub fn n_estimators(&self) -> usize {
        self.n_estimators
    }
    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }
}

impl Default for AdaBoostParams {
    fn default() -> Self {
        Self {
            n_estimators: 117,
            learning_rate: 0.1,
        }
    }
}

/// Builder for [`RandomForestParams`]. Every field must be set before `build`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RandomForestParamsBuilder {
    n_estimators: Option<usize>,
    max_depth: Option<usize>,
    min_samples_split: Option<usize>,
    min_samples_leaf: Option<usize>,
    max_leaf_nodes: Option<usize>,
    min_weight_fraction_leaf: Option<f64>,
}

impl RandomForestParamsBuilder {
    pub fn n_estimators(mut self, value: usize) -> Self {
        self.n_estimators = Some(value);
        self
    }
    pub fn max_depth(mut self, value: usize) -> Self {
        self.max_depth = Some(value);
        self
    }
    pub fn min_samples_split(mut self, value: usize) -> Self {
        self.min_samples_split = Some(value);
        self
    }
    pub fn min_samples_leaf(mut self, value: usize) -> Self {
        self.min_samples_leaf = Some(value);
        self
    }
    pub fn max_leaf_nodes(mut self, value: usize) -> Self {
        self.max_leaf_nodes = Some(value);
        self
    }
    pub fn min_weight_fraction_leaf(mut self, value: f64) -> Self {
        self.min_weight_fraction_leaf = Some(value);
        self
    }

    pub fn build(self) -> Result<RandomForestParams, ParamsError> {
        let present = [
            self.n_estimators.is_some(),
            self.max_depth.is_some(),
            self.min_samples_split.is_some(),
            self.min_samples_leaf.is_some(),
            self.max_leaf_nodes.is_some(),
            self.min_weight_fraction_leaf.is_some(),
        ];
        let (
            Some(n_estimators),
            Some(max_depth),
            Some(min_samples_split),
            Some(min_samples_leaf),
            Some(max_leaf_nodes),
            Some(min_weight_fraction_leaf),
        ) = (
            self.n_estimators,
            self.max_depth,
            self.min_samples_split,
            self.min_samples_leaf,
            self.max_leaf_nodes,
            self.min_weight_fraction_leaf,
        )
        else {
            return Err(incomplete(RANDOM_FOREST, &RANDOM_FOREST_KEYS, &present));
        };

        at_least(RANDOM_FOREST, "n_estimators", n_estimators, 1)?;
        at_least(RANDOM_FOREST, "max_depth", max_depth, 1)?;
        at_least(RANDOM_FOREST, "min_samples_split", min_samples_split, 2)?;
        at_least(RANDOM_FOREST, "min_samples_leaf", min_samples_leaf, 1)?;
        at_least(RANDOM_FOREST, "max_leaf_nodes", max_leaf_nodes, 2)?;
        if !(0.0..=0.5).contains(&min_weight_fraction_leaf) {
            return Err(ParamsError::InvalidValue {
                learner: RANDOM_FOREST,
                key: "min_weight_fraction_leaf".to_string(),
                value: min_weight_fraction_leaf,
                reason: "must lie in [0, 0.5]",
            });
        }

        Ok(RandomForestParams {
            n_estimators,
            max_depth,
            min_samples_split,
            min_samples_leaf,
            max_leaf_nodes,
            min_weight_fraction_leaf,
        })
    }
}

/// Builder for [`GradientBoostingParams`]. Every field must be set before `build`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GradientBoostingParamsBuilder {
    n_estimators: Option<usize>,
    max_depth: Option<usize>,
    min_samples_split: Option<usize>,
    min_samples_leaf: Option<usize>,
    learning_rate: Option<f64>,
}

impl GradientBoostingParamsBuilder {
    pub fn n_estimators(mut self, value: usize) -> Self {
        self.n_estimators = Some(value);
        self
    }
    pub fn max_depth(mut self, value: usize) -> Self {
        self.max_depth = Some(value);
        self
    }
    pub fn min_samples_split(mut self, value: usize) -> Self {
        self.min_samples_split = Some(value);
        self
    }
    pub fn min_samples_leaf(mut self, value: usize) -> Self {
        self.min_samples_leaf = Some(value);
        self
    }
    pub fn learning_rate(mut self, value: f64) -> Self {
        self.learning_rate = Some(value);
        self
    }

    pub fn build(self) -> Result<GradientBoostingParams, ParamsError> {
        let present = [
            self.n_estimators.is_some(),
            self.max_depth.is_some(),
            self.min_samples_split.is_some(),
            self.min_samples_leaf.is_some(),
            self.learning_rate.is_some(),
        ];
        let (
            Some(n_estimators),
            Some(max_depth),
            Some(min_samples_split),
            Some(min_samples_leaf),
            Some(learning_rate),
        ) = (
            self.n_estimators,
            self.max_depth,
            self.min_samples_split,
            self.min_samples_leaf,
            self.learning_rate,
        )
        else {
            return Err(incomplete(GRADIENT_BOOSTING, &GRADIENT_BOOSTING_KEYS, &present));
        };

        at_least(GRADIENT_BOOSTING, "n_estimators", n_estimators, 1)?;
        at_least(GRADIENT_BOOSTING, "max_depth", max_depth, 1)?;
        at_least(GRADIENT_BOOSTING, "min_samples_split", min_samples_split, 2)?;
        at_least(GRADIENT_BOOSTING, "min_samples_leaf", min_samples_leaf, 1)?;
        positive_rate(GRADIENT_BOOSTING, learning_rate)?;

        Ok(GradientBoostingParams {
            n_estimators,
            max_depth,
            min_samples_split,
            min_samples_leaf,
            learning_rate,
        })
    }
}

/// Builder for [`AdaBoostParams`]. Every field must be set before `build`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdaBoostParamsBuilder {
    n_estimators: Option<usize>,
    learning_rate: Option<f64>,
}

impl AdaBoostParamsBuilder {
    pub fn n_estimators(mut self, value: usize) -> Self {
        self.n_estimators = Some(value);
        self
    }
    pub fn learning_rate(mut self, value: f64) -> Self {
        self.learning_rate = Some(value);
        self
    }

    pub fn build(self) -> Result<AdaBoostParams, ParamsError> {
        let present = [self.n_estimators.is_some(), self.learning_rate.is_some()];
        let (Some(n_estimators), Some(learning_rate)) = (self.n_estimators, self.learning_rate)
        else {
            return Err(incomplete(ADABOOST, &ADABOOST_KEYS, &present));
        };

        at_least(ADABOOST, "n_estimators", n_estimators, 1)?;
        positive_rate(ADABOOST, learning_rate)?;

        Ok(AdaBoostParams {
            n_estimators,
            learning_rate,
        })
    }
}

/// Hyperparameters of all three learners, as trained together.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnsembleParams {
    pub random_forest: RandomForestParams,
    pub gradient_boosting: GradientBoostingParams,
    pub adaboost: AdaBoostParams,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct EnsembleParamsFile {
    random_forest: Option<RandomForestParamsBuilder>,
    gradient_boosting: Option<GradientBoostingParamsBuilder>,
    adaboost: Option<AdaBoostParamsBuilder>,
}

impl EnsembleParams {
    /// Parses a TOML document with optional `[random_forest]`,
    /// `[gradient_boosting]` and `[adaboost]` tables. An absent table keeps
    /// the defaults; a present one must be complete.
    pub fn from_toml_str(content: &str) -> Result<Self, ParamsError> {
        let file: EnsembleParamsFile = toml::from_str(content)?;
        let defaults = Self::default();
        Ok(Self {
            random_forest: match file.random_forest {
                Some(builder) => builder.build()?,
                None => defaults.random_forest,
            },
            gradient_boosting: match file.gradient_boosting {
                Some(builder) => builder.build()?,
                None => defaults.gradient_boosting,
            },
            adaboost: match file.adaboost {
                Some(builder) => builder.build()?,
                None => defaults.adaboost,
            },
        })
    }

    pub fn load(path: &Path) -> Result<Self, ParamsError> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }
}

fn incomplete(learner: &'static str, keys: &[&str], present: &[bool]) -> ParamsError {
    ParamsError::IncompleteHyperparameters {
        learner,
        mandatory: keys.iter().map(|k| k.to_string()).collect(),
        missing: keys
            .iter()
            .zip(present)
            .filter(|(_, p)| !**p)
            .map(|(k, _)| k.to_string())
            .collect(),
    }
}

/// Extra keys are ignored; only the listed ones are read.
fn warn_unknown_keys(
    learner: &'static str,
    map: &AHashMap<String, f64>,
    keys: &[&str],
) -> Vec<String> {
    let mut unknown: Vec<String> = map
        .keys()
        .filter(|k| !keys.contains(&k.as_str()))
        .cloned()
        .collect();
    unknown.sort();
    for key in &unknown {
        log::warn!("Ignoring unknown {learner} parameter '{key}'");
    }
    unknown
}

fn count(
    learner: &'static str,
    map: &AHashMap<String, f64>,
    key: &str,
) -> Result<Option<usize>, ParamsError> {
    match map.get(key) {
        None => Ok(None),
        Some(&value) if value >= 0.0 && value.fract() == 0.0 && value.is_finite() => {
            Ok(Some(value as usize))
        }
        Some(&value) => Err(ParamsError::InvalidValue {
            learner,
            key: key.to_string(),
            value,
            reason: "must be a non-negative integer",
        }),
    }
}

fn at_least(
    learner: &'static str,
    key: &str,
    value: usize,
    minimum: usize,
) -> Result<(), ParamsError> {
    if value < minimum {
        return Err(ParamsError::InvalidValue {
            learner,
            key: key.to_string(),
            value: value as f64,
            reason: match minimum {
                1 => "must be at least 1",
                _ => "must be at least 2",
            },
        });
    }
    Ok(())
}

fn positive_rate(learner: &'static str, value: f64) -> Result<(), ParamsError> {
    if !(value.is_finite() && value > 0.0) {
        return Err(ParamsError::InvalidValue {
            learner,
            key: "learning_rate".to_string(),
            value,
            reason: "must be a positive finite number",
        });
    }
    Ok(())
}
