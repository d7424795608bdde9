//! Classification metrics and the data behind the evaluation plots.
//!
//! Truth and predictions are expressed relative to the positive class (the
//! larger of the two training labels). Ratios whose denominator is zero are
//! `NaN` rather than an arbitrary 0 or 1.

use crate::table::{self, TableError};
use polars::prelude::*;
use std::path::Path;

/// Number of probability bins in [`ProbabilityHistogram`].
pub const HISTOGRAM_BINS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfusionCounts {
    pub true_positive: usize,
    pub true_negative: usize,
    pub false_positive: usize,
    pub false_negative: usize,
}

impl ConfusionCounts {
    pub fn from_predictions(truth: &[bool], predicted: &[bool]) -> Self {
        let mut counts = Self::default();
        for (&t, &p) in truth.iter().zip(predicted) {
            match (t, p) {
                (true, true) => counts.true_positive += 1,
                (false, false) => counts.true_negative += 1,
                (false, true) => counts.false_positive += 1,
                (true, false) => counts.false_negative += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.true_positive + self.true_negative + self.false_positive + self.false_negative
    }

    /// TP / (TP + FN)
    pub fn sensitivity(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_negative)
    }

    /// TN / (TN + FP)
    pub fn specificity(&self) -> f64 {
        ratio(self.true_negative, self.true_negative + self.false_positive)
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positive + self.true_negative, self.total())
    }

    pub fn f1(&self) -> f64 {
        ratio(
            2 * self.true_positive,
            2 * self.true_positive + self.false_positive + self.false_negative,
        )
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        f64::NAN
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Area under the ROC curve from the Mann-Whitney U statistic, with tied
/// scores given their average rank. `NaN` when only one class is present.
pub fn auc(truth: &[bool], scores: &[f64]) -> f64 {
    let n = truth.len().min(scores.len());
    let n_pos = truth[..n].iter().filter(|t| **t).count() as f64;
    let n_neg = n as f64 - n_pos;
    if n_pos == 0.0 || n_neg == 0.0 {
        return f64::NAN;
    }

    let mut idx: Vec<usize> = (0..n).collect();
    idx.sort_by(|&i, &j| scores[i].total_cmp(&scores[j]));

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && (scores[idx[j]] - scores[idx[i]]).abs() < 1e-10 {
            j += 1;
        }
        let avg_rank = (i + j - 1) as f64 / 2.0 + 1.0;
        for &k in &idx[i..j] {
            ranks[k] = avg_rank;
        }
        i = j;
    }

    let sum_ranks_pos: f64 = (0..n).filter(|&k| truth[k]).map(|k| ranks[k]).sum();
    (sum_ranks_pos - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RocPoint {
    pub threshold: f64,
    pub false_positive_rate: f64,
    pub true_positive_rate: f64,
}

/// ROC curve with one point per distinct score, highest threshold first,
/// preceded by the (0, 0) corner at an infinite threshold.
pub fn roc_curve(truth: &[bool], scores: &[f64]) -> Vec<RocPoint> {
    let n = truth.len().min(scores.len());
    let n_pos = truth[..n].iter().filter(|t| **t).count();
    let n_neg = n - n_pos;

    let mut idx: Vec<usize> = (0..n).collect();
    idx.sort_by(|&i, &j| scores[j].total_cmp(&scores[i]));

    let mut points = vec![RocPoint {
        threshold: f64::INFINITY,
        false_positive_rate: 0.0,
        true_positive_rate: 0.0,
    }];
    let (mut tp, mut fp) = (0usize, 0usize);
    for (pos, &i) in idx.iter().enumerate() {
        if truth[i] {
            tp += 1;
        } else {
            fp += 1;
        }
        let last_of_group = idx
            .get(pos + 1)
            .is_none_or(|&next| scores[next] != scores[i]);
        if last_of_group {
            points.push(RocPoint {
                threshold: scores[i],
                false_positive_rate: ratio(fp, n_neg),
                true_positive_rate: ratio(tp, n_pos),
            });
        }
    }
    points
}

/// Counts of class-1 probabilities per equal-width bin on [0, 1], split by
/// true class. A probability of exactly 1 falls in the last bin.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityHistogram {
    pub bin_edges: Vec<f64>,
    pub negative: Vec<usize>,
    pub positive: Vec<usize>,
}

pub fn probability_histogram(truth: &[bool], scores: &[f64], bins: usize) -> ProbabilityHistogram {
    let bins = bins.max(1);
    let mut negative = vec![0usize; bins];
    let mut positive = vec![0usize; bins];
    for (&t, &s) in truth.iter().zip(scores) {
        let bin = ((s.clamp(0.0, 1.0) * bins as f64) as usize).min(bins - 1);
        if t {
            positive[bin] += 1;
        } else {
            negative[bin] += 1;
        }
    }
    ProbabilityHistogram {
        bin_edges: (0..=bins).map(|b| b as f64 / bins as f64).collect(),
        negative,
        positive,
    }
}

/// Everything computed when a fitted model is scored against known labels.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationReport {
    pub confusion: ConfusionCounts,
    pub sensitivity: f64,
    pub specificity: f64,
    pub auc: f64,
    pub accuracy: f64,
    pub f1: f64,
    pub roc: Vec<RocPoint>,
    pub histogram: ProbabilityHistogram,
}

impl EvaluationReport {
    pub fn new(truth: &[bool], predicted: &[bool], scores: &[f64]) -> Self {
        let confusion = ConfusionCounts::from_predictions(truth, predicted);
        Self {
            confusion,
            sensitivity: confusion.sensitivity(),
            specificity: confusion.specificity(),
            auc: auc(truth, scores),
            accuracy: confusion.accuracy(),
            f1: confusion.f1(),
            roc: roc_curve(truth, scores),
            histogram: probability_histogram(truth, scores, HISTOGRAM_BINS),
        }
    }

    pub fn log_summary(&self) {
        log::info!("Sensitivity: {:.3}", self.sensitivity);
        log::info!("Specificity: {:.3}", self.specificity);
        log::info!("AUC: {:.3}", self.auc);
        log::info!("Accuracy: {:.3}", self.accuracy);
        log::info!("F1 score: {:.3}", self.f1);
        log::info!(
            "Confusion: TP={} TN={} FP={} FN={}",
            self.confusion.true_positive,
            self.confusion.true_negative,
            self.confusion.false_positive,
            self.confusion.false_negative
        );
    }

    /// Writes the ROC points as a TSV with columns threshold, FPR, TPR.
    pub fn write_roc_tsv(&self, path: &Path) -> Result<(), TableError> {
        let mut df = df!(
            "threshold" => self.roc.iter().map(|p| p.threshold).collect::<Vec<_>>(),
            "false_positive_rate" => self.roc.iter().map(|p| p.false_positive_rate).collect::<Vec<_>>(),
            "true_positive_rate" => self.roc.iter().map(|p| p.true_positive_rate).collect::<Vec<_>>()
        )?;
        table::write_tsv(&mut df, path)
    }

    /// Writes the histogram as a TSV with one row per bin.
    pub fn write_histogram_tsv(&self, path: &Path) -> Result<(), TableError> {
        let edges = &self.histogram.bin_edges;
        let mut df = df!(
            "bin_start" => edges[..edges.len() - 1].to_vec(),
            "bin_end" => edges[1..].to_vec(),
            "negative" => self.histogram.negative.iter().map(|c| *c as u64).collect::<Vec<_>>(),
            "positive" => self.histogram.positive.iter().map(|c| *c as u64).collect::<Vec<_>>()
        )?;
        table::write_tsv(&mut df, path)
    }
}
