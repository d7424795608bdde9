//! # Genomic Overlap Annotation
//!
//! Computes, for each CNV, the fraction of its length covered by reference
//! regions (centromeres, segmental duplications) on the same chromosome.
//!
//! For a CNV `[s, e]` and a region `[rs, re]` the fraction is
//! `max(0, min(e, re) - max(s, rs) + 1) / (e - s + 1)`.
//!
//! - Centromeres: one region per chromosome is expected; the best-covering
//!   region is kept when a table lists several.
//! - Segmental duplications: fractions are summed over every duplication on
//!   the chromosome. Duplications are not merged first, so a CNV spanning
//!   overlapping duplications can score above 1.0.
//!
//! CNV rows are partitioned by chromosome and each partition is annotated on
//! the rayon pool. Results are scattered back to the original row positions.

use crate::table::{self, CHR, OVERLAP_CENTROMERE, OVERLAP_SEGDUP, START, STOP, TableError};
use ahash::AHashMap;
use itertools::Itertools;
use polars::prelude::*;
use rayon::prelude::*;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OverlapError {
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
}

/// A closed genomic interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: i64,
    pub stop: i64,
}

/// How the per-region fractions of one CNV are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// Largest single-region fraction.
    Max,
    /// Sum of every region's fraction.
    Sum,
}

/// Immutable reference regions keyed by normalized chromosome.
#[derive(Debug, Clone, Default)]
pub struct ReferenceRegions {
    by_chromosome: AHashMap<String, Vec<Region>>,
}

impl ReferenceRegions {
    /// Loads a tab-separated region file carrying `CHR`, `START` and `STOP`.
    /// Additional columns are ignored.
    pub fn load(path: &Path) -> Result<Self, OverlapError> {
        let df = table::read_tsv(path)?;
        let regions = Self::from_frame(&df)?;
        log::info!(
            "Loaded {} reference regions on {} chromosomes from '{}'",
            regions.len(),
            regions.by_chromosome.len(),
            path.display()
        );
        Ok(regions)
    }

    pub fn from_frame(df: &DataFrame) -> Result<Self, OverlapError> {
        table::require_columns(df, &[CHR, START, STOP])?;
        let chromosomes = table::string_values(df, CHR)?;
        let starts = table::i64_values(df, START)?;
        let stops = table::i64_values(df, STOP)?;

        let mut by_chromosome: AHashMap<String, Vec<Region>> = AHashMap::new();
        let mut skipped = 0usize;
        for ((chromosome, start), stop) in chromosomes.into_iter().zip(starts).zip(stops) {
            match (chromosome, start, stop) {
                (Some(chromosome), Some(start), Some(stop)) => by_chromosome
                    .entry(normalize_chromosome(&chromosome))
                    .or_default()
                    .push(Region { start, stop }),
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            log::warn!("{skipped} reference regions with missing coordinates were ignored");
        }
        Ok(Self { by_chromosome })
    }

    pub fn on_chromosome(&self, chromosome: &str) -> &[Region] {
        self.by_chromosome
            .get(chromosome)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.by_chromosome.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Chromosome labels compare equal with or without a `chr` prefix.
pub fn normalize_chromosome(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.get(..3) {
        Some(prefix) if prefix.eq_ignore_ascii_case("chr") => trimmed[3..].to_string(),
        _ => trimmed.to_string(),
    }
}

/// Fraction of `[start, stop]` covered by `[region_start, region_stop]`.
#[inline]
pub fn overlap_fraction(start: i64, stop: i64, region_start: i64, region_stop: i64) -> f64 {
    let covered = stop.min(region_stop) - start.max(region_start) + 1;
    let fraction = covered as f64 / (stop - start + 1) as f64;
    if fraction > 0.0 { fraction } else { 0.0 }
}

/// Per-row overlap of each CNV with its chromosome's centromere.
pub fn centromere_overlap(
    cnvs: &DataFrame,
    centromeres: &ReferenceRegions,
) -> Result<Vec<Option<f64>>, OverlapError> {
    annotate_overlaps(cnvs, centromeres, Aggregation::Max)
}

/// Per-row summed overlap of each CNV with segmental duplications.
pub fn segdup_overlap(
    cnvs: &DataFrame,
    segdups: &ReferenceRegions,
) -> Result<Vec<Option<f64>>, OverlapError> {
    annotate_overlaps(cnvs, segdups, Aggregation::Sum)
}

/// Adds `overlapCNV_Centromere` and `overlapCNV_SegDup`.
pub fn add_chromosomic_annotation(
    df: DataFrame,
    centromere_path: &Path,
    segdup_path: &Path,
) -> Result<DataFrame, OverlapError> {
    let mut df = df;

    let centromeres = ReferenceRegions::load(centromere_path)?;
    let overlaps = centromere_overlap(&df, &centromeres)?;
    df.with_column(Series::new(OVERLAP_CENTROMERE.into(), overlaps))?;
    log::info!("Centromere overlap added to CNVs");

    let segdups = ReferenceRegions::load(segdup_path)?;
    log::info!("Segmental duplication file opened");
    let overlaps = segdup_overlap(&df, &segdups)?;
    df.with_column(Series::new(OVERLAP_SEGDUP.into(), overlaps))?;
    log::info!("Segmental duplication overlap computed and CNVs annotated");

    Ok(df)
}

/// Overlap of every CNV row against `regions`, aligned with the input rows.
/// Rows with a missing chromosome or coordinate yield `None`.
pub fn annotate_overlaps(
    cnvs: &DataFrame,
    regions: &ReferenceRegions,
    aggregation: Aggregation,
) -> Result<Vec<Option<f64>>, OverlapError> {
    table::require_columns(cnvs, &[CHR, START, STOP])?;
    let chromosomes = table::string_values(cnvs, CHR)?;
    let starts = table::i64_values(cnvs, START)?;
    let stops = table::i64_values(cnvs, STOP)?;

    let mut partitions: AHashMap<String, Vec<(usize, i64, i64)>> = AHashMap::new();
    for (row, ((chromosome, start), stop)) in
        chromosomes.iter().zip(&starts).zip(&stops).enumerate()
    {
        if let (Some(chromosome), Some(start), Some(stop)) = (chromosome, start, stop) {
            partitions
                .entry(normalize_chromosome(chromosome))
                .or_default()
                .push((row, *start, *stop));
        }
    }

    let partitions: Vec<(String, Vec<(usize, i64, i64)>)> = partitions
        .into_iter()
        .sorted_by(|a, b| natord::compare(&a.0, &b.0))
        .collect();

    let annotated: Vec<Vec<(usize, f64)>> = partitions
        .par_iter()
        .map(|(chromosome, rows)| {
            let references = regions.on_chromosome(chromosome);
            log::debug!(
                "Chromosome {chromosome}: {} CNVs against {} regions",
                rows.len(),
                references.len()
            );
            rows.iter()
                .map(|&(row, start, stop)| {
                    let fractions = references
                        .iter()
                        .map(|r| overlap_fraction(start, stop, r.start, r.stop));
                    let value = match aggregation {
                        Aggregation::Max => fractions.fold(0.0, f64::max),
                        Aggregation::Sum => fractions.sum::<f64>(),
                    };
                    (row, value)
                })
                .collect()
        })
        .collect();

    let mut overlaps = vec![None; cnvs.height()];
    for (row, value) in annotated.into_iter().flatten() {
        overlaps[row] = Some(value);
    }
    Ok(overlaps)
}
