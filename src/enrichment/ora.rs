//! Over-representation of regulated features in annotation sets.

use std::collections::BTreeSet;
use std::fmt;

use anyhow::Result;
use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::data::AnnotationTable;
use crate::differential::{ComparisonRecord, Corrected, RegulationResult};
use crate::error::AnalysisError;
use crate::testing::Alternative;
use crate::testing::correction::{CorrectionMethod, correct_pvalues};
use crate::testing::inference::discrete::{OverlapCounts, hypergeometric_test};

/// Site identifiers such as `PROTEIN~GENE_S123-p` → `PROTEIN~GENE`.
pub const DEFAULT_SITE_PATTERN: &str = r"(\w+~.+)_\w\d+\-\w+";

/// Which p-value of a comparison decides significance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PValueColumn {
    #[serde(rename = "pvalue")]
    Raw,
    #[default]
    #[serde(rename = "padj")]
    Adjusted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    /// Single foreground without a direction.
    Regulated,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Up => "upregulated",
            Direction::Down => "downregulated",
            Direction::Regulated => "regulated",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub pval_col: PValueColumn,
    pub alpha: f64,
    /// Regulated features need `|log2FC| > lfc_cutoff`.
    pub lfc_cutoff: f64,
    /// Annotations with fewer members in the universe are not tested.
    pub min_detected_in_set: usize,
    pub correction: CorrectionMethod,
    pub alternative: Alternative,
    /// Explicit universe; the compared features when absent.
    pub background: Option<Vec<String>>,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        EnrichmentConfig {
            pval_col: PValueColumn::Adjusted,
            alpha: 0.05,
            lfc_cutoff: 1.0,
            min_detected_in_set: 2,
            correction: CorrectionMethod::BenjaminiHochberg,
            alternative: Alternative::Greater,
            background: None,
        }
    }
}

impl EnrichmentConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(AnalysisError::InvalidConfig(format!(
                "alpha must be within (0, 1), got {}",
                self.alpha
            ))
            .into());
        }
        if !(self.lfc_cutoff >= 0.0) || !self.lfc_cutoff.is_finite() {
            return Err(AnalysisError::InvalidConfig(format!(
                "fold change cutoff must be a non-negative number, got {}",
                self.lfc_cutoff
            ))
            .into());
        }
        if self.min_detected_in_set == 0 {
            return Err(
                AnalysisError::InvalidConfig("min_detected_in_set must be at least 1".into()).into(),
            );
        }
        Ok(())
    }
}

/// One annotation tested against one foreground.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentRecord {
    pub annotation: String,
    pub direction: Direction,
    /// Regulated set members.
    pub foreground: usize,
    /// Set members in the universe outside the foreground.
    pub background: usize,
    /// Set members in the universe.
    pub set_size: usize,
    /// Size of the foreground.
    pub foreground_pop: usize,
    /// Size of the universe.
    pub background_pop: usize,
    /// Regulated set members, sorted.
    pub identifiers: Vec<String>,
    pub odds_ratio: f64,
    pub fold_enrichment: f64,
    pub pvalue: f64,
    pub padj: f64,
    pub rejected: Option<bool>,
}

/// Enrichment records of one group pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonEnrichment {
    pub group1: String,
    pub group2: String,
    /// Sorted by annotation, then direction.
    pub records: Vec<EnrichmentRecord>,
}

/// Features significant per `pval_col`/`alpha` with `log2FC > cutoff` (up) or
/// `log2FC < -cutoff` (down). A fold change equal to the cutoff is in neither set.
pub fn split_regulated<'a, I>(records: I, config: &EnrichmentConfig) -> (BTreeSet<String>, BTreeSet<String>)
where
    I: IntoIterator<Item = &'a Corrected<ComparisonRecord>>,
{
    let mut up = BTreeSet::new();
    let mut down = BTreeSet::new();
    for record in records {
        let p = match config.pval_col {
            PValueColumn::Raw => record.pvalue,
            PValueColumn::Adjusted => record.padj,
        };
        if !(p <= config.alpha) {
            continue;
        }
        let lfc = record.log2_fold_change;
        if lfc > config.lfc_cutoff {
            up.insert(record.feature.clone());
        } else if lfc < -config.lfc_cutoff {
            down.insert(record.feature.clone());
        }
    }
    (up, down)
}

fn test_foregrounds(
    foregrounds: &[(Direction, &BTreeSet<String>)],
    universe: &BTreeSet<String>,
    annotations: &AnnotationTable,
    config: &EnrichmentConfig,
) -> Result<Vec<EnrichmentRecord>> {
    let background_pop = universe.len();
    let mut records = Vec::new();

    for (annotation, members) in annotations.sets() {
        let in_universe: Vec<&String> = members.iter().filter(|m| universe.contains(*m)).collect();
        if in_universe.len() < config.min_detected_in_set {
            debug!(
                "Skipping '{}': {} of {} member(s) detected",
                annotation,
                in_universe.len(),
                members.len()
            );
            continue;
        }

        for &(direction, foreground) in foregrounds {
            let identifiers: Vec<String> = in_universe
                .iter()
                .filter(|m| foreground.contains(**m))
                .map(|m| (*m).clone())
                .collect();
            let counts = OverlapCounts::new(
                identifiers.len() as u64,
                foreground.len() as u64,
                in_universe.len() as u64,
                background_pop as u64,
            );
            let result = hypergeometric_test(counts, config.alternative);
            records.push(EnrichmentRecord {
                annotation: annotation.to_string(),
                direction,
                foreground: identifiers.len(),
                background: in_universe.len() - identifiers.len(),
                set_size: in_universe.len(),
                foreground_pop: foreground.len(),
                background_pop,
                identifiers,
                odds_ratio: result.effect_size.unwrap_or(f64::NAN),
                fold_enrichment: result.metadata.get("fold_enrichment").copied().unwrap_or(f64::NAN),
                pvalue: result.p_value,
                padj: f64::NAN,
                rejected: None,
            });
        }
    }

    let pvalues: Vec<f64> = records.iter().map(|r| r.pvalue).collect();
    let corrected = correct_pvalues(&pvalues, config.alpha, config.correction)?;
    for (record, (padj, rejected)) in records
        .iter_mut()
        .zip(corrected.padj.into_iter().zip(corrected.rejected))
    {
        record.padj = padj;
        record.rejected = rejected;
    }
    Ok(records)
}

fn restrict(foreground: &BTreeSet<String>, universe: &BTreeSet<String>) -> BTreeSet<String> {
    let kept: BTreeSet<String> = foreground.intersection(universe).cloned().collect();
    if kept.len() < foreground.len() {
        debug!(
            "{} regulated feature(s) are outside the universe",
            foreground.len() - kept.len()
        );
    }
    kept
}

/// Over-representation of a single foreground among `universe`.
///
/// Foreground features outside the universe are ignored. Records are sorted by
/// annotation and corrected together.
pub fn run_regulation_enrichment(
    foreground: &BTreeSet<String>,
    universe: &[String],
    annotations: &AnnotationTable,
    config: &EnrichmentConfig,
) -> Result<Vec<EnrichmentRecord>> {
    config.validate()?;
    let universe: BTreeSet<String> = match &config.background {
        Some(background) => background.iter().cloned().collect(),
        None => universe.iter().cloned().collect(),
    };
    if universe.is_empty() {
        return Err(AnalysisError::EmptyTable("enrichment universe is empty".into()).into());
    }
    let foreground = restrict(foreground, &universe);
    test_foregrounds(&[(Direction::Regulated, &foreground)], &universe, annotations, config)
}

/// Up/down over-representation for every group pair of a differential result.
///
/// Per pair, the universe is the set of compared features (or `config.background`)
/// and the correction spans all annotations × directions of that pair.
pub fn run_up_down_regulation_enrichment(
    result: &RegulationResult,
    annotations: &AnnotationTable,
    config: &EnrichmentConfig,
) -> Result<Vec<ComparisonEnrichment>> {
    config.validate()?;

    let mut enrichments = Vec::with_capacity(result.pairs.len());
    for (group1, group2) in &result.pairs {
        let records: Vec<&Corrected<ComparisonRecord>> = result.pair_records(group1, group2).collect();
        let universe: BTreeSet<String> = match &config.background {
            Some(background) => background.iter().cloned().collect(),
            None => records.iter().map(|r| r.feature.clone()).collect(),
        };
        if universe.is_empty() {
            return Err(AnalysisError::EmptyTable(format!(
                "no features to enrich for {} vs {}",
                group1, group2
            ))
            .into());
        }

        let (up, down) = split_regulated(records.iter().copied(), config);
        let up = restrict(&up, &universe);
        let down = restrict(&down, &universe);
        info!(
            "{} vs {}: {} up, {} down of {} feature(s)",
            group1,
            group2,
            up.len(),
            down.len(),
            universe.len()
        );

        let records = test_foregrounds(
            &[(Direction::Up, &up), (Direction::Down, &down)],
            &universe,
            annotations,
            config,
        )?;
        enrichments.push(ComparisonEnrichment {
            group1: group1.clone(),
            group2: group2.clone(),
            records,
        });
    }
    Ok(enrichments)
}

/// Collapse site-level identifiers to the identifier captured by the first group of
/// `pattern`. Identifiers that do not match are returned unchanged.
pub fn collapse_site_identifiers(identifiers: &[String], pattern: &str) -> Result<Vec<String>> {
    let regex = Regex::new(pattern)
        .map_err(|e| AnalysisError::InvalidConfig(format!("invalid site pattern: {}", e)))?;
    Ok(identifiers
        .iter()
        .map(|id| {
            regex
                .captures(id)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| id.clone())
        })
        .collect())
}

/// Enrichment of the parents of regulated sites, for every group pair.
///
/// Site identifiers are collapsed to their parent with `pattern`. A parent is in the
/// foreground once when any of its sites is regulated in either direction, and sites
/// of one parent count once towards the universe. Records carry
/// [`Direction::Regulated`].
pub fn run_site_regulation_enrichment(
    result: &RegulationResult,
    annotations: &AnnotationTable,
    config: &EnrichmentConfig,
    pattern: &str,
) -> Result<Vec<ComparisonEnrichment>> {
    config.validate()?;

    let mut enrichments = Vec::with_capacity(result.pairs.len());
    for (group1, group2) in &result.pairs {
        let records: Vec<&Corrected<ComparisonRecord>> = result.pair_records(group1, group2).collect();
        let sites: Vec<String> = records.iter().map(|r| r.feature.clone()).collect();
        let parents = collapse_site_identifiers(&sites, pattern)?;

        let universe: BTreeSet<String> = match &config.background {
            Some(background) => background.iter().cloned().collect(),
            None => parents.iter().cloned().collect(),
        };
        if universe.is_empty() {
            return Err(AnalysisError::EmptyTable(format!(
                "no features to enrich for {} vs {}",
                group1, group2
            ))
            .into());
        }

        let (up, down) = split_regulated(records.iter().copied(), config);
        let regulated: BTreeSet<String> = sites
            .iter()
            .zip(&parents)
            .filter(|(site, _)| up.contains(*site) || down.contains(*site))
            .map(|(_, parent)| parent.clone())
            .collect();
        let regulated = restrict(&regulated, &universe);
        info!(
            "{} vs {}: {} regulated site(s) on {} of {} parent(s)",
            group1,
            group2,
            up.len() + down.len(),
            regulated.len(),
            universe.len()
        );

        let records = test_foregrounds(&[(Direction::Regulated, &regulated)], &universe, annotations, config)?;
        enrichments.push(ComparisonEnrichment {
            group1: group1.clone(),
            group2: group2.clone(),
            records,
        });
    }
    Ok(enrichments)
}
