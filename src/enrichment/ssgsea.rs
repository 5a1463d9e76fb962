//! Single-sample enrichment scores (ssGSEA).
//!
//! Features of each sample are ranked by value, highest first. For every annotation
//! the weighted cumulative distribution of its members is contrasted with the
//! cumulative distribution of the remaining features, and the enrichment score is the
//! sum of the difference over the whole ranking.

use anyhow::Result;
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::{AnnotationTable, MeasurementTable};
use crate::error::AnalysisError;
use crate::testing::utils::average_ranks;

use super::utils::{FeatureSets, compute_chunk_size, rank_data};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SsgseaConfig {
    /// Exponent applied to the ascending rank of each member.
    pub weight: f64,
    /// Smallest set tested, counted among the sample's measured features.
    pub min_size: usize,
    pub max_size: usize,
}

impl Default for SsgseaConfig {
    fn default() -> Self {
        SsgseaConfig {
            weight: 0.25,
            min_size: 15,
            max_size: 500,
        }
    }
}

impl SsgseaConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.weight.is_finite() || self.weight < 0.0 {
            return Err(AnalysisError::InvalidConfig(format!(
                "rank weight must be a non-negative number, got {}",
                self.weight
            ))
            .into());
        }
        if self.min_size == 0 || self.max_size < self.min_size {
            return Err(AnalysisError::InvalidConfig(format!(
                "set size bounds must satisfy 1 <= min_size <= max_size, got {}..{}",
                self.min_size, self.max_size
            ))
            .into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SsgseaRecord {
    pub sample: String,
    pub annotation: String,
    /// Members measured in the sample.
    pub n_hits: usize,
    pub es: f64,
    /// `es` divided by the range of all scores of the run.
    pub nes: f64,
}

/// Enrichment score of one set over a ranking.
///
/// `ranked_weights` holds the weight of every measured feature in descending value
/// order and `is_hit` marks the set members at the same positions.
fn running_sum(ranked_weights: &[f64], is_hit: &[bool]) -> f64 {
    let n_hits = is_hit.iter().filter(|&&h| h).count();
    let n_miss = ranked_weights.len() - n_hits;
    if n_hits == 0 || n_miss == 0 {
        return 0.0;
    }

    let hit_norm: f64 = ranked_weights
        .iter()
        .zip(is_hit)
        .filter(|(_, h)| **h)
        .map(|(w, _)| w)
        .sum();
    let miss_step = 1.0 / n_miss as f64;

    let mut p_hit = 0.0;
    let mut p_miss = 0.0;
    let mut es = 0.0;
    for (w, &hit) in ranked_weights.iter().zip(is_hit) {
        if hit {
            p_hit += if hit_norm > 0.0 { w / hit_norm } else { 1.0 / n_hits as f64 };
        } else {
            p_miss += miss_step;
        }
        es += p_hit - p_miss;
    }
    es
}

fn score_sample(
    sample: &str,
    values: &[f64],
    sets: &FeatureSets,
    config: &SsgseaConfig,
) -> Vec<SsgseaRecord> {
    let measured: Vec<usize> = (0..values.len()).filter(|&i| !values[i].is_nan()).collect();
    if measured.is_empty() {
        debug!("Sample '{}' has no measured features", sample);
        return Vec::new();
    }
    let measured_values: Vec<f64> = measured.iter().map(|&i| values[i]).collect();

    // position 0 holds the highest value
    let positions = rank_data(&measured_values);
    let (ascending_ranks, _) = average_ranks(&measured_values);
    let mut order = vec![0usize; measured.len()];
    let mut ranked_weights = vec![0.0; measured.len()];
    for (k, &position) in positions.iter().enumerate() {
        order[position - 1] = measured[k];
        ranked_weights[position - 1] = ascending_ranks[k].powf(config.weight);
    }

    let mut position_of = vec![usize::MAX; values.len()];
    for (position, &feature) in order.iter().enumerate() {
        position_of[feature] = position;
    }

    let mut records = Vec::new();
    let mut is_hit = vec![false; order.len()];
    for j in 0..sets.len() {
        let hits: Vec<usize> = sets
            .getset(j)
            .iter()
            .map(|&f| position_of[f])
            .filter(|&p| p != usize::MAX)
            .collect();
        if hits.len() < config.min_size || hits.len() > config.max_size {
            continue;
        }

        is_hit.iter_mut().for_each(|h| *h = false);
        for &p in &hits {
            is_hit[p] = true;
        }
        records.push(SsgseaRecord {
            sample: sample.to_string(),
            annotation: sets.names[j].clone(),
            n_hits: hits.len(),
            es: running_sum(&ranked_weights, &is_hit),
            nes: 0.0,
        });
    }
    records
}

/// Per-sample enrichment scores for every annotation within the configured size
/// bounds.
///
/// Missing values drop the feature from that sample's ranking only. Records are
/// ordered by sample (table order) and then by annotation.
pub fn run_ssgsea(
    table: &MeasurementTable,
    annotations: &AnnotationTable,
    config: &SsgseaConfig,
) -> Result<Vec<SsgseaRecord>> {
    config.validate()?;
    if table.n_samples() == 0 || table.n_features() == 0 {
        return Err(AnalysisError::EmptyTable("ssGSEA needs at least one sample and one feature".into()).into());
    }

    let sets = FeatureSets::new(annotations, table.features());
    let chunk_size = compute_chunk_size(table.n_samples(), table.n_features());
    info!(
        "ssGSEA: {} sample(s), {} feature(s), {} annotation(s), weight {}",
        table.n_samples(),
        table.n_features(),
        sets.len(),
        config.weight
    );

    let per_sample: Vec<Vec<SsgseaRecord>> = (0..table.n_samples())
        .into_par_iter()
        .with_min_len(chunk_size)
        .map(|s| {
            let values: Vec<f64> = table.row(s).to_vec();
            score_sample(&table.samples()[s], &values, &sets, config)
        })
        .collect();
    let mut records: Vec<SsgseaRecord> = per_sample.into_iter().flatten().collect();

    let (min, max) = records
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), r| {
            (lo.min(r.es), hi.max(r.es))
        });
    let range = max - min;
    for record in &mut records {
        record.nes = if range > 0.0 { record.es / range } else { 0.0 };
    }
    debug!("ssGSEA produced {} score(s)", records.len());
    Ok(records)
}
