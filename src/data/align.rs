//! Joining a measurement table with its sample metadata, and the column/row
//! filters applied before any test is run.

use std::collections::HashMap;

use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::data::{MeasurementTable, SampleMetadata};
use crate::error::AnalysisError;

/// What to do with measured samples that have no metadata row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedPolicy {
    #[default]
    Error,
    Drop,
}

/// What to do with features that contain missing values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    /// Keep them; every test handles missing values per feature.
    #[default]
    Keep,
    /// Drop every feature with at least one missing value.
    DropFeatures,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignConfig {
    pub unmatched: UnmatchedPolicy,
    pub missing: MissingPolicy,
    /// Features and/or metadata columns removed before analysis.
    pub drop_columns: Vec<String>,
}

/// A measurement table and its metadata with identical sample order.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedData {
    pub table: MeasurementTable,
    pub metadata: SampleMetadata,
}

/// Exact join of `table` and `metadata` on sample identifier.
///
/// Sample order follows the measurement table. Metadata rows without measurements are
/// ignored; measured samples without metadata fail or are dropped per
/// [`UnmatchedPolicy`].
pub fn align(
    table: &MeasurementTable,
    metadata: &SampleMetadata,
    config: &AlignConfig,
) -> Result<AlignedData> {
    let meta_index: HashMap<&str, usize> = metadata
        .samples()
        .iter()
        .enumerate()
        .map(|(i, s)| (s.as_str(), i))
        .collect();

    let mut table_rows = Vec::with_capacity(table.n_samples());
    let mut meta_rows = Vec::with_capacity(table.n_samples());
    let mut unmatched = Vec::new();
    for (i, sample) in table.samples().iter().enumerate() {
        match meta_index.get(sample.as_str()) {
            Some(&m) => {
                table_rows.push(i);
                meta_rows.push(m);
            }
            None => unmatched.push(sample.clone()),
        }
    }

    if !unmatched.is_empty() {
        match config.unmatched {
            UnmatchedPolicy::Error => {
                return Err(AnalysisError::UnmatchedSamples {
                    count: unmatched.len(),
                    example: unmatched[0].clone(),
                }
                .into());
            }
            UnmatchedPolicy::Drop => {
                warn!(
                    "Dropping {} sample(s) without metadata (e.g. '{}')",
                    unmatched.len(),
                    unmatched[0]
                );
            }
        }
    }

    let mut aligned_table = table
        .select_samples(&table_rows)
        .drop_features(&config.drop_columns);
    let aligned_meta = metadata
        .select_samples(&meta_rows)
        .drop_columns(&config.drop_columns);

    if config.missing == MissingPolicy::DropFeatures {
        let keep: Vec<usize> = (0..aligned_table.n_features())
            .filter(|&j| aligned_table.column(j).iter().all(|v| !v.is_nan()))
            .collect();
        let dropped = aligned_table.n_features() - keep.len();
        if dropped > 0 {
            info!("Dropped {} feature(s) containing missing values", dropped);
        }
        aligned_table = aligned_table.select_features(&keep);
    }

    if aligned_table.n_samples() == 0 {
        return Err(AnalysisError::EmptyTable("no samples left after alignment".into()).into());
    }
    if aligned_table.n_features() == 0 {
        return Err(AnalysisError::EmptyTable("no features left after filtering".into()).into());
    }

    Ok(AlignedData {
        table: aligned_table,
        metadata: aligned_meta,
    })
}

impl AlignedData {
    /// Fail unless table rows and metadata rows carry the same sample ids in the same
    /// order. Every analysis over `AlignedData` calls this first, since the fields are
    /// public and rows are matched by position.
    pub fn check_sample_order(&self) -> Result<()> {
        let table = self.table.samples();
        let metadata = self.metadata.samples();
        if table.len() != metadata.len() {
            return Err(AnalysisError::InvalidInput(format!(
                "table has {} sample(s) but metadata has {}",
                table.len(),
                metadata.len()
            ))
            .into());
        }
        if let Some((t, m)) = table.iter().zip(metadata).find(|(t, m)| t != m) {
            return Err(AnalysisError::InvalidInput(format!(
                "sample '{}' in the table is paired with metadata row '{}'",
                t, m
            ))
            .into());
        }
        Ok(())
    }

    /// Remove samples whose value in `column` is missing.
    pub fn drop_missing_in(&self, column: &str) -> Result<AlignedData> {
        self.check_sample_order()?;
        let col = self.metadata.require(column)?;
        let keep: Vec<usize> = (0..col.len()).filter(|&i| !col.is_missing(i)).collect();
        let dropped = col.len() - keep.len();
        if dropped > 0 {
            warn!("Dropping {} sample(s) with missing '{}'", dropped, column);
        }
        if keep.is_empty() {
            return Err(AnalysisError::EmptyTable(format!(
                "every sample is missing '{}'",
                column
            ))
            .into());
        }
        Ok(AlignedData {
            table: self.table.select_samples(&keep),
            metadata: self.metadata.select_samples(&keep),
        })
    }

    /// Keep features with at least `min_fraction` valid (non-missing) values.
    ///
    /// With `per_group`, a feature survives when any level of that metadata column
    /// reaches the fraction on its own.
    pub fn filter_features_by_valid_values(
        &self,
        min_fraction: f64,
        per_group: Option<&str>,
    ) -> Result<AlignedData> {
        self.check_sample_order()?;
        if !(0.0..=1.0).contains(&min_fraction) {
            return Err(AnalysisError::InvalidConfig(format!(
                "valid value fraction must be within [0, 1], got {}",
                min_fraction
            ))
            .into());
        }

        let groups = self.group_rows(per_group)?;

        let keep: Vec<usize> = (0..self.table.n_features())
            .filter(|&j| {
                let column = self.table.column(j);
                groups.iter().any(|(_, idx)| {
                    if idx.is_empty() {
                        return false;
                    }
                    let valid = idx.iter().filter(|&&i| !column[i].is_nan()).count();
                    valid as f64 / idx.len() as f64 >= min_fraction
                })
            })
            .collect();

        info!(
            "Kept {} of {} feature(s) with >= {:.0}% valid values",
            keep.len(),
            self.table.n_features(),
            min_fraction * 100.0
        );
        if keep.is_empty() {
            return Err(AnalysisError::EmptyTable("no features pass the valid value filter".into()).into());
        }

        Ok(AlignedData {
            table: self.table.select_features(&keep),
            metadata: self.metadata.clone(),
        })
    }
}
