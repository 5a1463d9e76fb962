//! Missing-value counts per feature, overall or per group, and the feature
//! selections built on them.

use anyhow::Result;
use serde::Serialize;

use crate::data::AlignedData;
use crate::error::AnalysisError;

/// Missing-value count of one feature within one group (`None` = all samples).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingRecord {
    pub group: Option<String>,
    pub feature: String,
    /// Samples in the group.
    pub n: usize,
    pub n_missing: usize,
    /// `100 * n_missing / n`.
    pub percentage_missing: f64,
}

impl AlignedData {
    /// Row indices per level of `per_group` (sorted levels, unlabelled samples left
    /// out), or one entry holding every row.
    pub(crate) fn group_rows(&self, per_group: Option<&str>) -> Result<Vec<(Option<String>, Vec<usize>)>> {
        let Some(column) = per_group else {
            return Ok(vec![(None, (0..self.table.n_samples()).collect())]);
        };
        let labels = self.metadata.labels(column)?;
        let mut levels: Vec<&String> = labels.iter().flatten().collect();
        levels.sort();
        levels.dedup();
        Ok(levels
            .into_iter()
            .map(|level| {
                let rows = labels
                    .iter()
                    .enumerate()
                    .filter_map(|(i, l)| (l.as_ref() == Some(level)).then_some(i))
                    .collect();
                (Some(level.clone()), rows)
            })
            .collect())
    }

    /// Missing values of every feature, per level of `per_group` or over all
    /// samples. Records are ordered by group, then feature.
    pub fn missing_summary(&self, per_group: Option<&str>) -> Result<Vec<MissingRecord>> {
        self.check_sample_order()?;
        let groups = self.group_rows(per_group)?;
        let table = &self.table;

        let mut records = Vec::with_capacity(groups.len() * table.n_features());
        for (group, rows) in &groups {
            for (j, feature) in table.features().iter().enumerate() {
                let column = table.column(j);
                let n_missing = rows.iter().filter(|&&i| column[i].is_nan()).count();
                records.push(MissingRecord {
                    group: group.clone(),
                    feature: feature.clone(),
                    n: rows.len(),
                    n_missing,
                    percentage_missing: 100.0 * n_missing as f64 / rows.len() as f64,
                });
            }
        }
        Ok(records)
    }

    /// Features, in table order, where at least one group passes `keep(n, n_valid)`.
    fn features_where<F>(&self, per_group: Option<&str>, keep: F) -> Result<Vec<String>>
    where
        F: Fn(usize, usize) -> bool,
    {
        self.check_sample_order()?;
        let groups = self.group_rows(per_group)?;
        let table = &self.table;
        Ok((0..table.n_features())
            .filter(|&j| {
                let column = table.column(j);
                groups.iter().any(|(_, rows)| {
                    let valid = rows.iter().filter(|&&i| !column[i].is_nan()).count();
                    !rows.is_empty() && keep(rows.len(), valid)
                })
            })
            .map(|j| table.features()[j].clone())
            .collect())
    }

    /// Features with at least `min_valid` observed values, overall or in at least one
    /// level of `per_group`.
    pub fn extract_number_missing(&self, min_valid: usize, per_group: Option<&str>) -> Result<Vec<String>> {
        self.features_where(per_group, |_, valid| valid >= min_valid)
    }

    /// Features whose fraction of missing values is at most `missing_max`, overall or
    /// in at least one level of `per_group`.
    pub fn extract_percentage_missing(&self, missing_max: f64, per_group: Option<&str>) -> Result<Vec<String>> {
        if !(0.0..=1.0).contains(&missing_max) {
            return Err(AnalysisError::InvalidConfig(format!(
                "missing fraction must be within [0, 1], got {}",
                missing_max
            ))
            .into());
        }
        self.features_where(per_group, |n, valid| (n - valid) as f64 / n as f64 <= missing_max)
    }
}
