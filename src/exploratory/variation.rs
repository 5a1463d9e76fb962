use anyhow::Result;
use serde::Serialize;

use crate::data::AlignedData;
use crate::testing::utils::{extract_levels, get_group_indices, mean_std, observed_values};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariationRecord {
    pub group: String,
    pub feature: String,
    /// Non-missing observations.
    pub n: usize,
    pub mean: f64,
    pub std: f64,
    pub mean_log2: f64,
    /// `100 * std / mean`, in percent.
    pub cv: f64,
}

/// Coefficient of variation of each feature within each level of `group_column`.
///
/// Expects values on a linear scale (undo any log transform first). Records are
/// ordered by level, then feature; fewer than two observations give `NaN`.
pub fn coefficient_of_variation(aligned: &AlignedData, group_column: &str) -> Result<Vec<VariationRecord>> {
    aligned.check_sample_order()?;
    let labels = aligned.metadata.labels(group_column)?;
    let levels = extract_levels(&labels);
    let groups = get_group_indices(&labels, &levels);
    let table = &aligned.table;

    let mut records = Vec::with_capacity(levels.len() * table.n_features());
    for (level, rows) in levels.iter().zip(&groups) {
        for (j, feature) in table.features().iter().enumerate() {
            let values = observed_values(table.column(j), rows);
            let (mean, std) = mean_std(&values);
            records.push(VariationRecord {
                group: level.clone(),
                feature: feature.clone(),
                n: values.len(),
                mean,
                std,
                mean_log2: mean.log2(),
                cv: 100.0 * std / mean,
            });
        }
    }
    Ok(records)
}
