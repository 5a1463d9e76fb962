//! Scaling of measurement tables and batch correction.
//!
//! - **median**: subtract the median of each lane
//! - **zscore**: centre on the mean and divide by the standard deviation
//! - **quantile**: give every lane the same distribution (complete data only)
//! - **linear**: min-max scaling to `[0, 1]`
//! - **median_polish**: Tukey's two-way median polish, returning the fitted values
//!
//! A lane is a sample (row) for [`Axis::Samples`] and a feature (column) for
//! [`Axis::Features`]. Missing values are skipped by every method except quantile
//! normalization and stay missing in the output.

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use log::{debug, info};
use ndarray::{Array2, ArrayViewMut1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::{AlignedData, MeasurementTable};
use crate::error::AnalysisError;
use crate::testing::utils::{extract_levels, get_group_indices, mean_std, median};

mod combat;

pub use combat::{CombatConfig, combat_batch_correction};

const MEDIAN_POLISH_MAX_ITER: usize = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMethod {
    Median,
    #[serde(rename = "zscore")]
    ZScore,
    Quantile,
    Linear,
    MedianPolish,
}

impl fmt::Display for NormalizationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NormalizationMethod::Median => "median",
            NormalizationMethod::ZScore => "zscore",
            NormalizationMethod::Quantile => "quantile",
            NormalizationMethod::Linear => "linear",
            NormalizationMethod::MedianPolish => "median_polish",
        })
    }
}

impl FromStr for NormalizationMethod {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "median" => Ok(NormalizationMethod::Median),
            "zscore" | "z-score" | "z_score" => Ok(NormalizationMethod::ZScore),
            "quantile" => Ok(NormalizationMethod::Quantile),
            "linear" | "minmax" | "min-max" => Ok(NormalizationMethod::Linear),
            "median_polish" | "median-polish" => Ok(NormalizationMethod::MedianPolish),
            other => Err(AnalysisError::InvalidConfig(format!(
                "unknown normalization method '{}'",
                other
            ))),
        }
    }
}

/// Direction in which lanes are normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    /// Each sample across its features.
    #[default]
    Samples,
    /// Each feature across the samples.
    Features,
}

impl Axis {
    fn lane_axis(self) -> ndarray::Axis {
        match self {
            Axis::Samples => ndarray::Axis(0),
            Axis::Features => ndarray::Axis(1),
        }
    }
}

fn observed(lane: &ArrayViewMut1<'_, f64>) -> Vec<f64> {
    lane.iter().copied().filter(|v| !v.is_nan()).collect()
}

fn median_lane(mut lane: ArrayViewMut1<'_, f64>) {
    let m = median(&observed(&lane));
    if !m.is_nan() {
        lane.mapv_inplace(|v| v - m);
    }
}

fn zscore_lane(mut lane: ArrayViewMut1<'_, f64>) {
    let (mean, sd) = mean_std(&observed(&lane));
    if sd > 0.0 {
        lane.mapv_inplace(|v| (v - mean) / sd);
    } else {
        lane.fill(f64::NAN);
    }
}

fn linear_lane(mut lane: ArrayViewMut1<'_, f64>) {
    let values = observed(&lane);
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if range > 0.0 {
        lane.mapv_inplace(|v| (v - min) / range);
    } else {
        lane.fill(f64::NAN);
    }
}

fn quantile_normalize(values: &mut Array2<f64>, axis: Axis) -> Result<()> {
    if values.iter().any(|v| v.is_nan()) {
        return Err(AnalysisError::InvalidInput(
            "quantile normalization needs complete data".into(),
        )
        .into());
    }
    let lane_axis = axis.lane_axis();
    let lane_len = values.len_of(ndarray::Axis(1 - lane_axis.index()));
    let n_lanes = values.len_of(lane_axis);
    if n_lanes == 0 {
        return Ok(());
    }

    let mut rank_mean = vec![0.0; lane_len];
    for lane in values.axis_iter(lane_axis) {
        let mut sorted = lane.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        for (k, v) in sorted.into_iter().enumerate() {
            rank_mean[k] += v / n_lanes as f64;
        }
    }

    // ties share the value of their lowest rank
    values.axis_iter_mut(lane_axis).into_par_iter().for_each(|mut lane| {
        let mut sorted = lane.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        lane.mapv_inplace(|v| rank_mean[sorted.partition_point(|&s| s < v)]);
    });
    Ok(())
}

/// Fitted values `data - residuals` of Tukey's median polish.
fn median_polish(values: &mut Array2<f64>) {
    let mut residuals = values.clone();
    for iteration in 0..MEDIAN_POLISH_MAX_ITER {
        for row in residuals.rows_mut() {
            median_lane(row);
        }
        for column in residuals.columns_mut() {
            median_lane(column);
        }

        let centred = |lane: ndarray::ArrayView1<'_, f64>| {
            let m = median(&lane.iter().copied().filter(|v| !v.is_nan()).collect::<Vec<_>>());
            m.is_nan() || m == 0.0
        };
        if residuals.rows().into_iter().all(centred) && residuals.columns().into_iter().all(centred) {
            debug!("Median polish converged after {} iteration(s)", iteration + 1);
            break;
        }
    }
    *values -= &residuals;
}

/// Normalize a table. Returns a new table with the same identifiers.
pub fn normalize_data(table: &MeasurementTable, method: NormalizationMethod, axis: Axis) -> Result<MeasurementTable> {
    if table.n_samples() == 0 || table.n_features() == 0 {
        return Err(AnalysisError::EmptyTable("nothing to normalize".into()).into());
    }
    let mut values = table.values().clone();
    let lane_axis = axis.lane_axis();
    match method {
        NormalizationMethod::Median => values
            .axis_iter_mut(lane_axis)
            .into_par_iter()
            .for_each(median_lane),
        NormalizationMethod::ZScore => values
            .axis_iter_mut(lane_axis)
            .into_par_iter()
            .for_each(zscore_lane),
        NormalizationMethod::Linear => values
            .axis_iter_mut(lane_axis)
            .into_par_iter()
            .for_each(linear_lane),
        NormalizationMethod::Quantile => quantile_normalize(&mut values, axis)?,
        NormalizationMethod::MedianPolish => median_polish(&mut values),
    }
    debug!(
        "Applied {} normalization over {:?} to a {}x{} table",
        method,
        axis,
        table.n_samples(),
        table.n_features()
    );
    table.with_values(values)
}

/// Normalize the samples of each level of `group_column` separately.
///
/// Samples without a level are dropped. Sample order is preserved.
pub fn normalize_data_per_group(
    aligned: &AlignedData,
    group_column: &str,
    method: NormalizationMethod,
    axis: Axis,
) -> Result<AlignedData> {
    let data = aligned.drop_missing_in(group_column)?;
    let labels = data.metadata.labels(group_column)?;
    let levels = extract_levels(&labels);
    info!(
        "Normalizing {} group(s) of '{}' with {}",
        levels.len(),
        group_column,
        method
    );

    let mut values = data.table.values().clone();
    for rows in get_group_indices(&labels, &levels) {
        let normalized = normalize_data(&data.table.select_samples(&rows), method, axis)?;
        for (k, &row) in rows.iter().enumerate() {
            values.row_mut(row).assign(&normalized.row(k));
        }
    }
    Ok(AlignedData {
        table: data.table.with_values(values)?,
        metadata: data.metadata,
    })
}
