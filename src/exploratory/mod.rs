//! Exploratory summaries of a measurement table.
//!
//! - **PCA** (`pca`): principal components with loadings and explained variance
//! - **UMAP** (`umap`): seeded non-linear 2-D (or n-D) embedding of the samples
//! - **Coefficient of variation** (`variation`): per group and feature

use anyhow::Result;
use log::warn;
use nalgebra::DMatrix;

use crate::data::MeasurementTable;
use crate::error::AnalysisError;

mod pca;
mod umap;
mod variation;

pub use pca::{PcaConfig, PcaResult, run_pca};
pub use umap::{DistanceMetric, UmapConfig, UmapResult, run_umap};
pub use variation::{VariationRecord, coefficient_of_variation};

/// Samples × features matrix without missing values.
///
/// With `drop_missing`, features holding any missing value are removed; otherwise a
/// missing value is an error. Returns the kept feature indices and the matrix.
pub(crate) fn complete_matrix(table: &MeasurementTable, drop_missing: bool) -> Result<(Vec<usize>, DMatrix<f64>)> {
    let complete: Vec<usize> = (0..table.n_features())
        .filter(|&j| table.column(j).iter().all(|v| !v.is_nan()))
        .collect();
    if complete.len() < table.n_features() {
        if !drop_missing {
            return Err(AnalysisError::InvalidInput(
                "table has missing values; enable drop_missing or impute first".into(),
            )
            .into());
        }
        warn!(
            "Dropping {} feature(s) with missing values",
            table.n_features() - complete.len()
        );
    }
    if complete.is_empty() || table.n_samples() == 0 {
        return Err(AnalysisError::EmptyTable("no complete features left".into()).into());
    }
    let values = table.values();
    let matrix = DMatrix::from_fn(table.n_samples(), complete.len(), |i, k| values[[i, complete[k]]]);
    Ok((complete, matrix))
}
