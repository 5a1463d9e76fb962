use anyhow::Result;
use log::info;
use nalgebra::{DMatrix, SVD};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::data::MeasurementTable;
use crate::error::AnalysisError;

use super::complete_matrix;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcaConfig {
    pub n_components: usize,
    /// Drop features with missing values instead of failing.
    pub drop_missing: bool,
}

impl Default for PcaConfig {
    fn default() -> Self {
        PcaConfig {
            n_components: 2,
            drop_missing: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PcaResult {
    pub samples: Vec<String>,
    /// Features that entered the decomposition.
    pub features: Vec<String>,
    /// Samples × components.
    pub scores: Array2<f64>,
    /// Features × components.
    pub loadings: Array2<f64>,
    pub explained_variance: Vec<f64>,
    /// Share of the total variance per component, non-increasing.
    pub explained_variance_ratio: Vec<f64>,
}

/// Principal component analysis of the mean-centred samples.
///
/// Component signs are fixed so that the sample with the largest absolute score has
/// a positive score.
pub fn run_pca(table: &MeasurementTable, config: &PcaConfig) -> Result<PcaResult> {
    let (kept, mut x) = complete_matrix(table, config.drop_missing)?;
    let (n, p) = x.shape();
    let max_components = n.min(p);
    if config.n_components == 0 || config.n_components > max_components {
        return Err(AnalysisError::InvalidConfig(format!(
            "n_components must be within 1..={} for a {}x{} table",
            max_components, n, p
        ))
        .into());
    }
    if n < 2 {
        return Err(AnalysisError::InvalidInput("PCA needs at least two samples".into()).into());
    }

    for mut column in x.column_iter_mut() {
        let mean = column.mean();
        column.add_scalar_mut(-mean);
    }

    let svd = SVD::new(x, true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(AnalysisError::Numerical("singular value decomposition failed".into()).into());
    };
    let singular = svd.singular_values;

    let mut order: Vec<usize> = (0..singular.len()).collect();
    order.sort_by(|&a, &b| singular[b].total_cmp(&singular[a]));

    let total: f64 = singular.iter().map(|s| s * s).sum();
    let k = config.n_components;
    let mut scores = Array2::zeros((n, k));
    let mut loadings = Array2::zeros((p, k));
    let mut explained_variance = Vec::with_capacity(k);
    let mut explained_variance_ratio = Vec::with_capacity(k);

    for (c, &idx) in order.iter().take(k).enumerate() {
        let s = singular[idx];
        let u_col = u.column(idx);
        let pivot = u_col
            .iter()
            .copied()
            .fold(0.0_f64, |best, value| if value.abs() > best.abs() { value } else { best });
        let sign = if pivot < 0.0 { -1.0 } else { 1.0 };

        for i in 0..n {
            scores[[i, c]] = sign * u_col[i] * s;
        }
        for j in 0..p {
            loadings[[j, c]] = sign * v_t[(idx, j)];
        }
        explained_variance.push(s * s / (n - 1) as f64);
        explained_variance_ratio.push(if total > 0.0 { s * s / total } else { 0.0 });
    }
    info!(
        "PCA on {} sample(s) x {} feature(s): ratios {:?}",
        n, p, explained_variance_ratio
    );

    Ok(PcaResult {
        samples: table.samples().to_vec(),
        features: kept.iter().map(|&j| table.features()[j].clone()).collect(),
        scores,
        loadings,
        explained_variance,
        explained_variance_ratio,
    })
}

/// Leading principal component scores, used to seed embeddings.
pub(crate) fn pca_scores(x: &DMatrix<f64>, k: usize) -> Option<DMatrix<f64>> {
    let mut centred = x.clone();
    for mut column in centred.column_iter_mut() {
        let mean = column.mean();
        column.add_scalar_mut(-mean);
    }
    let svd = SVD::new(centred, true, false);
    let u = svd.u?;
    let singular = svd.singular_values;
    let mut order: Vec<usize> = (0..singular.len()).collect();
    order.sort_by(|&a, &b| singular[b].total_cmp(&singular[a]));
    if order.len() < k {
        return None;
    }
    Some(DMatrix::from_fn(x.nrows(), k, |i, c| u[(i, order[c])] * singular[order[c]]))
}
