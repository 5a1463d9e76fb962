//! Empirical Bayes batch correction (ComBat).
//!
//! Per feature, a linear model with one indicator per batch plus the protected
//! covariates is fitted. The data are standardized with the pooled residual
//! variance, batch location and scale parameters are shrunk towards priors shared by
//! all features, and the batch effects are removed from the standardized data before
//! mapping back to the original scale.
//!
//! Johnson WE, Li C, Rabinovic A (2007). "Adjusting batch effects in microarray
//! expression data using empirical Bayes methods." Biostatistics 8:118-127.

use anyhow::Result;
use log::{debug, info, warn};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::data::AlignedData;
use crate::error::AnalysisError;
use crate::testing::utils::{extract_levels, get_group_indices, mean_std};

const CONVERGENCE: f64 = 1e-4;
const MAX_ITER: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombatConfig {
    /// Metadata column holding the batch of each sample.
    pub batch_column: String,
    /// Metadata columns whose effects are kept (e.g. the biological group).
    pub covariates: Vec<String>,
    /// Only adjust batch means, not batch variances.
    pub mean_only: bool,
}

impl Default for CombatConfig {
    fn default() -> Self {
        CombatConfig {
            batch_column: "batch".to_string(),
            covariates: Vec::new(),
            mean_only: false,
        }
    }
}

impl CombatConfig {
    pub fn new(batch_column: &str) -> Self {
        CombatConfig {
            batch_column: batch_column.to_string(),
            ..Default::default()
        }
    }

    pub fn with_covariates(mut self, covariates: &[&str]) -> Self {
        self.covariates = covariates.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_column.is_empty() {
            return Err(AnalysisError::InvalidConfig("batch column name is empty".into()).into());
        }
        for (i, covariate) in self.covariates.iter().enumerate() {
            if *covariate == self.batch_column {
                return Err(AnalysisError::ColumnCollision(covariate.clone()).into());
            }
            if self.covariates[..i].contains(covariate) {
                return Err(AnalysisError::InvalidConfig(format!(
                    "covariate '{}' is listed more than once",
                    covariate
                ))
                .into());
            }
        }
        Ok(())
    }
}

fn sample_var(values: &[f64]) -> f64 {
    let (_, sd) = mean_std(values);
    sd * sd
}

/// Posterior batch mean and variance of one feature, iterated to a fixed point.
fn solve_posterior(
    standardized: &[f64],
    gamma_hat: f64,
    delta_hat: f64,
    gamma_bar: f64,
    t2: f64,
    a: f64,
    b: f64,
) -> (f64, f64) {
    let n = standardized.len() as f64;
    let mut gamma_old = gamma_hat;
    let mut delta_old = delta_hat;
    for _ in 0..MAX_ITER {
        let gamma_new = (t2 * n * gamma_hat + delta_old * gamma_bar) / (t2 * n + delta_old);
        let ss: f64 = standardized.iter().map(|v| (v - gamma_new).powi(2)).sum();
        let delta_new = (0.5 * ss + b) / (n / 2.0 + a - 1.0);

        let change = ((gamma_new - gamma_old) / gamma_old)
            .abs()
            .max(((delta_new - delta_old) / delta_old).abs());
        gamma_old = gamma_new;
        delta_old = delta_new;
        if !(change > CONVERGENCE) {
            break;
        }
    }
    (gamma_old, delta_old)
}

/// Remove batch effects from complete data.
///
/// Covariate columns (treatment coded when categorical) are protected: their effects
/// stay in the corrected values. Features with zero pooled variance are returned
/// unchanged. A batch with a single sample switches to mean-only adjustment.
pub fn combat_batch_correction(aligned: &AlignedData, config: &CombatConfig) -> Result<AlignedData> {
    config.validate()?;
    aligned.check_sample_order()?;
    let table = &aligned.table;
    let metadata = &aligned.metadata;

    let batch_column = metadata.require(&config.batch_column)?;
    if (0..batch_column.len()).any(|i| batch_column.is_missing(i)) {
        return Err(AnalysisError::InvalidInput(format!(
            "batch column '{}' has missing values",
            config.batch_column
        ))
        .into());
    }
    if table.has_missing() {
        return Err(AnalysisError::InvalidInput("batch correction needs complete data".into()).into());
    }
    if table.n_features() < 2 {
        return Err(AnalysisError::InvalidInput(
            "batch correction needs at least two features to estimate priors".into(),
        )
        .into());
    }

    let labels = metadata.labels(&config.batch_column)?;
    let batches = extract_levels(&labels);
    if batches.len() < 2 {
        return Err(AnalysisError::InsufficientGroups {
            column: config.batch_column.clone(),
            found: batches.len(),
        }
        .into());
    }
    let batch_rows = get_group_indices(&labels, &batches);
    let mean_only = config.mean_only || batch_rows.iter().any(|rows| rows.len() < 2);
    if mean_only && !config.mean_only {
        warn!("A batch has a single sample; adjusting batch means only");
    }

    let mut covariates: Vec<Vec<f64>> = Vec::new();
    for name in &config.covariates {
        if table.feature_index(name).is_some() {
            return Err(AnalysisError::ColumnCollision(name.clone()).into());
        }
        for column in metadata.require(name)?.design_columns() {
            if column.iter().any(|v| v.is_nan()) {
                return Err(AnalysisError::InvalidInput(format!("covariate '{}' has missing values", name)).into());
            }
            covariates.push(column);
        }
    }

    let n = table.n_samples();
    let n_batch = batches.len();
    let design = DMatrix::from_fn(n, n_batch + covariates.len(), |i, c| {
        if c < n_batch {
            if batch_rows[c].contains(&i) { 1.0 } else { 0.0 }
        } else {
            covariates[c - n_batch][i]
        }
    });
    let xtx_inv = (design.transpose() * &design)
        .try_inverse()
        .ok_or_else(|| AnalysisError::Numerical("covariates are confounded with batch".into()))?;

    // samples x features
    let y = DMatrix::from_fn(n, table.n_features(), |i, j| table.values()[[i, j]]);
    let beta = &xtx_inv * design.transpose() * &y;
    let residuals = &y - &design * &beta;
    info!(
        "ComBat: {} batch(es), {} covariate column(s), {} feature(s)",
        n_batch,
        covariates.len(),
        table.n_features()
    );

    let n_features = table.n_features();
    let mut grand_mean = vec![0.0; n_features];
    let mut var_pooled = vec![0.0; n_features];
    for j in 0..n_features {
        grand_mean[j] = (0..n_batch)
            .map(|b| batch_rows[b].len() as f64 / n as f64 * beta[(b, j)])
            .sum();
        var_pooled[j] = residuals.column(j).iter().map(|r| r * r).sum::<f64>() / n as f64;
    }

    // expected value of each sample without batch effect
    let stand_mean = DMatrix::from_fn(n, n_features, |i, j| {
        grand_mean[j]
            + (0..covariates.len())
                .map(|k| design[(i, n_batch + k)] * beta[(n_batch + k, j)])
                .sum::<f64>()
    });
    let standardized = DMatrix::from_fn(n, n_features, |i, j| {
        if var_pooled[j] > 0.0 {
            (y[(i, j)] - stand_mean[(i, j)]) / var_pooled[j].sqrt()
        } else {
            0.0
        }
    });

    let varying: Vec<usize> = (0..n_features).filter(|&j| var_pooled[j] > 0.0).collect();
    if varying.len() < n_features {
        debug!("{} feature(s) without variance are left unchanged", n_features - varying.len());
    }
    if varying.len() < 2 {
        return Err(AnalysisError::InvalidInput(
            "fewer than two features vary within batches".into(),
        )
        .into());
    }

    let mut corrected = table.values().clone();
    for (b, rows) in batch_rows.iter().enumerate() {
        let per_feature: Vec<Vec<f64>> = varying
            .iter()
            .map(|&j| rows.iter().map(|&i| standardized[(i, j)]).collect())
            .collect();
        let gamma_hat: Vec<f64> = per_feature
            .iter()
            .map(|v| v.iter().sum::<f64>() / v.len() as f64)
            .collect();
        let delta_hat: Vec<f64> = if mean_only {
            vec![1.0; varying.len()]
        } else {
            per_feature.iter().map(|v| sample_var(v)).collect()
        };

        let (gamma_bar, t2) = mean_std(&gamma_hat);
        let t2 = t2 * t2;
        let (delta_mean, delta_sd) = mean_std(&delta_hat);
        let s2 = delta_sd * delta_sd;

        let (gamma_star, delta_star): (Vec<f64>, Vec<f64>) = if mean_only {
            let n_b = rows.len() as f64;
            gamma_hat
                .iter()
                .map(|&g| ((t2 * n_b * g + gamma_bar) / (t2 * n_b + 1.0), 1.0))
                .unzip()
        } else if !(s2 > 0.0) {
            // identical batch variances: the prior collapses onto their mean
            let n_b = rows.len() as f64;
            gamma_hat
                .iter()
                .map(|&g| ((t2 * n_b * g + delta_mean * gamma_bar) / (t2 * n_b + delta_mean), delta_mean))
                .unzip()
        } else {
            let a = (2.0 * s2 + delta_mean * delta_mean) / s2;
            let b_prior = (delta_mean * s2 + delta_mean.powi(3)) / s2;
            per_feature
                .iter()
                .zip(gamma_hat.iter().zip(&delta_hat))
                .map(|(v, (&g, &d))| solve_posterior(v, g, d, gamma_bar, t2, a, b_prior))
                .unzip()
        };
        debug!("Batch '{}': prior mean {:.4}, prior variance {:.4}", batches[b], gamma_bar, t2);

        for (k, &j) in varying.iter().enumerate() {
            let scale = var_pooled[j].sqrt() / delta_star[k].sqrt();
            for &i in rows {
                corrected[[i, j]] = (standardized[(i, j)] - gamma_star[k]) * scale + stand_mean[(i, j)];
            }
        }
    }

    Ok(AlignedData {
        table: table.with_values(corrected)?,
        metadata: metadata.clone(),
    })
}
