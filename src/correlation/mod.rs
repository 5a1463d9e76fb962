//! Feature-feature correlation over a measurement table.
//!
//! - [`run_efficient_correlation`]: full coefficient and p-value matrices from one
//!   matrix product over complete features
//! - [`corr_lower_triangle`]: the same matrices with the diagonal and upper triangle
//!   masked
//! - [`run_correlation`]: long-format pairs with pairwise-complete observations and
//!   multiple testing correction
//! - [`run_rm_correlation`]: repeated-measures correlation when samples come from
//!   shared subjects

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use itertools::Itertools;
use log::info;
use nalgebra::DMatrix;
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::{AlignedData, MeasurementTable};
use crate::error::AnalysisError;
use crate::exploratory::complete_matrix;
use crate::testing::TestResult;
use crate::testing::correction::{CorrectionMethod, correct_pvalues};
use crate::testing::inference::correlation::{
    correlation_p_value, pearson, repeated_measures_correlation, spearman,
};
use crate::testing::utils::average_ranks;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMethod {
    #[default]
    Pearson,
    Spearman,
}

impl fmt::Display for CorrelationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CorrelationMethod::Pearson => "pearson",
            CorrelationMethod::Spearman => "spearman",
        })
    }
}

impl FromStr for CorrelationMethod {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pearson" => Ok(CorrelationMethod::Pearson),
            "spearman" => Ok(CorrelationMethod::Spearman),
            other => Err(AnalysisError::InvalidConfig(format!(
                "unknown correlation method '{}'",
                other
            ))),
        }
    }
}

/// Square feature × feature matrices in `features` order.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationMatrix {
    pub features: Vec<String>,
    pub coefficients: Array2<f64>,
    pub pvalues: Array2<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub method: CorrelationMethod,
    pub alpha: f64,
    pub correction: CorrectionMethod,
    /// Pairs with `|r|` below this are dropped after correction.
    pub min_coefficient: f64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        CorrelationConfig {
            method: CorrelationMethod::Pearson,
            alpha: 0.05,
            correction: CorrectionMethod::BenjaminiHochberg,
            min_coefficient: 0.0,
        }
    }
}

impl CorrelationConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(AnalysisError::InvalidConfig(format!("alpha must be within (0, 1), got {}", self.alpha)).into());
        }
        if !(0.0..=1.0).contains(&self.min_coefficient) {
            return Err(AnalysisError::InvalidConfig(format!(
                "minimum coefficient must be within [0, 1], got {}",
                self.min_coefficient
            ))
            .into());
        }
        Ok(())
    }
}

/// One feature pair; `feature1` precedes `feature2` in table order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationRecord {
    pub feature1: String,
    pub feature2: String,
    pub coefficient: f64,
    pub pvalue: f64,
    pub padj: f64,
    pub rejected: Option<bool>,
    /// Complete observations behind the coefficient.
    pub n: usize,
}

/// Coefficient and p-value matrices over the features without missing values.
///
/// Features with a missing value are dropped (logged). Each column is centred and
/// scaled to unit norm once, so the whole coefficient matrix is a single product.
/// Spearman ranks every column first. The diagonal is `r = 1`, `p = 0`; a constant
/// feature has NaN in its row and column.
///
/// # Errors
///
/// `EmptyTable` when no complete feature is left, `InvalidInput` with fewer than 3
/// samples.
pub fn run_efficient_correlation(table: &MeasurementTable, method: CorrelationMethod) -> Result<CorrelationMatrix> {
    let (kept, mut matrix) = complete_matrix(table, true)?;
    let n = matrix.nrows();
    if n < 3 {
        return Err(AnalysisError::InvalidInput(format!("correlation needs at least 3 samples, got {}", n)).into());
    }

    for mut column in matrix.column_iter_mut() {
        if method == CorrelationMethod::Spearman {
            let values: Vec<f64> = column.iter().copied().collect();
            let (ranks, _) = average_ranks(&values);
            column.copy_from_slice(&ranks);
        }
        let mean = column.mean();
        column.add_scalar_mut(-mean);
        let norm = column.norm();
        if norm > 0.0 {
            column /= norm;
        } else {
            column.fill(f64::NAN);
        }
    }

    let product: DMatrix<f64> = matrix.transpose() * &matrix;
    let k = kept.len();
    let df = (n - 2) as f64;
    let coefficients = Array2::from_shape_fn((k, k), |(i, j)| {
        let r = product[(i, j)];
        if r.is_nan() {
            f64::NAN
        } else if i == j {
            1.0
        } else {
            r.clamp(-1.0, 1.0)
        }
    });
    let pvalues = Array2::from_shape_fn((k, k), |(i, j)| {
        let r = coefficients[[i, j]];
        if i == j && !r.is_nan() { 0.0 } else { correlation_p_value(r, df) }
    });

    info!("Correlated {} feature(s) over {} sample(s) ({})", k, n, method);
    Ok(CorrelationMatrix {
        features: kept.iter().map(|&j| table.features()[j].clone()).collect(),
        coefficients,
        pvalues,
    })
}

/// [`run_efficient_correlation`] with every entry on or above the diagonal set to
/// NaN, so each pair appears once at `[later, earlier]`.
pub fn corr_lower_triangle(table: &MeasurementTable, method: CorrelationMethod) -> Result<CorrelationMatrix> {
    let mut matrix = run_efficient_correlation(table, method)?;
    for ((i, j), v) in matrix.coefficients.indexed_iter_mut() {
        if j >= i {
            *v = f64::NAN;
        }
    }
    for ((i, j), v) in matrix.pvalues.indexed_iter_mut() {
        if j >= i {
            *v = f64::NAN;
        }
    }
    Ok(matrix)
}

fn corrected_records(
    features: &[String],
    pairs: &[(usize, usize)],
    results: Vec<TestResult<f64>>,
    config: &CorrelationConfig,
) -> Result<Vec<CorrelationRecord>> {
    let pvalues: Vec<f64> = results.iter().map(|r| r.p_value).collect();
    let corrected = correct_pvalues(&pvalues, config.alpha, config.correction)?;

    let records: Vec<CorrelationRecord> = pairs
        .iter()
        .zip(results)
        .zip(corrected.padj.into_iter().zip(corrected.rejected))
        .filter(|((_, result), _)| config.min_coefficient == 0.0 || result.statistic.abs() >= config.min_coefficient)
        .map(|((&(i, j), result), (padj, rejected))| CorrelationRecord {
            feature1: features[i].clone(),
            feature2: features[j].clone(),
            coefficient: result.statistic,
            pvalue: result.p_value,
            padj,
            rejected,
            n: result.metadata.get("n").map_or(0, |n| *n as usize),
        })
        .collect();

    info!(
        "{} of {} feature pair(s) kept, {} significant",
        records.len(),
        pairs.len(),
        records.iter().filter(|r| r.rejected == Some(true)).count()
    );
    Ok(records)
}

/// Correlation of every feature pair on the samples where both are observed.
///
/// P-values are corrected once across all pairs, before the `min_coefficient`
/// filter. Pairs with fewer than 3 complete observations carry NaN and stay out of
/// the correction family.
pub fn run_correlation(table: &MeasurementTable, config: &CorrelationConfig) -> Result<Vec<CorrelationRecord>> {
    config.validate()?;
    let pairs: Vec<(usize, usize)> = (0..table.n_features()).tuple_combinations().collect();
    let results: Vec<TestResult<f64>> = pairs
        .par_iter()
        .map(|&(i, j)| {
            let x: Vec<f64> = table.column(i).to_vec();
            let y: Vec<f64> = table.column(j).to_vec();
            match config.method {
                CorrelationMethod::Pearson => pearson(&x, &y),
                CorrelationMethod::Spearman => spearman(&x, &y),
            }
        })
        .collect();
    corrected_records(table.features(), &pairs, results, config)
}

/// Repeated-measures correlation of every feature pair, with samples grouped by the
/// `subject_column` of the metadata. Samples without a subject are left out.
///
/// # Errors
///
/// `MissingColumn` for an unknown subject column, `InvalidConfig` when the method is
/// not Pearson (the coefficient is defined on centred raw values).
pub fn run_rm_correlation(
    aligned: &AlignedData,
    subject_column: &str,
    config: &CorrelationConfig,
) -> Result<Vec<CorrelationRecord>> {
    config.validate()?;
    if config.method != CorrelationMethod::Pearson {
        return Err(AnalysisError::InvalidConfig(
            "repeated-measures correlation supports the pearson method only".into(),
        )
        .into());
    }
    let data = aligned.drop_missing_in(subject_column)?;
    let subjects: Vec<String> = data
        .metadata
        .labels(subject_column)?
        .into_iter()
        .flatten()
        .collect();
    let table = &data.table;

    let pairs: Vec<(usize, usize)> = (0..table.n_features()).tuple_combinations().collect();
    let results: Vec<TestResult<f64>> = pairs
        .par_iter()
        .map(|&(i, j)| {
            let x: Vec<f64> = table.column(i).to_vec();
            let y: Vec<f64> = table.column(j).to_vec();
            repeated_measures_correlation(&x, &y, &subjects)
        })
        .collect();
    corrected_records(table.features(), &pairs, results, config)
}
