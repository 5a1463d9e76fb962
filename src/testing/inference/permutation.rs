//! Permutation tests for paired and independent samples, and Jaccard similarity
//! summaries of groups of identifier sets.

use std::collections::BTreeSet;

use anyhow::Result;
use itertools::Itertools;
use log::warn;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::testing::TestResult;
use crate::testing::utils::{mean_std, median};

/// Statistic recomputed on every permutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermutationMetric {
    #[default]
    TStatistic,
    Mean,
    Median,
}

fn one_sample_t(values: &[f64]) -> f64 {
    let (mean, sd) = mean_std(values);
    let std_err = sd / (values.len() as f64).sqrt();
    if std_err > 0.0 { mean / std_err } else { f64::NAN }
}

fn student_t(x: &[f64], y: &[f64]) -> f64 {
    let (mx, sx) = mean_std(x);
    let (my, sy) = mean_std(y);
    let (nx, ny) = (x.len() as f64, y.len() as f64);
    let pooled = ((nx - 1.0) * sx * sx + (ny - 1.0) * sy * sy) / (nx + ny - 2.0);
    let std_err = (pooled * (1.0 / nx + 1.0 / ny)).sqrt();
    if std_err > 0.0 { (mx - my) / std_err } else { f64::NAN }
}

fn check_permutations(n_permutations: usize) -> Result<()> {
    if n_permutations == 0 {
        return Err(AnalysisError::InvalidConfig("permutation count must be positive".into()).into());
    }
    Ok(())
}

/// Share of permuted statistics at least as extreme as the observed one.
fn permutation_p_value(observed: f64, permuted: &[f64]) -> f64 {
    let threshold = observed.abs();
    permuted.iter().filter(|v| v.abs() >= threshold).count() as f64 / permuted.len() as f64
}

/// Sign-flip permutation test on paired observations.
///
/// Each permutation swaps the members of every pair with probability one half,
/// which flips the sign of its difference. The metric is computed on `x - y`
/// (one-sample t, mean or median of the differences). Pairs with a missing value
/// are dropped. The p-value is the share of permutations with `|metric|` at least
/// the observed `|metric|`.
///
/// # Errors
///
/// `InvalidInput` when `x` and `y` differ in length, `InvalidConfig` for zero
/// permutations.
pub fn paired_permutation(
    x: &[f64],
    y: &[f64],
    metric: PermutationMetric,
    n_permutations: usize,
    seed: u64,
) -> Result<TestResult<f64>> {
    if x.len() != y.len() {
        return Err(AnalysisError::InvalidInput(format!(
            "paired samples differ in length: {} and {}",
            x.len(),
            y.len()
        ))
        .into());
    }
    check_permutations(n_permutations)?;

    let diffs: Vec<f64> = x
        .iter()
        .zip(y)
        .map(|(a, b)| a - b)
        .filter(|d| !d.is_nan())
        .collect();
    let compute = |d: &[f64]| match metric {
        PermutationMetric::TStatistic => one_sample_t(d),
        PermutationMetric::Mean => d.iter().sum::<f64>() / d.len() as f64,
        PermutationMetric::Median => median(d),
    };

    let observed = if diffs.is_empty() { f64::NAN } else { compute(&diffs) };
    if observed.is_nan() {
        warn!("Paired permutation test is undefined for {} difference(s)", diffs.len());
        return Ok(TestResult::untestable());
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let flips: Vec<Vec<bool>> = (0..n_permutations)
        .map(|_| (0..diffs.len()).map(|_| rng.gen_bool(0.5)).collect())
        .collect();
    let permuted: Vec<f64> = flips
        .par_iter()
        .map(|flip| {
            let flipped: Vec<f64> = diffs
                .iter()
                .zip(flip)
                .map(|(d, &f)| if f { -d } else { *d })
                .collect();
            compute(&flipped)
        })
        .collect();

    Ok(TestResult::new(observed, permutation_p_value(observed, &permuted))
        .with_metadata("n_permutations", n_permutations as f64)
        .with_metadata("n", diffs.len() as f64))
}

/// Label-shuffling permutation test for two independent samples.
///
/// The observed statistic is Student's t of `x` against `y`, or the absolute
/// difference of their means or medians. Missing values are dropped before pooling.
///
/// # Errors
///
/// `InvalidConfig` for zero permutations.
pub fn independent_permutation(
    x: &[f64],
    y: &[f64],
    metric: PermutationMetric,
    n_permutations: usize,
    seed: u64,
) -> Result<TestResult<f64>> {
    check_permutations(n_permutations)?;

    let x: Vec<f64> = x.iter().copied().filter(|v| !v.is_nan()).collect();
    let y: Vec<f64> = y.iter().copied().filter(|v| !v.is_nan()).collect();
    let compute = |a: &[f64], b: &[f64]| match metric {
        PermutationMetric::TStatistic => student_t(a, b),
        PermutationMetric::Mean => (mean_std(a).0 - mean_std(b).0).abs(),
        PermutationMetric::Median => (median(a) - median(b)).abs(),
    };

    let observed = if x.is_empty() || y.is_empty() { f64::NAN } else { compute(&x, &y) };
    if observed.is_nan() {
        warn!(
            "Permutation test is undefined for groups of {} and {} value(s)",
            x.len(),
            y.len()
        );
        return Ok(TestResult::untestable());
    }

    let pooled: Vec<f64> = x.iter().chain(&y).copied().collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let shuffles: Vec<Vec<f64>> = (0..n_permutations)
        .map(|_| {
            let mut shuffled = pooled.clone();
            shuffled.shuffle(&mut rng);
            shuffled
        })
        .collect();
    let permuted: Vec<f64> = shuffles
        .par_iter()
        .map(|shuffled| {
            let (a, b) = shuffled.split_at(x.len());
            compute(a, b)
        })
        .collect();

    Ok(TestResult::new(observed, permutation_p_value(observed, &permuted))
        .with_metadata("n_permutations", n_permutations as f64))
}

/// `|a ∩ b| / |a ∪ b|`; 0 when both sets are empty.
pub fn jaccard_similarity<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Mean and population standard deviation of a list of scores; `(0, 0)` when empty.
fn mean_and_spread(scores: &[f64]) -> (f64, f64) {
    if scores.is_empty() {
        return (0.0, 0.0);
    }
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let var = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Mean and standard deviation of the Jaccard similarity over every pair of sets in
/// one group. A single set gives `(0, 0)`.
///
/// # Errors
///
/// `InvalidInput` when the group is empty.
pub fn average_jaccard<T: Ord>(group: &[BTreeSet<T>]) -> Result<(f64, f64)> {
    if group.is_empty() {
        return Err(AnalysisError::InvalidInput("cannot compare an empty group of sets".into()).into());
    }
    let scores: Vec<f64> = group
        .iter()
        .tuple_combinations()
        .map(|(a, b)| jaccard_similarity(a, b))
        .collect();
    Ok(mean_and_spread(&scores))
}

/// Mean and standard deviation of the Jaccard similarity over every set of
/// `group1` against every set of `group2`.
///
/// # Errors
///
/// `InvalidInput` when either group is empty.
pub fn between_jaccard<T: Ord>(group1: &[BTreeSet<T>], group2: &[BTreeSet<T>]) -> Result<(f64, f64)> {
    if group1.is_empty() || group2.is_empty() {
        return Err(AnalysisError::InvalidInput("both groups of sets must be non-empty".into()).into());
    }
    let scores: Vec<f64> = group1
        .iter()
        .cartesian_product(group2)
        .map(|(a, b)| jaccard_similarity(a, b))
        .collect();
    Ok(mean_and_spread(&scores))
}
