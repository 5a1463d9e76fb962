//! Correlation coefficients with t-based p-values.
//!
//! Pairs where either value is missing are skipped before anything is computed.

use std::collections::BTreeMap;

use crate::testing::inference::parametric::t_p_value;
use crate::testing::utils::average_ranks;
use crate::testing::{Alternative, TestResult};

fn complete_pairs(x: &[f64], y: &[f64]) -> (Vec<f64>, Vec<f64>) {
    x.iter()
        .zip(y)
        .filter(|(a, b)| !a.is_nan() && !b.is_nan())
        .map(|(a, b)| (*a, *b))
        .unzip()
}

/// Correlation of already centred values.
fn centred_correlation(xc: &[f64], yc: &[f64]) -> f64 {
    let sxy: f64 = xc.iter().zip(yc).map(|(a, b)| a * b).sum();
    let sxx: f64 = xc.iter().map(|a| a * a).sum();
    let syy: f64 = yc.iter().map(|b| b * b).sum();
    if sxx <= 0.0 || syy <= 0.0 {
        return f64::NAN;
    }
    (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0)
}

/// Two-sided p-value of a correlation coefficient on `df` degrees of freedom.
pub fn correlation_p_value(r: f64, df: f64) -> f64 {
    if r.is_nan() || df < 1.0 {
        return f64::NAN;
    }
    if r.abs() >= 1.0 {
        return 0.0;
    }
    let t = r * (df / (1.0 - r * r)).sqrt();
    t_p_value(t, df, Alternative::TwoSided)
}

/// Pearson product-moment correlation.
///
/// Needs at least 3 complete pairs and non-constant inputs; otherwise the result is
/// untestable. The statistic and the effect size are both `r`.
pub fn pearson(x: &[f64], y: &[f64]) -> TestResult<f64> {
    if x.len() != y.len() {
        return TestResult::untestable();
    }
    let (x, y) = complete_pairs(x, y);
    pearson_complete(&x, &y)
}

fn pearson_complete(x: &[f64], y: &[f64]) -> TestResult<f64> {
    let n = x.len();
    if n < 3 {
        return TestResult::untestable();
    }
    let mx = x.iter().sum::<f64>() / n as f64;
    let my = y.iter().sum::<f64>() / n as f64;
    let xc: Vec<f64> = x.iter().map(|v| v - mx).collect();
    let yc: Vec<f64> = y.iter().map(|v| v - my).collect();

    let r = centred_correlation(&xc, &yc);
    if r.is_nan() {
        return TestResult::untestable();
    }
    let df = (n - 2) as f64;
    TestResult::with_effect_size(r, correlation_p_value(r, df), r)
        .with_degrees_of_freedom(df)
        .with_metadata("n", n as f64)
}

/// Spearman rank correlation: Pearson on average ranks, same t-based p-value.
pub fn spearman(x: &[f64], y: &[f64]) -> TestResult<f64> {
    if x.len() != y.len() {
        return TestResult::untestable();
    }
    let (x, y) = complete_pairs(x, y);
    let (rx, _) = average_ranks(&x);
    let (ry, _) = average_ranks(&y);
    pearson_complete(&rx, &ry)
}

/// Repeated-measures correlation: the common within-subject association of `x` and
/// `y` when every subject contributes several paired observations.
///
/// Both variables are centred on their subject means; `r` is the correlation of the
/// centred values, which equals the partial correlation from the ANCOVA
/// `y ~ subject + x`. Degrees of freedom are `N - k - 1` for `N` complete pairs over
/// `k` subjects.
pub fn repeated_measures_correlation<S: AsRef<str>>(x: &[f64], y: &[f64], subjects: &[S]) -> TestResult<f64> {
    if x.len() != y.len() || x.len() != subjects.len() {
        return TestResult::untestable();
    }

    let mut by_subject: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, subject) in subjects.iter().enumerate() {
        if !x[i].is_nan() && !y[i].is_nan() {
            by_subject.entry(subject.as_ref()).or_default().push(i);
        }
    }

    let mut xc = Vec::new();
    let mut yc = Vec::new();
    for rows in by_subject.values() {
        let len = rows.len() as f64;
        let mx = rows.iter().map(|&i| x[i]).sum::<f64>() / len;
        let my = rows.iter().map(|&i| y[i]).sum::<f64>() / len;
        for &i in rows {
            xc.push(x[i] - mx);
            yc.push(y[i] - my);
        }
    }

    let n = xc.len();
    let k = by_subject.len();
    if n < k + 2 {
        return TestResult::untestable();
    }
    let r = centred_correlation(&xc, &yc);
    if r.is_nan() {
        return TestResult::untestable();
    }
    let df = (n - k - 1) as f64;
    TestResult::with_effect_size(r, correlation_p_value(r, df), r)
        .with_degrees_of_freedom(df)
        .with_metadata("n", n as f64)
        .with_metadata("subjects", k as f64)
}
