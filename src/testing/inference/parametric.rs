//! Parametric statistical tests for omics measurement tables.
//!
//! This module implements t-tests (independent and paired), one-way and
//! repeated-measures ANOVA and Levene's test. All functions take the non-missing
//! observations of a single feature; missing-value removal happens in the caller.

use crate::testing::utils::{mean_std, median};
use crate::testing::{Alternative, TTestType, TestResult};
use single_utilities::traits::FloatOps;
use statrs::distribution::{ContinuousCDF, FisherSnedecor, StudentsT};

/// Perform a t-test comparing two samples.
///
/// This function performs either Student's t-test (assuming equal variances) or
/// Welch's t-test (allowing unequal variances) on two samples. The statistic is
/// signed as `mean(x) - mean(y)`.
///
/// # Arguments
///
/// * `x` - First sample
/// * `y` - Second sample
/// * `test_type` - Type of t-test to perform
///
/// # Returns
///
/// `TestResult` containing the t-statistic and p-value, or an untestable (NaN) result
/// when either sample has fewer than 2 observations or both have zero variance.
pub fn t_test<T>(x: &[T], y: &[T], test_type: TTestType) -> TestResult<f64>
where
    T: FloatOps,
{
    if x.len() < 2 || y.len() < 2 {
        return TestResult::untestable();
    }

    let mut sum_x = 0.0;
    let mut sum_sq_x = 0.0;
    for &val in x {
        let v = val.to_f64().unwrap_or(f64::NAN);
        sum_x += v;
        sum_sq_x += v * v;
    }

    let mut sum_y = 0.0;
    let mut sum_sq_y = 0.0;
    for &val in y {
        let v = val.to_f64().unwrap_or(f64::NAN);
        sum_y += v;
        sum_sq_y += v * v;
    }

    t_test_from_sums(
        sum_x,
        sum_sq_x,
        x.len() as f64,
        sum_y,
        sum_sq_y,
        y.len() as f64,
        test_type,
    )
}

/// Perform a t-test using precomputed summary statistics.
///
/// # Arguments
///
/// * `sum1`, `sum_sq1`, `n1` - Sum, sum of squares, and count for group 1
/// * `sum2`, `sum_sq2`, `n2` - Sum, sum of squares, and count for group 2
/// * `test_type` - Type of t-test to perform (Student's or Welch's)
///
/// # Returns
///
/// `TestResult` with t-statistic, two-sided p-value, degrees of freedom, standard
/// error and the 95% confidence interval of `mean1 - mean2`.
pub fn t_test_from_sums(
    sum1: f64,
    sum_sq1: f64,
    n1: f64,
    sum2: f64,
    sum_sq2: f64,
    n2: f64,
    test_type: TTestType,
) -> TestResult<f64> {
    if n1 < 2.0 || n2 < 2.0 {
        return TestResult::untestable();
    }

    let mean1 = sum1 / n1;
    let mean2 = sum2 / n2;

    // Computational formula, clamped against cancellation
    let var1 = ((sum_sq1 - sum1 * sum1 / n1) / (n1 - 1.0)).max(0.0);
    let var2 = ((sum_sq2 - sum2 * sum2 / n2) / (n2 - 1.0)).max(0.0);

    let mean_diff = mean1 - mean2;

    let (std_err, df) = match test_type {
        TTestType::Student => {
            let pooled_var = ((n1 - 1.0) * var1 + (n2 - 1.0) * var2) / (n1 + n2 - 2.0);
            ((pooled_var * (1.0 / n1 + 1.0 / n2)).sqrt(), n1 + n2 - 2.0)
        }
        TTestType::Welch => {
            let term1 = var1 / n1;
            let term2 = var2 / n2;
            let combined_var = term1 + term2;
            // Welch-Satterthwaite equation for degrees of freedom
            let df = combined_var * combined_var
                / (term1 * term1 / (n1 - 1.0) + term2 * term2 / (n2 - 1.0));
            (combined_var.sqrt(), df)
        }
    };

    if !(std_err > 0.0) || !df.is_finite() {
        return TestResult::untestable();
    }

    let t_stat = mean_diff / std_err;
    let p_value = t_p_value(t_stat, df, Alternative::TwoSided);
    let margin = t_critical(df, 0.975) * std_err;

    TestResult::new(t_stat, p_value)
        .with_degrees_of_freedom(df)
        .with_standard_error(std_err)
        .with_confidence_interval(mean_diff - margin, mean_diff + margin)
        .with_metadata("mean_difference", mean_diff)
}

/// Paired t-test on observations matched by position.
///
/// The statistic is signed as `mean(x - y)`; fewer than 2 pairs or constant
/// differences give an untestable result.
pub fn paired_t_test(x: &[f64], y: &[f64]) -> TestResult<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return TestResult::untestable();
    }
    let diffs: Vec<f64> = x.iter().zip(y).map(|(a, b)| a - b).collect();
    let n = diffs.len() as f64;
    let (mean_d, sd_d) = mean_std(&diffs);
    let std_err = sd_d / n.sqrt();
    if !(std_err > 0.0) {
        return TestResult::untestable();
    }
    let df = n - 1.0;
    let t_stat = mean_d / std_err;
    let margin = t_critical(df, 0.975) * std_err;

    TestResult::with_effect_size(t_stat, t_p_value(t_stat, df, Alternative::TwoSided), mean_d / sd_d)
        .with_degrees_of_freedom(df)
        .with_standard_error(std_err)
        .with_confidence_interval(mean_d - margin, mean_d + margin)
        .with_metadata("mean_difference", mean_d)
}

/// One-way ANOVA across groups of observations.
///
/// Empty groups are ignored. Needs at least two non-empty groups and more
/// observations than groups. The F statistic's numerator df is stored as
/// `degrees_of_freedom`, the denominator df under the `"df2"` metadata key.
pub fn one_way_anova(groups: &[Vec<f64>]) -> TestResult<f64> {
    let groups: Vec<&Vec<f64>> = groups.iter().filter(|g| !g.is_empty()).collect();
    let k = groups.len();
    let n_total: usize = groups.iter().map(|g| g.len()).sum();
    if k < 2 || n_total <= k {
        return TestResult::untestable();
    }

    let grand_mean = groups.iter().flat_map(|g| g.iter()).sum::<f64>() / n_total as f64;
    let mut ss_between = 0.0;
    let mut ss_within = 0.0;
    for group in &groups {
        let mean = group.iter().sum::<f64>() / group.len() as f64;
        ss_between += group.len() as f64 * (mean - grand_mean).powi(2);
        ss_within += group.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
    }

    let df1 = (k - 1) as f64;
    let df2 = (n_total - k) as f64;
    f_test(ss_between / df1, ss_within / df2, df1, df2)
        .with_metadata("ss_between", ss_between)
        .with_metadata("ss_within", ss_within)
}

/// Repeated-measures (within-subject) one-way ANOVA.
///
/// `data[s][c]` is subject `s` measured under condition `c`; every subject must be
/// complete. Sphericity is assumed (uncorrected p-value).
pub fn repeated_measures_anova(data: &[Vec<f64>]) -> TestResult<f64> {
    let n = data.len();
    let k = data.first().map(|r| r.len()).unwrap_or(0);
    if n < 2 || k < 2 || data.iter().any(|r| r.len() != k || r.iter().any(|v| v.is_nan())) {
        return TestResult::untestable();
    }

    let grand_mean = data.iter().flatten().sum::<f64>() / (n * k) as f64;
    let condition_means: Vec<f64> = (0..k)
        .map(|c| data.iter().map(|r| r[c]).sum::<f64>() / n as f64)
        .collect();
    let subject_means: Vec<f64> = data.iter().map(|r| r.iter().sum::<f64>() / k as f64).collect();

    let ss_conditions: f64 = condition_means
        .iter()
        .map(|m| n as f64 * (m - grand_mean).powi(2))
        .sum();
    let ss_subjects: f64 = subject_means
        .iter()
        .map(|m| k as f64 * (m - grand_mean).powi(2))
        .sum();
    let ss_total: f64 = data.iter().flatten().map(|v| (v - grand_mean).powi(2)).sum();
    let ss_error = (ss_total - ss_conditions - ss_subjects).max(0.0);

    let df1 = (k - 1) as f64;
    let df2 = ((k - 1) * (n - 1)) as f64;
    f_test(ss_conditions / df1, ss_error / df2, df1, df2)
        .with_metadata("ss_conditions", ss_conditions)
        .with_metadata("ss_subjects", ss_subjects)
}

/// Levene's test for equal variances, median-centred (Brown-Forsythe variant).
pub fn levene_test(groups: &[Vec<f64>]) -> TestResult<f64> {
    let deviations: Vec<Vec<f64>> = groups
        .iter()
        .map(|g| {
            let m = median(g);
            g.iter().map(|v| (v - m).abs()).collect()
        })
        .collect();
    one_way_anova(&deviations)
}

/// F-test from mean squares; untestable when the error mean square is zero.
pub(crate) fn f_test(ms_effect: f64, ms_error: f64, df1: f64, df2: f64) -> TestResult<f64> {
    if !(ms_error > 0.0) || !(df1 > 0.0) || !(df2 > 0.0) {
        return TestResult::untestable();
    }
    let f_stat = ms_effect / ms_error;
    TestResult::new(f_stat, f_p_value(f_stat, df1, df2))
        .with_degrees_of_freedom(df1)
        .with_metadata("df2", df2)
}

/// Upper-tail p-value of an F statistic.
pub fn f_p_value(f_stat: f64, df1: f64, df2: f64) -> f64 {
    if f_stat.is_nan() {
        return f64::NAN;
    }
    match FisherSnedecor::new(df1, df2) {
        Ok(dist) => dist.sf(f_stat.max(0.0)),
        Err(_) => f64::NAN,
    }
}

/// p-value of a t statistic with `df` degrees of freedom.
pub fn t_p_value(t_stat: f64, df: f64, alternative: Alternative) -> f64 {
    if t_stat.is_nan() {
        return f64::NAN;
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => match alternative {
            Alternative::TwoSided => (2.0 * dist.sf(t_stat.abs())).min(1.0),
            Alternative::Less => dist.cdf(t_stat),
            Alternative::Greater => dist.sf(t_stat),
        },
        Err(_) => f64::NAN,
    }
}

/// Quantile of Student's t distribution.
pub(crate) fn t_critical(df: f64, probability: f64) -> f64 {
    StudentsT::new(0.0, 1.0, df)
        .map(|dist| dist.inverse_cdf(probability))
        .unwrap_or(f64::NAN)
}
