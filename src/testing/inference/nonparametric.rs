use crate::testing::utils::average_ranks;
use crate::testing::{Alternative, TestResult};
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};

fn normal_p_value(z: f64, alternative: Alternative) -> f64 {
    let normal = match Normal::new(0.0, 1.0) {
        Ok(n) => n,
        Err(_) => return f64::NAN,
    };
    match alternative {
        Alternative::TwoSided => (2.0 * normal.sf(z.abs())).min(1.0),
        Alternative::Less => normal.cdf(z),
        Alternative::Greater => normal.sf(z),
    }
}

/// Mann-Whitney U test with the normal approximation, tie correction and
/// continuity correction.
///
/// The statistic is U of `x` (number of pairs with `x > y`, ties counting one half).
/// The effect size is the rank-biserial correlation `1 - 2U / (nx * ny)`, positive
/// when `y` tends to be larger.
pub fn mann_whitney(x: &[f64], y: &[f64], alternative: Alternative) -> TestResult<f64> {
    let nx = x.len();
    let ny = y.len();

    if nx == 0 || ny == 0 {
        return TestResult::untestable();
    }

    let mut combined: Vec<f64> = Vec::with_capacity(nx + ny);
    combined.extend_from_slice(x);
    combined.extend_from_slice(y);
    let (ranks, tie_term) = average_ranks(&combined);

    let rank_sum_x: f64 = ranks[..nx].iter().sum();
    let nx_f = nx as f64;
    let ny_f = ny as f64;
    let n = nx_f + ny_f;

    let u_x = rank_sum_x - nx_f * (nx_f + 1.0) / 2.0;
    let mean_u = nx_f * ny_f / 2.0;
    let var_u = nx_f * ny_f / 12.0 * ((n + 1.0) - tie_term / (n * (n - 1.0)));

    if !(var_u > 0.0) {
        return TestResult::untestable();
    }

    let sd_u = var_u.sqrt();
    let z = match alternative {
        Alternative::TwoSided => {
            let d = u_x - mean_u;
            (d.abs() - 0.5).max(0.0) * d.signum() / sd_u
        }
        Alternative::Less => (u_x - mean_u + 0.5) / sd_u,
        Alternative::Greater => (u_x - mean_u - 0.5) / sd_u,
    };

    let p_value = normal_p_value(z, alternative);
    let effect_size = 1.0 - 2.0 * u_x / (nx_f * ny_f);

    TestResult::with_effect_size(u_x, p_value, effect_size)
        .with_standard_error(sd_u)
        .with_metadata("z_score", z)
        .with_metadata("mean_u", mean_u)
        .with_metadata("var_u", var_u)
        .with_metadata("nx", nx_f)
        .with_metadata("ny", ny_f)
}

/// Wilcoxon signed-rank test on paired observations (normal approximation).
///
/// Zero differences are discarded. The statistic is `min(W+, W-)`; the effect size
/// is the matched-pairs rank-biserial correlation `(W- - W+) / (W+ + W-)`, positive
/// when `y` tends to be larger.
pub fn wilcoxon_signed_rank(x: &[f64], y: &[f64]) -> TestResult<f64> {
    if x.len() != y.len() {
        return TestResult::untestable();
    }
    let diffs: Vec<f64> = x
        .iter()
        .zip(y)
        .map(|(a, b)| a - b)
        .filter(|d| *d != 0.0)
        .collect();
    let n = diffs.len();
    if n < 2 {
        return TestResult::untestable();
    }

    let magnitudes: Vec<f64> = diffs.iter().map(|d| d.abs()).collect();
    let (ranks, tie_term) = average_ranks(&magnitudes);
    let w_plus: f64 = ranks
        .iter()
        .zip(&diffs)
        .filter(|(_, d)| **d > 0.0)
        .map(|(r, _)| r)
        .sum();
    let n_f = n as f64;
    let total = n_f * (n_f + 1.0) / 2.0;
    let w_minus = total - w_plus;

    let mean_w = total / 2.0;
    let var_w = n_f * (n_f + 1.0) * (2.0 * n_f + 1.0) / 24.0 - tie_term / 48.0;
    if !(var_w > 0.0) {
        return TestResult::untestable();
    }
    let statistic = w_plus.min(w_minus);
    let z = (w_plus - mean_w) / var_w.sqrt();

    TestResult::with_effect_size(
        statistic,
        normal_p_value(z, Alternative::TwoSided),
        (w_minus - w_plus) / total,
    )
    .with_metadata("z_score", z)
    .with_metadata("n_nonzero", n_f)
}

/// Kruskal-Wallis H test across groups, tie corrected.
///
/// Empty groups are ignored; the numerator df (`k - 1`) is reported as
/// `degrees_of_freedom`.
pub fn kruskal_wallis(groups: &[Vec<f64>]) -> TestResult<f64> {
    let groups: Vec<&Vec<f64>> = groups.iter().filter(|g| !g.is_empty()).collect();
    let k = groups.len();
    if k < 2 {
        return TestResult::untestable();
    }

    let combined: Vec<f64> = groups.iter().flat_map(|g| g.iter().copied()).collect();
    let n = combined.len() as f64;
    let (ranks, tie_term) = average_ranks(&combined);

    let mut offset = 0;
    let mut h = 0.0;
    for group in &groups {
        let rank_sum: f64 = ranks[offset..offset + group.len()].iter().sum();
        h += rank_sum * rank_sum / group.len() as f64;
        offset += group.len();
    }
    h = 12.0 / (n * (n + 1.0)) * h - 3.0 * (n + 1.0);

    let correction = 1.0 - tie_term / (n * n * n - n);
    if !(correction > 0.0) {
        return TestResult::untestable();
    }
    h /= correction;

    let df = (k - 1) as f64;
    let p_value = match ChiSquared::new(df) {
        Ok(dist) => dist.sf(h.max(0.0)),
        Err(_) => f64::NAN,
    };

    TestResult::new(h, p_value).with_degrees_of_freedom(df)
}

/// Friedman test for repeated measures.
///
/// `data[s][c]` is subject `s` under condition `c`; every subject must be complete.
/// Ranks are taken within each subject and the statistic is tie corrected.
pub fn friedman_test(data: &[Vec<f64>]) -> TestResult<f64> {
    let n = data.len();
    let k = data.first().map(|r| r.len()).unwrap_or(0);
    if n < 2 || k < 2 || data.iter().any(|r| r.len() != k || r.iter().any(|v| v.is_nan())) {
        return TestResult::untestable();
    }

    let mut rank_sums = vec![0.0; k];
    let mut tie_term = 0.0;
    for row in data {
        let (ranks, ties) = average_ranks(row);
        for (sum, r) in rank_sums.iter_mut().zip(ranks) {
            *sum += r;
        }
        tie_term += ties;
    }

    let n_f = n as f64;
    let k_f = k as f64;
    let sum_sq: f64 = rank_sums.iter().map(|r| r * r).sum();
    let q = 12.0 / (n_f * k_f * (k_f + 1.0)) * sum_sq - 3.0 * n_f * (k_f + 1.0);

    let correction = 1.0 - tie_term / (n_f * k_f * (k_f * k_f - 1.0));
    if !(correction > 0.0) {
        return TestResult::untestable();
    }
    let q = q / correction;

    let df = k_f - 1.0;
    let p_value = match ChiSquared::new(df) {
        Ok(dist) => dist.sf(q.max(0.0)),
        Err(_) => f64::NAN,
    };
    TestResult::new(q, p_value).with_degrees_of_freedom(df)
}
