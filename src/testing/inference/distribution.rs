//! Tests on the shape of distributions: two-sample Kolmogorov-Smirnov and
//! Shapiro-Wilk normality.

use statrs::distribution::{ContinuousCDF, Normal};

use crate::testing::{Alternative, TestResult};

/// Above this many `n1 * n2` cells the Kolmogorov-Smirnov p-value is asymptotic.
const KS_EXACT_LIMIT: usize = 10_000;

fn sorted_observed(values: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// Two-sample Kolmogorov-Smirnov test.
///
/// The statistic compares the empirical CDFs `F` of `x` and `G` of `y`:
/// `max |F - G|` (two-sided), `max (F - G)` (`Greater`) or `max (G - F)` (`Less`).
/// The p-value is exact (lattice path count, assuming no ties) when
/// `n1 * n2 < 10000` and asymptotic otherwise. Missing values are dropped.
pub fn kolmogorov_smirnov(x: &[f64], y: &[f64], alternative: Alternative) -> TestResult<f64> {
    let x = sorted_observed(x);
    let y = sorted_observed(y);
    let (n1, n2) = (x.len(), y.len());
    if n1 == 0 || n2 == 0 {
        return TestResult::untestable();
    }

    // Walk the pooled order; gaps are tracked as integers scaled by n1 * n2.
    let (mut i, mut j) = (0usize, 0usize);
    let (mut max_plus, mut max_minus) = (0i64, 0i64);
    while i < n1 || j < n2 {
        let next = match (x.get(i), y.get(j)) {
            (Some(&a), Some(&b)) => a.min(b),
            (Some(&a), None) => a,
            (None, Some(&b)) => b,
            (None, None) => break,
        };
        while i < n1 && x[i] <= next {
            i += 1;
        }
        while j < n2 && y[j] <= next {
            j += 1;
        }
        let gap = (i * n2) as i64 - (j * n1) as i64;
        max_plus = max_plus.max(gap);
        max_minus = max_minus.max(-gap);
    }

    let scaled = match alternative {
        Alternative::TwoSided => max_plus.max(max_minus),
        Alternative::Greater => max_plus,
        Alternative::Less => max_minus,
    };
    let statistic = scaled as f64 / (n1 * n2) as f64;

    let p_value = if n1 * n2 < KS_EXACT_LIMIT {
        let (a, b) = match alternative {
            Alternative::Less => (n2, n1),
            _ => (n1, n2),
        };
        ks_exact_p_value(a, b, scaled, alternative == Alternative::TwoSided)
    } else {
        ks_asymptotic_p_value(statistic, n1, n2, alternative == Alternative::TwoSided)
    };

    TestResult::new(statistic, p_value.clamp(0.0, 1.0))
        .with_metadata("n1", n1 as f64)
        .with_metadata("n2", n2 as f64)
}

/// Probability that a random interleaving of `n1` and `n2` points reaches a scaled
/// gap of at least `h`. `u[j]` holds, for the current `i`, the share of paths to
/// `(i, j)` that stayed strictly inside the band.
fn ks_exact_p_value(n1: usize, n2: usize, h: i64, two_sided: bool) -> f64 {
    if h <= 0 {
        return 1.0;
    }
    let inside = |i: usize, j: usize| {
        let gap = (i * n2) as i64 - (j * n1) as i64;
        if two_sided { gap.abs() < h } else { gap < h }
    };

    let mut u = vec![0.0; n2 + 1];
    u[0] = 1.0;
    for j in 1..=n2 {
        u[j] = if inside(0, j) { u[j - 1] } else { 0.0 };
    }
    for i in 1..=n1 {
        u[0] = if inside(i, 0) { u[0] } else { 0.0 };
        for j in 1..=n2 {
            u[j] = if inside(i, j) {
                (i as f64 * u[j] + j as f64 * u[j - 1]) / (i + j) as f64
            } else {
                0.0
            };
        }
    }
    1.0 - u[n2]
}

fn ks_asymptotic_p_value(statistic: f64, n1: usize, n2: usize, two_sided: bool) -> f64 {
    let en = (n1 * n2) as f64 / (n1 + n2) as f64;
    if !two_sided {
        return (-2.0 * en * statistic * statistic).exp();
    }
    let lambda = en.sqrt() * statistic;
    if lambda < 1e-3 {
        return 1.0;
    }
    let mut sum = 0.0;
    for k in 1..=100 {
        let k = k as f64;
        let term = (-2.0 * k * k * lambda * lambda).exp();
        sum += if k as i64 % 2 == 1 { term } else { -term };
        if term < 1e-16 {
            break;
        }
    }
    2.0 * sum
}

fn poly(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

/// Shapiro-Wilk W test for normality (Royston's 1995 approximation, 3 to 5000
/// observations).
///
/// Small p-values reject normality. Missing values are dropped; fewer than 3
/// observations, more than 5000 or a constant sample is untestable.
pub fn shapiro_wilk(values: &[f64]) -> TestResult<f64> {
    let x = sorted_observed(values);
    let n = x.len();
    if !(3..=5000).contains(&n) {
        return TestResult::untestable();
    }
    let mean = x.iter().sum::<f64>() / n as f64;
    let ss: f64 = x.iter().map(|v| (v - mean).powi(2)).sum();
    if ss <= 0.0 {
        return TestResult::untestable();
    }
    let normal = match Normal::new(0.0, 1.0) {
        Ok(n) => n,
        Err(_) => return TestResult::untestable(),
    };

    let weights = if n == 3 {
        let a = 0.5_f64.sqrt();
        vec![-a, 0.0, a]
    } else {
        let nf = n as f64;
        let m: Vec<f64> = (1..=n)
            .map(|i| normal.inverse_cdf((i as f64 - 0.375) / (nf + 0.25)))
            .collect();
        let summ2: f64 = m.iter().map(|v| v * v).sum();
        let norm = summ2.sqrt();
        let u = 1.0 / nf.sqrt();

        let mut a = vec![0.0; n];
        let an = m[n - 1] / norm + poly(&[0.0, 0.221157, -0.147981, -2.071190, 4.434685, -2.706056], u);
        a[n - 1] = an;
        a[0] = -an;
        let (phi, middle) = if n > 5 {
            let an1 = m[n - 2] / norm + poly(&[0.0, 0.042981, -0.293762, -1.752461, 5.682633, -3.582633], u);
            a[n - 2] = an1;
            a[1] = -an1;
            let phi = (summ2 - 2.0 * m[n - 1].powi(2) - 2.0 * m[n - 2].powi(2))
                / (1.0 - 2.0 * an.powi(2) - 2.0 * an1.powi(2));
            (phi, 2..n - 2)
        } else {
            let phi = (summ2 - 2.0 * m[n - 1].powi(2)) / (1.0 - 2.0 * an.powi(2));
            (phi, 1..n - 1)
        };
        let scale = phi.sqrt();
        for i in middle {
            a[i] = m[i] / scale;
        }
        a
    };

    let numerator: f64 = weights.iter().zip(&x).map(|(a, v)| a * v).sum();
    let w = (numerator * numerator / ss).min(1.0);

    let p_value = if n == 3 {
        let p = 6.0 / std::f64::consts::PI * (w.sqrt().asin() - 0.75_f64.sqrt().asin());
        p.max(0.0)
    } else {
        let nf = n as f64;
        let w1 = (1.0 - w).ln();
        let z = if n <= 11 {
            let gamma = -2.273 + 0.459 * nf;
            if w1 >= gamma {
                // outside the range of the small-sample transform
                return TestResult::new(w, 0.0).with_metadata("n", n as f64);
            }
            let mu = poly(&[0.5440, -0.39978, 0.025054, -6.714e-4], nf);
            let sigma = poly(&[1.3822, -0.77857, 0.062767, -0.0020322], nf).exp();
            (-(gamma - w1).ln() - mu) / sigma
        } else {
            let ln_n = nf.ln();
            let mu = poly(&[-1.5861, -0.31082, -0.083751, 0.0038915], ln_n);
            let sigma = poly(&[-0.4803, -0.082676, 0.0030302], ln_n).exp();
            (w1 - mu) / sigma
        };
        if z.is_nan() { f64::NAN } else { normal.sf(z) }
    };

    TestResult::new(w, p_value).with_metadata("n", n as f64)
}
