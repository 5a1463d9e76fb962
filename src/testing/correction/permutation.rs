//! Permutation-based false discovery rate.
//!
//! Sample labels are shuffled `n_permutations` times with a seeded generator; the
//! p-values recomputed on every shuffle form the null distribution against which the
//! observed p-values are ranked.

use anyhow::Result;
use log::debug;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::error::AnalysisError;

/// Tolerance added to each observed p-value when counting null p-values below it.
const NULL_TOLERANCE: f64 = 1e-13;

/// Permutation q-values.
///
/// `recompute` receives a permutation of `0..n_samples` (the new position of every
/// sample label) and must return one p-value per test in the same order as
/// `observed`. For each observed `p`:
///
/// `q = (#null <= p) / n_permutations / (#observed <= p)`, clamped to `[p, 1]`.
///
/// NaN observed p-values stay NaN; NaN null p-values are ignored.
pub fn permutation_fdr<F>(
    observed: &[f64],
    n_samples: usize,
    n_permutations: usize,
    seed: u64,
    recompute: F,
) -> Result<Vec<f64>>
where
    F: Fn(&[usize]) -> Vec<f64> + Sync,
{
    if n_permutations == 0 {
        return Err(AnalysisError::InvalidConfig("permutation count must be positive".into()).into());
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let permutations: Vec<Vec<usize>> = (0..n_permutations)
        .map(|_| {
            let mut order: Vec<usize> = (0..n_samples).collect();
            order.shuffle(&mut rng);
            order
        })
        .collect();

    let mut null: Vec<f64> = permutations
        .par_iter()
        .flat_map_iter(|order| recompute(order.as_slice()))
        .filter(|p| !p.is_nan())
        .collect();
    null.sort_by(|a, b| a.total_cmp(b));

    let mut sorted_observed: Vec<f64> = observed.iter().copied().filter(|p| !p.is_nan()).collect();
    sorted_observed.sort_by(|a, b| a.total_cmp(b));

    debug!(
        "Permutation FDR: {} null p-values from {} permutations",
        null.len(),
        n_permutations
    );

    let n_perm = n_permutations as f64;
    Ok(observed
        .iter()
        .map(|&p| {
            if p.is_nan() {
                return f64::NAN;
            }
            let n_null = null.partition_point(|&x| x <= p + NULL_TOLERANCE) as f64;
            let n_obs = sorted_observed.partition_point(|&x| x <= p) as f64;
            (n_null / n_perm / n_obs).clamp(p, 1.0)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recompute_constant(_: &[usize]) -> Vec<f64> {
        vec![0.5, 0.5, f64::NAN]
    }

    #[test]
    fn test_qvalues_bounds_and_nan() {
        let observed = [0.01, 0.6, f64::NAN];
        let q = permutation_fdr(&observed, 6, 20, 7, recompute_constant).unwrap();
        // no null p-value below 0.01
        assert_eq!(q[0], 0.01);
        // 40 null p-values at 0.5 over 20 permutations, 2 observed at or below 0.6
        assert_eq!(q[1], 1.0);
        assert!(q[2].is_nan());
    }

    #[test]
    fn test_seed_reproducibility() {
        let observed = [0.02, 0.3, 0.04];
        let recompute = |order: &[usize]| {
            order
                .iter()
                .take(3)
                .map(|&i| (i as f64 + 1.0) / 10.0)
                .collect::<Vec<f64>>()
        };
        let first = permutation_fdr(&observed, 8, 50, 42, recompute).unwrap();
        let second = permutation_fdr(&observed, 8, 50, 42, recompute).unwrap();
        assert_eq!(first, second);
        for (p, q) in observed.iter().zip(&first) {
            assert!(q >= p && *q <= 1.0);
        }
    }

    #[test]
    fn test_zero_permutations_rejected() {
        assert!(permutation_fdr(&[0.1], 4, 0, 1, recompute_constant).is_err());
    }
}
