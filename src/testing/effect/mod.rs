use single_utilities::traits::FloatOps;

use crate::error::AnalysisError;
use crate::testing::utils::mean_std;

fn to_f64_vec<T: FloatOps>(values: &[T]) -> Vec<f64> {
    values
        .iter()
        .map(|v| v.to_f64().unwrap_or(f64::NAN))
        .collect()
}

/// Fold change of group 2 over group 1 and its log2.
///
/// With `is_logged` the means are already on a log2 scale, so the log2 fold change
/// is their difference and the linear fold change is recovered as `2^lfc`.
/// Positive log2 fold change means group 2 is higher.
pub fn fold_change(mean1: f64, mean2: f64, is_logged: bool) -> (f64, f64) {
    if is_logged {
        let log2_fc = mean2 - mean1;
        (log2_fc.exp2(), log2_fc)
    } else {
        let fc = mean2 / mean1;
        (fc, fc.log2())
    }
}

/// Calculate Cohen's d effect size, `(mean2 - mean1) / pooled sd`
pub fn calculate_cohens_d<T>(group1: &[T], group2: &[T]) -> anyhow::Result<f64>
where
    T: FloatOps,
{
    if group1.len() < 2 || group2.len() < 2 {
        return Err(AnalysisError::InvalidInput(
            "Each group must have at least 2 samples for Cohen's d".into(),
        )
        .into());
    }

    let (mean1, sd1) = mean_std(&to_f64_vec(group1));
    let (mean2, sd2) = mean_std(&to_f64_vec(group2));

    // Calculate pooled standard deviation
    let n1 = group1.len() as f64;
    let n2 = group2.len() as f64;
    let pooled_sd =
        (((n1 - 1.0) * sd1 * sd1 + (n2 - 1.0) * sd2 * sd2) / (n1 + n2 - 2.0)).sqrt();

    Ok((mean2 - mean1) / pooled_sd)
}

/// Calculate Hedge's g (bias-corrected effect size)
pub fn calculate_hedges_g<T>(group1: &[T], group2: &[T]) -> anyhow::Result<f64>
where
    T: FloatOps,
{
    let d = calculate_cohens_d(group1, group2)?;

    // Correction factor J
    let n = (group1.len() + group2.len()) as f64;
    let j = 1.0 - 3.0 / (4.0 * n - 9.0);

    Ok(j * d)
}

/// Cohen's d_z for paired observations, `mean(group2 - group1) / sd(group2 - group1)`
pub fn calculate_cohens_dz<T>(group1: &[T], group2: &[T]) -> anyhow::Result<f64>
where
    T: FloatOps,
{
    if group1.len() != group2.len() || group1.len() < 2 {
        return Err(AnalysisError::InvalidInput(
            "Cohen's d_z needs at least 2 complete pairs".into(),
        )
        .into());
    }
    let diffs: Vec<f64> = to_f64_vec(group2)
        .iter()
        .zip(to_f64_vec(group1))
        .map(|(b, a)| b - a)
        .collect();
    let (mean, sd) = mean_std(&diffs);
    Ok(mean / sd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    const CLEAR_1: [f64; 3] = [2.0, 2.2, 1.8];
    const CLEAR_2: [f64; 3] = [8.0, 7.5, 8.5];

    #[test]
    fn test_fold_change_orientation() {
        let (fc, lfc) = fold_change(2.0, 8.0, false);
        assert_relative_eq!(fc, 4.0);
        assert_relative_eq!(lfc, 2.0);

        let (fc, lfc) = fold_change(5.0, 3.0, true);
        assert_relative_eq!(lfc, -2.0);
        assert_relative_eq!(fc, 0.25);

        // ratio of non-positive means has no log
        let (_, lfc) = fold_change(-2.0, 8.0, false);
        assert!(lfc.is_nan());
    }

    #[test]
    fn test_cohens_d() {
        let d = calculate_cohens_d(&CLEAR_1, &CLEAR_2).unwrap();
        assert_abs_diff_eq!(d, 15.76, epsilon = 0.01);

        let d = calculate_cohens_d(&[5.0, 5.1, 4.9], &[5.0, 5.1, 4.9]).unwrap();
        assert_abs_diff_eq!(d, 0.0, epsilon = 1e-12);

        // negative values keep magnitude and flip sign
        let d = calculate_cohens_d(&CLEAR_2.map(|v| -v), &CLEAR_1.map(|v| -v)).unwrap();
        assert_abs_diff_eq!(d, 15.76, epsilon = 0.01);
    }

    #[test]
    fn test_hedges_g() {
        let d = calculate_cohens_d(&CLEAR_1, &CLEAR_2).unwrap();
        let g = calculate_hedges_g(&CLEAR_1, &CLEAR_2).unwrap();
        // J = 1 - 3 / (4 * 6 - 9)
        assert_relative_eq!(g / d, 0.8, epsilon = 1e-12);
    }

    #[test]
    fn test_cohens_dz() {
        let dz = calculate_cohens_dz(&CLEAR_1, &CLEAR_2).unwrap();
        assert_relative_eq!(dz, 6.0 / 0.7, epsilon = 1e-10);
    }

    #[test]
    fn test_small_groups() {
        assert!(calculate_cohens_d(&[1.0], &[3.0, 4.0, 5.0]).is_err());
        assert!(calculate_hedges_g(&[1.0, 2.0, 3.0], &[3.0]).is_err());
        assert!(calculate_cohens_dz(&[1.0, 2.0], &[3.0]).is_err());
    }

    #[test]
    fn test_zero_variance() {
        let d = calculate_cohens_d(&[5.0, 5.0, 5.0], &[10.0, 10.0, 10.0]).unwrap();
        assert!(d.is_infinite());
    }
}
