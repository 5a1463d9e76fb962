use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::AnalysisError;

pub mod permutation;

pub use permutation::permutation_fdr;

/// Multiple testing correction methods to control for false positives
/// when performing many statistical tests simultaneously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CorrectionMethod {
    #[serde(rename = "bonferroni")]
    Bonferroni,
    #[serde(rename = "sidak")]
    Sidak,
    #[serde(rename = "holm")]
    Holm,
    #[serde(rename = "holm-sidak")]
    HolmSidak,
    #[serde(rename = "simes-hochberg")]
    SimesHochberg,
    #[default]
    #[serde(rename = "fdr_bh")]
    BenjaminiHochberg,
    #[serde(rename = "fdr_by")]
    BenjaminiYekutieli,
}

impl CorrectionMethod {
    pub fn name(&self) -> &'static str {
        match self {
            CorrectionMethod::Bonferroni => "bonferroni",
            CorrectionMethod::Sidak => "sidak",
            CorrectionMethod::Holm => "holm",
            CorrectionMethod::HolmSidak => "holm-sidak",
            CorrectionMethod::SimesHochberg => "simes-hochberg",
            CorrectionMethod::BenjaminiHochberg => "fdr_bh",
            CorrectionMethod::BenjaminiYekutieli => "fdr_by",
        }
    }

    /// Adjust a family of valid (non-NaN) p-values.
    pub fn adjust(&self, p_values: &[f64]) -> Result<Vec<f64>> {
        match self {
            CorrectionMethod::Bonferroni => bonferroni_correction(p_values),
            CorrectionMethod::Sidak => sidak_correction(p_values),
            CorrectionMethod::Holm => holm_bonferroni_correction(p_values),
            CorrectionMethod::HolmSidak => holm_sidak_correction(p_values),
            CorrectionMethod::SimesHochberg => hochberg_correction(p_values),
            CorrectionMethod::BenjaminiHochberg => benjamini_hochberg_correction(p_values),
            CorrectionMethod::BenjaminiYekutieli => benjamini_yekutieli_correction(p_values),
        }
    }
}

impl fmt::Display for CorrectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CorrectionMethod {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bonferroni" | "b" => Ok(CorrectionMethod::Bonferroni),
            "sidak" | "s" => Ok(CorrectionMethod::Sidak),
            "holm" | "h" => Ok(CorrectionMethod::Holm),
            "holm-sidak" | "holm_sidak" | "hs" => Ok(CorrectionMethod::HolmSidak),
            "simes-hochberg" | "hochberg" | "sh" => Ok(CorrectionMethod::SimesHochberg),
            "fdr_bh" | "bh" | "benjamini-hochberg" | "indep" => {
                Ok(CorrectionMethod::BenjaminiHochberg)
            }
            "fdr_by" | "by" | "benjamini-yekutieli" | "negcorr" => {
                Ok(CorrectionMethod::BenjaminiYekutieli)
            }
            other => Err(AnalysisError::InvalidConfig(format!(
                "unknown correction method '{}'",
                other
            ))),
        }
    }
}

/// Adjusted p-values and rejection decisions for one family of tests.
///
/// Entries whose input p-value was NaN keep `NaN` / `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectedPValues {
    pub padj: Vec<f64>,
    pub rejected: Vec<Option<bool>>,
}

impl CorrectedPValues {
    pub fn n_rejected(&self) -> usize {
        self.rejected.iter().filter(|r| **r == Some(true)).count()
    }
}

/// Correct one family of p-values, leaving NaN entries out of the family.
///
/// The adjusted values of the valid entries are exactly those obtained by correcting
/// the valid entries alone. `rejected` is `padj <= alpha`.
pub fn correct_pvalues(
    p_values: &[f64],
    alpha: f64,
    method: CorrectionMethod,
) -> Result<CorrectedPValues> {
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(AnalysisError::InvalidConfig(format!(
            "alpha must be within (0, 1), got {}",
            alpha
        ))
        .into());
    }
    if let Some((i, p)) = p_values
        .iter()
        .enumerate()
        .find(|(_, p)| !p.is_nan() && !(0.0..=1.0).contains(*p))
    {
        return Err(AnalysisError::InvalidInput(format!(
            "invalid p-value at index {}: {}",
            i, p
        ))
        .into());
    }

    let valid: Vec<usize> = (0..p_values.len())
        .filter(|&i| !p_values[i].is_nan())
        .collect();
    let mut padj = vec![f64::NAN; p_values.len()];
    let mut rejected = vec![None; p_values.len()];

    if !valid.is_empty() {
        let family: Vec<f64> = valid.iter().map(|&i| p_values[i]).collect();
        let adjusted = method.adjust(&family)?;
        for (&i, q) in valid.iter().zip(adjusted) {
            padj[i] = q;
            rejected[i] = Some(q <= alpha);
        }
    }

    Ok(CorrectedPValues { padj, rejected })
}

fn validate(p_values: &[f64]) -> Result<()> {
    if p_values.is_empty() {
        return Err(AnalysisError::InvalidInput("empty p-value array".into()).into());
    }
    for (i, &p) in p_values.iter().enumerate() {
        if !(0.0..=1.0).contains(&p) {
            return Err(
                AnalysisError::InvalidInput(format!("invalid p-value at index {}: {}", i, p)).into(),
            );
        }
    }
    Ok(())
}

fn ascending_order(p_values: &[f64]) -> Vec<(usize, f64)> {
    let mut indexed: Vec<(usize, f64)> = p_values.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
    indexed
}

/// Step-down adjustment: running maximum of `factor(rank) * p` from the smallest p.
fn step_down<F>(p_values: &[f64], adjust: F) -> Vec<f64>
where
    F: Fn(usize, f64) -> f64,
{
    let mut adjusted = vec![0.0; p_values.len()];
    let mut running_max: f64 = 0.0;
    for (rank, (idx, p)) in ascending_order(p_values).into_iter().enumerate() {
        running_max = running_max.max(adjust(rank, p).min(1.0));
        adjusted[idx] = running_max;
    }
    adjusted
}

/// Step-up adjustment: running minimum of `factor(rank) * p` from the largest p.
fn step_up<F>(p_values: &[f64], adjust: F) -> Vec<f64>
where
    F: Fn(usize, f64) -> f64,
{
    let sorted = ascending_order(p_values);
    let mut adjusted = vec![0.0; p_values.len()];
    let mut running_min: f64 = 1.0;
    for rank in (0..sorted.len()).rev() {
        let (idx, p) = sorted[rank];
        running_min = running_min.min(adjust(rank, p).min(1.0));
        adjusted[idx] = running_min;
    }
    adjusted
}

/// Apply Bonferroni correction to p-values
///
/// Bonferroni correction is a simple but conservative method that multiplies
/// each p-value by the number of tests.
///
/// # Arguments
/// * `p_values` - A slice of p-values to adjust
///
/// # Returns
/// * `Result<Vec<f64>>` - Vector of adjusted p-values
pub fn bonferroni_correction(p_values: &[f64]) -> Result<Vec<f64>> {
    validate(p_values)?;
    let n = p_values.len() as f64;
    Ok(p_values.iter().map(|&p| (p * n).min(1.0)).collect())
}

/// Apply Šidák correction, `1 - (1 - p)^n`.
pub fn sidak_correction(p_values: &[f64]) -> Result<Vec<f64>> {
    validate(p_values)?;
    let n = p_values.len() as f64;
    Ok(p_values
        .iter()
        .map(|&p| (1.0 - (1.0 - p).powf(n)).min(1.0))
        .collect())
}

/// Apply Benjamini-Hochberg (BH) procedure for controlling false discovery rate
///
/// The BH procedure controls the false discovery rate (FDR), which is the expected
/// proportion of false positives among all rejected null hypotheses.
///
/// # Arguments
/// * `p_values` - A slice of p-values to adjust
///
/// # Returns
/// * `Result<Vec<f64>>` - Vector of adjusted p-values
pub fn benjamini_hochberg_correction(p_values: &[f64]) -> Result<Vec<f64>> {
    validate(p_values)?;
    let n = p_values.len() as f64;
    Ok(step_up(p_values, |rank, p| p * n / (rank + 1) as f64))
}

/// Apply Benjamini-Yekutieli (BY) procedure for controlling false discovery rate under dependence
///
/// The BY procedure is a more conservative variant of the BH procedure that is valid
/// under arbitrary dependence structures among the tests.
pub fn benjamini_yekutieli_correction(p_values: &[f64]) -> Result<Vec<f64>> {
    validate(p_values)?;
    let n = p_values.len();
    let c_n: f64 = (1..=n).map(|i| 1.0 / i as f64).sum();
    let n = n as f64;
    Ok(step_up(p_values, |rank, p| p * c_n * n / (rank + 1) as f64))
}

/// Apply Holm-Bonferroni (step-down) method for controlling family-wise error rate
///
/// The Holm procedure is a step-down method that controls the family-wise error rate (FWER)
/// and is uniformly more powerful than the standard Bonferroni correction.
pub fn holm_bonferroni_correction(p_values: &[f64]) -> Result<Vec<f64>> {
    validate(p_values)?;
    let n = p_values.len();
    Ok(step_down(p_values, |rank, p| p * (n - rank) as f64))
}

/// Step-down Šidák (Holm-Šidák) adjustment.
pub fn holm_sidak_correction(p_values: &[f64]) -> Result<Vec<f64>> {
    validate(p_values)?;
    let n = p_values.len();
    Ok(step_down(p_values, |rank, p| {
        1.0 - (1.0 - p).powf((n - rank) as f64)
    }))
}

/// Apply Hochberg's step-up method for controlling family-wise error rate
///
/// Hochberg's procedure is a step-up method that controls the family-wise error rate (FWER)
/// and is more powerful than Holm's procedure when all tests are independent.
pub fn hochberg_correction(p_values: &[f64]) -> Result<Vec<f64>> {
    validate(p_values)?;
    let n = p_values.len();
    Ok(step_up(p_values, |rank, p| p * (n - rank) as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assert_vec_relative_eq(a: &[f64], b: &[f64], epsilon: f64) {
        assert_eq!(a.len(), b.len(), "Vectors have different lengths");
        for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
            if (x - y).abs() > epsilon {
                panic!("Vectors differ at index {}: {} != {}", i, x, y);
            }
        }
    }

    #[test]
    fn test_bonferroni() {
        let p_values = vec![0.01, 0.02, 0.03, 0.1, 0.2];
        let expected = vec![0.05, 0.1, 0.15, 0.5, 1.0];
        let adjusted = bonferroni_correction(&p_values).unwrap();
        assert_vec_relative_eq(&adjusted, &expected, 1e-10);
    }

    #[test]
    fn test_benjamini_hochberg_empty_input() {
        let err = benjamini_hochberg_correction(&[]).unwrap_err();
        assert_eq!(
            AnalysisError::kind_of(&err),
            Some(&AnalysisError::InvalidInput("empty p-value array".into()))
        );
    }

    #[test]
    fn test_benjamini_hochberg_invalid_pvalues() {
        let err = benjamini_hochberg_correction(&[0.01, -0.5, 0.03]).unwrap_err();
        assert!(err.to_string().contains("invalid p-value at index 1"));
        assert!(matches!(
            AnalysisError::kind_of(&err),
            Some(AnalysisError::InvalidInput(_))
        ));

        let result = benjamini_hochberg_correction(&[0.01, 1.5, 0.03]);
        assert!(result.is_err());
    }

    #[test]
    fn test_benjamini_hochberg_identical_pvalues() {
        let adjusted = benjamini_hochberg_correction(&[0.05, 0.05, 0.05]).unwrap();
        for a in adjusted {
            assert_relative_eq!(a, 0.05, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_benjamini_hochberg_unordered_pvalues() {
        let p_values = vec![0.05, 0.01, 0.1, 0.04, 0.02];
        let expected = vec![0.0625, 0.05, 0.1, 0.0625, 0.05];
        let adjusted = benjamini_hochberg_correction(&p_values).unwrap();
        assert_vec_relative_eq(&adjusted, &expected, 1e-10);
    }

    #[test]
    fn test_benjamini_hochberg_real_example() {
        let pvalues = vec![0.1, 0.2, 0.3, 0.4, 0.1];
        let expected = [0.25, 0.3333333333333333, 0.375, 0.4, 0.25];
        let adjusted = benjamini_hochberg_correction(&pvalues).unwrap();
        assert_vec_relative_eq(&adjusted, &expected, 1e-10);
    }

    #[test]
    fn test_benjamini_yekutieli() {
        // c(3) = 1 + 1/2 + 1/3 = 11/6
        let adjusted = benjamini_yekutieli_correction(&[0.01, 0.02, 0.03]).unwrap();
        let c = 11.0 / 6.0;
        assert_vec_relative_eq(&adjusted, &[0.03 * c, 0.03 * c, 0.03 * c], 1e-10);
    }

    #[test]
    fn test_holm_bonferroni() {
        // statsmodels multipletests(..., method="holm")
        let adjusted = holm_bonferroni_correction(&[0.01, 0.02, 0.03]).unwrap();
        assert_vec_relative_eq(&adjusted, &[0.03, 0.04, 0.04], 1e-10);

        let adjusted = holm_bonferroni_correction(&[0.04, 0.001, 0.03, 0.5]).unwrap();
        assert_vec_relative_eq(&adjusted, &[0.09, 0.004, 0.09, 0.5], 1e-10);
    }

    #[test]
    fn test_hochberg() {
        let adjusted = hochberg_correction(&[0.01, 0.02, 0.03]).unwrap();
        assert_vec_relative_eq(&adjusted, &[0.03, 0.03, 0.03], 1e-10);

        let adjusted = hochberg_correction(&[0.04, 0.001, 0.03, 0.5]).unwrap();
        assert_vec_relative_eq(&adjusted, &[0.08, 0.004, 0.08, 0.5], 1e-10);
    }

    #[test]
    fn test_sidak_family() {
        let adjusted = sidak_correction(&[0.01, 0.5]).unwrap();
        assert_relative_eq!(adjusted[0], 1.0 - 0.99_f64.powi(2), epsilon = 1e-12);
        assert_relative_eq!(adjusted[1], 0.75, epsilon = 1e-12);

        let adjusted = holm_sidak_correction(&[0.01, 0.5]).unwrap();
        assert_relative_eq!(adjusted[0], 1.0 - 0.99_f64.powi(2), epsilon = 1e-12);
        assert_relative_eq!(adjusted[1], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_correct_pvalues_excludes_nan() {
        let with_nan = correct_pvalues(
            &[0.05, f64::NAN, 0.01, 0.1, f64::NAN, 0.04, 0.02],
            0.05,
            CorrectionMethod::BenjaminiHochberg,
        )
        .unwrap();
        let without = correct_pvalues(
            &[0.05, 0.01, 0.1, 0.04, 0.02],
            0.05,
            CorrectionMethod::BenjaminiHochberg,
        )
        .unwrap();

        assert!(with_nan.padj[1].is_nan() && with_nan.padj[4].is_nan());
        assert_eq!(with_nan.rejected[1], None);
        let kept: Vec<f64> = with_nan.padj.iter().copied().filter(|p| !p.is_nan()).collect();
        assert_eq!(kept, without.padj);
        assert_eq!(without.rejected, vec![Some(false), Some(true), Some(false), Some(false), Some(true)]);
        assert_eq!(without.n_rejected(), 2);
    }

    #[test]
    fn test_correct_pvalues_all_nan_and_invalid() {
        let result = correct_pvalues(&[f64::NAN, f64::NAN], 0.05, CorrectionMethod::Holm).unwrap();
        assert!(result.padj.iter().all(|p| p.is_nan()));
        assert!(result.rejected.iter().all(|r| r.is_none()));

        let err = correct_pvalues(&[0.5, 1.2], 0.05, CorrectionMethod::Holm).unwrap_err();
        assert!(matches!(AnalysisError::kind_of(&err), Some(AnalysisError::InvalidInput(_))));
        assert!(correct_pvalues(&[0.5], 1.5, CorrectionMethod::Holm).is_err());
    }

    #[test]
    fn test_monotone_for_every_method() {
        let p_values = [0.001, 0.2, 0.013, 0.04, 0.9, 0.04, 0.5];
        for method in [
            CorrectionMethod::Bonferroni,
            CorrectionMethod::Sidak,
            CorrectionMethod::Holm,
            CorrectionMethod::HolmSidak,
            CorrectionMethod::SimesHochberg,
            CorrectionMethod::BenjaminiHochberg,
            CorrectionMethod::BenjaminiYekutieli,
        ] {
            let result = correct_pvalues(&p_values, 0.05, method).unwrap();
            for ((p, q), r) in p_values.iter().zip(&result.padj).zip(&result.rejected) {
                assert!(q >= p, "{}: {} < {}", method, q, p);
                assert!(*q <= 1.0);
                assert_eq!(r.unwrap(), *q <= 0.05);
            }
        }
    }

    #[test]
    fn test_method_names() {
        assert_eq!("fdr_bh".parse::<CorrectionMethod>().unwrap(), CorrectionMethod::BenjaminiHochberg);
        assert_eq!("holm-sidak".parse::<CorrectionMethod>().unwrap(), CorrectionMethod::HolmSidak);
        assert!("storey".parse::<CorrectionMethod>().is_err());
        assert_eq!(CorrectionMethod::default().to_string(), "fdr_bh");
        let json = serde_json::to_string(&CorrectionMethod::SimesHochberg).unwrap();
        assert_eq!(json, "\"simes-hochberg\"");
    }
}
