//! Differential regulation between the levels of a grouping variable.
//!
//! Every feature is compared between every unordered pair of levels (sorted
//! lexicographically), with an omnibus test per feature when there are more than
//! two levels or when covariates are adjusted for. P-values are corrected once per
//! group pair across features and once across features for the omnibus family.

use std::collections::BTreeMap;
use std::ops::Deref;

use anyhow::Result;
use log::{debug, info};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::Serialize;

mod config;

pub use config::DifferentialConfig;

use crate::data::{AlignedData, MeasurementTable};
use crate::error::AnalysisError;
use crate::testing::correction::{CorrectedPValues, CorrectionMethod, correct_pvalues, permutation_fdr};
use crate::testing::effect::{calculate_cohens_dz, calculate_hedges_g, fold_change};
use crate::testing::inference::TableStatTests;
use crate::testing::inference::distribution::shapiro_wilk;
use crate::testing::inference::linear_model::{nested_f_test, ols};
use crate::testing::inference::nonparametric::{
    friedman_test, kruskal_wallis, mann_whitney, wilcoxon_signed_rank,
};
use crate::testing::inference::parametric::{
    levene_test, one_way_anova, paired_t_test, repeated_measures_anova, t_test,
};
use crate::testing::utils::{
    enumerate_pairs, extract_levels, get_group_indices, mean_std,
    observed_values,
};
use crate::testing::{Alternative, TTestType, TestKind, TestResult};

/// One feature compared between two levels.
///
/// `statistic` (and `coefficient` for ANCOVA) are signed as group1 - group2, while
/// effect sizes and fold changes are oriented group2 versus group1.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRecord {
    pub feature: String,
    pub group1: String,
    pub group2: String,
    pub n1: usize,
    pub n2: usize,
    pub mean1: f64,
    pub std1: f64,
    pub mean2: f64,
    pub std2: f64,
    pub statistic: f64,
    pub pvalue: f64,
    pub degrees_of_freedom: f64,
    pub effect_size: f64,
    pub fold_change: f64,
    pub log2_fold_change: f64,
    pub test: TestKind,
    pub paired: bool,
    pub parametric: bool,
    /// Adjusted mean difference (ANCOVA only).
    pub coefficient: Option<f64>,
    pub standard_error: Option<f64>,
    /// 95% confidence interval of the coefficient.
    pub confidence_interval: Option<(f64, f64)>,
}

impl ComparisonRecord {
    pub fn is_testable(&self) -> bool {
        !self.pvalue.is_nan()
    }
}

/// Per-feature test across all levels at once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OmnibusRecord {
    pub feature: String,
    pub statistic: f64,
    pub df1: f64,
    pub df2: f64,
    pub pvalue: f64,
    pub test: TestKind,
}

/// A record with its adjusted p-value. Untestable records carry `NaN` / `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Corrected<R> {
    #[serde(flatten)]
    pub record: R,
    pub padj: f64,
    pub rejected: Option<bool>,
}

impl<R> Deref for Corrected<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.record
    }
}

/// Output of [`run_differential`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegulationResult {
    pub group_column: String,
    pub levels: Vec<String>,
    pub pairs: Vec<(String, String)>,
    /// Sorted by feature, then pair order.
    pub comparisons: Vec<Corrected<ComparisonRecord>>,
    /// Sorted by feature. Empty for two unadjusted levels.
    pub omnibus: Vec<Corrected<OmnibusRecord>>,
    pub alpha: f64,
    pub correction: CorrectionMethod,
    pub is_logged: bool,
}

impl RegulationResult {
    /// Records of one group pair, in feature order.
    pub fn pair_records<'a>(
        &'a self,
        group1: &'a str,
        group2: &'a str,
    ) -> impl Iterator<Item = &'a Corrected<ComparisonRecord>> + 'a {
        self.comparisons
            .iter()
            .filter(move |r| r.group1 == group1 && r.group2 == group2)
    }

    pub fn n_rejected(&self) -> usize {
        self.comparisons
            .iter()
            .filter(|r| r.rejected == Some(true))
            .count()
    }
}

/// Equal-variance check of one feature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VarianceCheck {
    pub feature: String,
    pub statistic: f64,
    pub pvalue: f64,
    /// `pvalue > alpha`; `None` when the test is undefined.
    pub equal_variance: Option<bool>,
}

/// Shapiro-Wilk normality check of one feature within one group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalityCheck {
    pub group: String,
    pub feature: String,
    pub statistic: f64,
    pub pvalue: f64,
    /// `pvalue > alpha`; `None` when the test is undefined.
    pub normal: Option<bool>,
}

struct FeatureComparison {
    pairs: Vec<ComparisonRecord>,
    omnibus: Option<OmnibusRecord>,
}

struct Design {
    levels: Vec<String>,
    /// Row indices of each level.
    groups: Vec<Vec<usize>>,
    /// Level of each row.
    row_level: Vec<usize>,
    pairs: Vec<(usize, usize)>,
    /// For paired designs: subject id → row, per level.
    subjects: Option<Vec<BTreeMap<String, usize>>>,
    /// Expanded covariate columns (dummy coded when categorical), NaN = missing.
    covariates: Vec<Vec<f64>>,
}

impl Design {
    fn prepare(aligned: &AlignedData, config: &DifferentialConfig) -> Result<(AlignedData, Design)> {
        aligned.check_sample_order()?;
        let labels = aligned.metadata.labels(&config.group_column)?;
        for covariate in &config.covariates {
            if aligned.table.feature_index(covariate).is_some() {
                return Err(AnalysisError::ColumnCollision(covariate.clone()).into());
            }
            aligned.metadata.require(covariate)?;
        }
        if config.paired {
            if let Some(subject) = &config.subject_column {
                aligned.metadata.require(subject)?;
            }
        }

        let levels = extract_levels(&labels);
        if levels.len() < 2 {
            return Err(AnalysisError::InsufficientGroups {
                column: config.group_column.clone(),
                found: levels.len(),
            }
            .into());
        }

        let data = if labels.iter().any(|l| l.is_none()) {
            aligned.drop_missing_in(&config.group_column)?
        } else {
            aligned.clone()
        };
        let labels = data.metadata.labels(&config.group_column)?;
        let groups = get_group_indices(&labels, &levels);
        let mut row_level = vec![0; labels.len()];
        for (level, rows) in groups.iter().enumerate() {
            for &r in rows {
                row_level[r] = level;
            }
        }

        let subjects = match (&config.subject_column, config.paired) {
            (Some(subject), true) => {
                let ids = data.metadata.labels(subject)?;
                let mut per_level = vec![BTreeMap::new(); levels.len()];
                for (row, id) in ids.into_iter().enumerate() {
                    let Some(id) = id else { continue };
                    if per_level[row_level[row]].insert(id.clone(), row).is_some() {
                        return Err(AnalysisError::InvalidInput(format!(
                            "subject '{}' has more than one sample in level '{}'",
                            id, levels[row_level[row]]
                        ))
                        .into());
                    }
                }
                Some(per_level)
            }
            _ => None,
        };

        let mut covariates = Vec::new();
        for name in &config.covariates {
            covariates.extend(data.metadata.require(name)?.design_columns());
        }

        let pairs = enumerate_pairs(levels.len());
        Ok((
            data,
            Design {
                levels,
                groups,
                row_level,
                pairs,
                subjects,
                covariates,
            },
        ))
    }
}

struct Comparator<'a> {
    table: &'a MeasurementTable,
    design: &'a Design,
    config: &'a DifferentialConfig,
}

impl Comparator<'_> {
    fn compare(&self, feature_idx: usize) -> FeatureComparison {
        if !self.design.covariates.is_empty() || !self.config.covariates.is_empty() {
            self.compare_ancova(feature_idx)
        } else if self.design.subjects.is_some() {
            self.compare_paired(feature_idx)
        } else {
            self.compare_unpaired(feature_idx)
        }
    }

    fn feature(&self, feature_idx: usize) -> &str {
        &self.table.features()[feature_idx]
    }

    fn record(
        &self,
        feature_idx: usize,
        pair: (usize, usize),
        x: &[f64],
        y: &[f64],
        result: &TestResult<f64>,
        effect_size: f64,
        test: TestKind,
    ) -> ComparisonRecord {
        let (mean1, std1) = mean_std(x);
        let (mean2, std2) = mean_std(y);
        let (fc, lfc) = fold_change(mean1, mean2, self.config.is_logged);
        ComparisonRecord {
            feature: self.feature(feature_idx).to_string(),
            group1: self.design.levels[pair.0].clone(),
            group2: self.design.levels[pair.1].clone(),
            n1: x.len(),
            n2: y.len(),
            mean1,
            std1,
            mean2,
            std2,
            statistic: result.statistic,
            pvalue: result.p_value,
            degrees_of_freedom: result.degrees_of_freedom.unwrap_or(f64::NAN),
            effect_size,
            fold_change: fc,
            log2_fold_change: lfc,
            test,
            paired: self.config.paired,
            parametric: self.config.parametric,
            coefficient: None,
            standard_error: None,
            confidence_interval: None,
        }
    }

    fn omnibus(&self, feature_idx: usize, result: TestResult<f64>, test: TestKind) -> OmnibusRecord {
        OmnibusRecord {
            feature: self.feature(feature_idx).to_string(),
            statistic: result.statistic,
            df1: result.degrees_of_freedom.unwrap_or(f64::NAN),
            df2: result.metadata.get("df2").copied().unwrap_or(f64::NAN),
            pvalue: result.p_value,
            test,
        }
    }

    fn compare_unpaired(&self, feature_idx: usize) -> FeatureComparison {
        let column = self.table.column(feature_idx);
        let values: Vec<Vec<f64>> = self
            .design
            .groups
            .iter()
            .map(|rows| observed_values(column, rows))
            .collect();

        let pairs = self
            .design
            .pairs
            .iter()
            .map(|&(a, b)| {
                let (x, y) = (&values[a], &values[b]);
                let testable = x.len() >= 2 && y.len() >= 2;
                let (result, effect, test) = if self.config.parametric {
                    let test = match self.config.t_test_type {
                        TTestType::Student => TestKind::StudentT,
                        TTestType::Welch => TestKind::WelchT,
                    };
                    let result = t_test(x, y, self.config.t_test_type);
                    let effect = calculate_hedges_g(x, y).unwrap_or(f64::NAN);
                    (result, effect, test)
                } else {
                    let result = if testable {
                        mann_whitney(x, y, Alternative::TwoSided)
                    } else {
                        TestResult::untestable()
                    };
                    let effect = result.effect_size.unwrap_or(f64::NAN);
                    (result, effect, TestKind::MannWhitney)
                };
                self.record(feature_idx, (a, b), x, y, &result, effect, test)
            })
            .collect();

        let omnibus = (self.design.levels.len() > 2).then(|| {
            if self.config.parametric {
                self.omnibus(feature_idx, one_way_anova(&values), TestKind::Anova)
            } else {
                self.omnibus(feature_idx, kruskal_wallis(&values), TestKind::KruskalWallis)
            }
        });

        FeatureComparison { pairs, omnibus }
    }

    fn compare_paired(&self, feature_idx: usize) -> FeatureComparison {
        let column = self.table.column(feature_idx);
        let Some(subjects) = &self.design.subjects else {
            return self.compare_unpaired(feature_idx);
        };
        let observed: Vec<BTreeMap<&str, f64>> = subjects
            .iter()
            .map(|rows| {
                rows.iter()
                    .map(|(id, &r)| (id.as_str(), column[r]))
                    .filter(|(_, v)| !v.is_nan())
                    .collect()
            })
            .collect();

        let pairs = self
            .design
            .pairs
            .iter()
            .map(|&(a, b)| {
                let (x, y): (Vec<f64>, Vec<f64>) = observed[a]
                    .iter()
                    .filter_map(|(id, &va)| observed[b].get(id).map(|&vb| (va, vb)))
                    .unzip();
                let (result, effect, test) = if self.config.parametric {
                    let result = paired_t_test(&x, &y);
                    let effect = calculate_cohens_dz(&x, &y).unwrap_or(f64::NAN);
                    (result, effect, TestKind::PairedT)
                } else {
                    let result = wilcoxon_signed_rank(&x, &y);
                    let effect = result.effect_size.unwrap_or(f64::NAN);
                    (result, effect, TestKind::WilcoxonSignedRank)
                };
                self.record(feature_idx, (a, b), &x, &y, &result, effect, test)
            })
            .collect();

        let omnibus = (self.design.levels.len() > 2).then(|| {
            let complete: Vec<Vec<f64>> = observed[0]
                .keys()
                .filter_map(|id| observed.iter().map(|level| level.get(id).copied()).collect())
                .collect();
            if self.config.parametric {
                self.omnibus(
                    feature_idx,
                    repeated_measures_anova(&complete),
                    TestKind::RepeatedMeasuresAnova,
                )
            } else {
                self.omnibus(feature_idx, friedman_test(&complete), TestKind::Friedman)
            }
        });

        FeatureComparison { pairs, omnibus }
    }

    /// One OLS fit per feature: intercept, treatment-coded groups (first level is the
    /// reference) and each covariate once.
    fn compare_ancova(&self, feature_idx: usize) -> FeatureComparison {
        let column = self.table.column(feature_idx);
        let covariates = &self.design.covariates;
        let rows: Vec<usize> = (0..self.table.n_samples())
            .filter(|&r| !column[r].is_nan() && covariates.iter().all(|c| !c[r].is_nan()))
            .collect();

        let k = self.design.levels.len();
        let n_full = k + covariates.len();
        let x_full = DMatrix::from_fn(rows.len(), n_full, |i, j| {
            let r = rows[i];
            match j {
                0 => 1.0,
                j if j < k => f64::from(self.design.row_level[r] == j),
                j => covariates[j - k][r],
            }
        });
        let x_reduced = DMatrix::from_fn(rows.len(), 1 + covariates.len(), |i, j| {
            if j == 0 { 1.0 } else { covariates[j - 1][rows[i]] }
        });
        let y = DVector::from_iterator(rows.len(), rows.iter().map(|&r| column[r]));

        let full = ols(&x_full, &y);
        let reduced = ols(&x_reduced, &y);

        let values: Vec<Vec<f64>> = (0..k)
            .map(|level| {
                rows.iter()
                    .filter(|&&r| self.design.row_level[r] == level)
                    .map(|&r| column[r])
                    .collect()
            })
            .collect();

        let pairs = self
            .design
            .pairs
            .iter()
            .map(|&(a, b)| {
                let (x, y) = (&values[a], &values[b]);
                let result = match &full {
                    Some(fit) if x.len() >= 2 && y.len() >= 2 => {
                        let mut c = DVector::zeros(n_full);
                        if a > 0 {
                            c[a] += 1.0;
                        }
                        if b > 0 {
                            c[b] -= 1.0;
                        }
                        fit.contrast(&c)
                    }
                    _ => TestResult::untestable(),
                };
                let effect = calculate_hedges_g(x, y).unwrap_or(f64::NAN);
                let mut record =
                    self.record(feature_idx, (a, b), x, y, &result, effect, TestKind::Ancova);
                record.coefficient = Some(result.effect_size.unwrap_or(f64::NAN));
                record.standard_error = Some(result.standard_error.unwrap_or(f64::NAN));
                record.confidence_interval =
                    Some(result.confidence_interval.unwrap_or((f64::NAN, f64::NAN)));
                record
            })
            .collect();

        let group_test = match (&full, &reduced) {
            (Some(full), Some(reduced)) => nested_f_test(full, reduced),
            _ => TestResult::untestable(),
        };

        FeatureComparison {
            pairs,
            omnibus: Some(self.omnibus(feature_idx, group_test, TestKind::Ancova)),
        }
    }
}

fn rejected_at(padj: &[f64], alpha: f64) -> Vec<Option<bool>> {
    padj.iter()
        .map(|q| if q.is_nan() { None } else { Some(*q <= alpha) })
        .collect()
}

/// Compare every feature between every pair of group levels.
///
/// # Errors
///
/// `MissingColumn` when the group, a covariate or the subject column is absent,
/// `InsufficientGroups` when fewer than two levels remain after removing samples
/// with a missing group, `ColumnCollision` when a covariate is also the group column
/// or a feature, `InvalidConfig` for inconsistent options.
pub fn run_differential(aligned: &AlignedData, config: &DifferentialConfig) -> Result<RegulationResult> {
    config.validate()?;
    let (data, design) = Design::prepare(aligned, config)?;
    let table = &data.table;

    info!(
        "Comparing {} feature(s) across {} level(s) of '{}' ({} pair(s))",
        table.n_features(),
        design.levels.len(),
        config.group_column,
        design.pairs.len()
    );

    let comparator = Comparator {
        table,
        design: &design,
        config,
    };
    let per_feature: Vec<FeatureComparison> = (0..table.n_features())
        .into_par_iter()
        .map(|j| comparator.compare(j))
        .collect();

    let untestable = per_feature
        .iter()
        .flat_map(|f| &f.pairs)
        .filter(|r| !r.is_testable())
        .count();
    if untestable > 0 {
        debug!("{} comparison(s) could not be tested", untestable);
    }

    let mut pair_corrections: Vec<CorrectedPValues> = Vec::with_capacity(design.pairs.len());
    for (q, &(a, b)) in design.pairs.iter().enumerate() {
        let pvalues: Vec<f64> = per_feature.iter().map(|f| f.pairs[q].pvalue).collect();
        let corrected = if config.permutations > 0 {
            let combined: Vec<usize> = design.groups[a]
                .iter()
                .chain(&design.groups[b])
                .copied()
                .collect();
            let n_a = design.groups[a].len();
            let recompute = |order: &[usize]| -> Vec<f64> {
                let g1: Vec<usize> = order[..n_a].iter().map(|&i| combined[i]).collect();
                let g2: Vec<usize> = order[n_a..].iter().map(|&i| combined[i]).collect();
                let results = if config.parametric {
                    table.t_test(&g1, &g2, config.t_test_type)
                } else {
                    table.mann_whitney_test(&g1, &g2, Alternative::TwoSided)
                };
                results.into_iter().map(|r| r.p_value).collect()
            };
            let padj = permutation_fdr(
                &pvalues,
                combined.len(),
                config.permutations,
                config.seed,
                recompute,
            )?;
            CorrectedPValues {
                rejected: rejected_at(&padj, config.alpha),
                padj,
            }
        } else {
            correct_pvalues(&pvalues, config.alpha, config.correction)?
        };
        pair_corrections.push(corrected);
    }

    let omnibus_rows: Vec<usize> = (0..per_feature.len())
        .filter(|&j| per_feature[j].omnibus.is_some())
        .collect();
    let omnibus_pvalues: Vec<f64> = omnibus_rows
        .iter()
        .filter_map(|&j| per_feature[j].omnibus.as_ref().map(|o| o.pvalue))
        .collect();
    let omnibus_correction = correct_pvalues(&omnibus_pvalues, config.alpha, config.correction)?;

    let mut order: Vec<usize> = (0..table.n_features()).collect();
    order.sort_by(|&i, &j| table.features()[i].cmp(&table.features()[j]));

    let mut comparisons = Vec::with_capacity(order.len() * design.pairs.len());
    for &j in &order {
        for (q, record) in per_feature[j].pairs.iter().enumerate() {
            comparisons.push(Corrected {
                record: record.clone(),
                padj: pair_corrections[q].padj[j],
                rejected: pair_corrections[q].rejected[j],
            });
        }
    }

    let mut omnibus: Vec<Corrected<OmnibusRecord>> = omnibus_rows
        .iter()
        .enumerate()
        .filter_map(|(pos, &j)| {
            per_feature[j].omnibus.clone().map(|record| Corrected {
                record,
                padj: omnibus_correction.padj[pos],
                rejected: omnibus_correction.rejected[pos],
            })
        })
        .collect();
    omnibus.sort_by(|a, b| a.feature.cmp(&b.feature));

    let result = RegulationResult {
        group_column: config.group_column.clone(),
        pairs: design
            .pairs
            .iter()
            .map(|&(a, b)| (design.levels[a].clone(), design.levels[b].clone()))
            .collect(),
        levels: design.levels,
        comparisons,
        omnibus,
        alpha: config.alpha,
        correction: config.correction,
        is_logged: config.is_logged,
    };
    info!(
        "{} of {} comparison(s) rejected at alpha {}",
        result.n_rejected(),
        result.comparisons.len(),
        config.alpha
    );
    Ok(result)
}

/// Levene (median-centred) test per feature across the levels of `group_column`.
pub fn check_equal_variances(
    aligned: &AlignedData,
    group_column: &str,
    alpha: f64,
) -> Result<Vec<VarianceCheck>> {
    aligned.check_sample_order()?;
    let labels = aligned.metadata.labels(group_column)?;
    let levels = extract_levels(&labels);
    if levels.len() < 2 {
        return Err(AnalysisError::InsufficientGroups {
            column: group_column.to_string(),
            found: levels.len(),
        }
        .into());
    }
    let groups = get_group_indices(&labels, &levels);
    let table = &aligned.table;

    Ok((0..table.n_features())
        .into_par_iter()
        .map(|j| {
            let column = table.column(j);
            let values: Vec<Vec<f64>> = groups.iter().map(|g| observed_values(column, g)).collect();
            let result = levene_test(&values);
            VarianceCheck {
                feature: table.features()[j].clone(),
                statistic: result.statistic,
                pvalue: result.p_value,
                equal_variance: result.is_valid().then_some(result.p_value > alpha),
            }
        })
        .collect())
}

/// Shapiro-Wilk test of every feature within every level of `group_column`.
///
/// Records are ordered by level, then feature. Groups with fewer than 3 observed
/// values, or constant ones, give NaN and `normal == None`.
pub fn check_normality(aligned: &AlignedData, group_column: &str, alpha: f64) -> Result<Vec<NormalityCheck>> {
    aligned.check_sample_order()?;
    let labels = aligned.metadata.labels(group_column)?;
    let levels = extract_levels(&labels);
    let groups = get_group_indices(&labels, &levels);
    let table = &aligned.table;

    let checks: Vec<NormalityCheck> = levels
        .iter()
        .zip(&groups)
        .flat_map(|(level, rows)| {
            (0..table.n_features())
                .into_par_iter()
                .map(|j| {
                    let result = shapiro_wilk(&observed_values(table.column(j), rows));
                    NormalityCheck {
                        group: level.clone(),
                        feature: table.features()[j].clone(),
                        statistic: result.statistic,
                        pvalue: result.p_value,
                        normal: result.is_valid().then_some(result.p_value > alpha),
                    }
                })
                .collect::<Vec<_>>()
        })
        .collect();

    debug!(
        "{} of {} group/feature check(s) reject normality at {}",
        checks.iter().filter(|c| c.normal == Some(false)).count(),
        checks.len(),
        alpha
    );
    Ok(checks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SampleMetadata;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn aligned(values: Vec<Vec<f64>>, groups: &[&str]) -> AlignedData {
        let n = values.len();
        let p = values[0].len();
        let samples: Vec<String> = (0..n).map(|i| format!("s{}", i)).collect();
        let features: Vec<String> = (0..p).map(|j| format!("P{}", j)).collect();
        let flat: Vec<f64> = values.into_iter().flatten().collect();
        let table = MeasurementTable::new(
            samples.clone(),
            features,
            Array2::from_shape_vec((n, p), flat).unwrap(),
        )
        .unwrap();
        let metadata = SampleMetadata::new(samples)
            .unwrap()
            .with_categorical("group", groups)
            .unwrap();
        AlignedData { table, metadata }
    }

    #[test]
    fn test_two_groups_student() {
        let data = aligned(
            vec![vec![1.4], vec![2.2], vec![5.3], vec![4.2]],
            &["A", "A", "B", "B"],
        );
        let config = DifferentialConfig {
            is_logged: false,
            ..DifferentialConfig::new("group")
        };
        let result = run_differential(&data, &config).unwrap();
        assert_eq!(result.pairs, vec![("A".to_string(), "B".to_string())]);
        assert!(result.omnibus.is_empty());

        let record = &result.comparisons[0];
        assert_eq!(record.test, TestKind::StudentT);
        assert_relative_eq!(record.statistic, -4.3377662703534664, epsilon = 1e-10);
        assert_relative_eq!(record.pvalue, 0.0492523681517403, epsilon = 1e-10);
        assert_relative_eq!(record.mean1, 1.8, epsilon = 1e-12);
        assert_relative_eq!(record.mean2, 4.75, epsilon = 1e-12);
        assert_relative_eq!(record.fold_change, 4.75 / 1.8, epsilon = 1e-12);
        assert!(record.log2_fold_change > 0.0);
        // single test: adjusted equals raw
        assert_relative_eq!(record.padj, record.pvalue, epsilon = 1e-12);
        assert_eq!(record.rejected, Some(true));
    }

    #[test]
    fn test_three_groups_pairs_and_omnibus() {
        let data = aligned(
            vec![
                vec![1.4, 1.0],
                vec![6.2, 2.0],
                vec![7.3, 3.0],
                vec![0.4, 4.0],
                vec![1.5, 5.0],
                vec![0.6, 6.0],
            ],
            &["b", "b", "a", "a", "c", "c"],
        );
        let result = run_differential(&data, &DifferentialConfig::new("group")).unwrap();
        assert_eq!(result.levels, vec!["a", "b", "c"]);
        assert_eq!(result.comparisons.len(), 2 * 3);
        let pairs: Vec<(&str, &str)> = result.comparisons[..3]
            .iter()
            .map(|r| (r.group1.as_str(), r.group2.as_str()))
            .collect();
        assert_eq!(pairs, vec![("a", "b"), ("a", "c"), ("b", "c")]);

        assert_eq!(result.omnibus.len(), 2);
        let anova = &result.omnibus[0];
        assert_eq!(anova.test, TestKind::Anova);
        // groups b = [1.4, 6.2], a = [7.3, 0.4], c = [1.5, 0.6]
        assert_relative_eq!(anova.statistic, 0.431150294, epsilon = 1e-8);
        assert_relative_eq!(anova.pvalue, 0.684561983, epsilon = 1e-8);
        assert_eq!(anova.df1, 2.0);
        assert_eq!(anova.df2, 3.0);
    }

    #[test]
    fn test_single_level_fails() {
        let data = aligned(vec![vec![1.0], vec![2.0], vec![3.0]], &["A", "A", ""]);
        let err = run_differential(&data, &DifferentialConfig::new("group")).unwrap_err();
        assert_eq!(
            AnalysisError::kind_of(&err),
            Some(&AnalysisError::InsufficientGroups {
                column: "group".into(),
                found: 1
            })
        );
    }

    #[test]
    fn test_missing_group_column() {
        let data = aligned(vec![vec![1.0], vec![2.0]], &["A", "B"]);
        let err = run_differential(&data, &DifferentialConfig::new("disease")).unwrap_err();
        assert_eq!(
            AnalysisError::kind_of(&err),
            Some(&AnalysisError::MissingColumn("disease".into()))
        );
    }

    #[test]
    fn test_mismatched_metadata_rejected() {
        let data = aligned(vec![vec![1.0], vec![2.0], vec![3.0], vec![4.0]], &["A", "A", "B", "B"]);
        let six: Vec<String> = (0..6).map(|i| format!("s{}", i)).collect();
        let three: Vec<String> = (0..3).map(|i| format!("s{}", i)).collect();
        for (samples, groups) in [(six, vec!["A", "A", "B", "B", "A", "B"]), (three, vec!["A", "A", "B"])] {
            let bad = AlignedData {
                table: data.table.clone(),
                metadata: SampleMetadata::new(samples)
                    .unwrap()
                    .with_categorical("group", &groups)
                    .unwrap(),
            };
            let err = run_differential(&bad, &DifferentialConfig::new("group")).unwrap_err();
            assert!(matches!(
                AnalysisError::kind_of(&err),
                Some(AnalysisError::InvalidInput(_))
            ));
            assert!(check_equal_variances(&bad, "group", 0.05).is_err());
            assert!(check_normality(&bad, "group", 0.05).is_err());
        }
    }

    #[test]
    fn test_normality_per_group() {
        let a = [148.0, 154.0, 158.0, 160.0, 161.0, 162.0, 166.0, 170.0, 182.0, 195.0, 236.0];
        let b = [2.0, 4.0, 4.5];
        let mut rows: Vec<Vec<f64>> = a.iter().map(|&v| vec![v, v]).collect();
        rows.extend(b.iter().map(|&v| vec![v, 1.0]));
        let mut groups = vec!["A"; 11];
        groups.extend(["B"; 3]);
        let data = aligned(rows, &groups);

        let checks = check_normality(&data, "group", 0.05).unwrap();
        assert_eq!(checks.len(), 4);
        assert_eq!((checks[0].group.as_str(), checks[0].feature.as_str()), ("A", "P0"));
        assert_relative_eq!(checks[0].statistic, 0.7888146948353874, epsilon = 1e-6);
        assert_eq!(checks[0].normal, Some(false));
        assert_relative_eq!(checks[2].statistic, 0.8928571428571429, epsilon = 1e-12);
        assert_eq!(checks[2].normal, Some(true));
        // constant in B
        assert!(checks[3].pvalue.is_nan());
        assert_eq!(checks[3].normal, None);
    }

    #[test]
    fn test_covariate_collides_with_feature() {
        let data = aligned(vec![vec![1.0], vec![2.0]], &["A", "B"]);
        let data = AlignedData {
            metadata: data.metadata.with_numeric("P0", &[1.0, 2.0]).unwrap(),
            ..data
        };
        let config = DifferentialConfig::new("group").with_covariates(&["P0"]);
        let err = run_differential(&data, &config).unwrap_err();
        assert_eq!(
            AnalysisError::kind_of(&err),
            Some(&AnalysisError::ColumnCollision("P0".into()))
        );
    }

    #[test]
    fn test_too_few_observations_is_nan_record() {
        let data = aligned(
            vec![vec![1.0, 1.0], vec![f64::NAN, 2.0], vec![3.0, 3.5], vec![4.0, 4.5]],
            &["A", "A", "B", "B"],
        );
        let result = run_differential(&data, &DifferentialConfig::new("group")).unwrap();
        assert_eq!(result.comparisons.len(), 2);
        let first = &result.comparisons[0];
        assert_eq!(first.n1, 1);
        assert!(first.statistic.is_nan() && first.pvalue.is_nan());
        assert!(first.padj.is_nan());
        assert_eq!(first.rejected, None);
        assert!(result.comparisons[1].is_testable());
    }

    #[test]
    fn test_paired_t_test() {
        let data = aligned(
            vec![
                vec![1.3],
                vec![1.2],
                vec![0.2],
                vec![2.2],
                vec![1.4],
                vec![6.2],
                vec![7.3],
                vec![0.4],
            ],
            &["pre", "pre", "pre", "pre", "post", "post", "post", "post"],
        );
        // subjects listed in a different order for the second level
        let data = AlignedData {
            metadata: data
                .metadata
                .with_categorical("subject", &["s1", "s2", "s3", "s4", "s1", "s2", "s3", "s4"])
                .unwrap(),
            ..data
        };
        let config = DifferentialConfig::new("group").paired_by("subject");
        let result = run_differential(&data, &config).unwrap();
        let record = &result.comparisons[0];
        assert_eq!((record.group1.as_str(), record.group2.as_str()), ("post", "pre"));
        assert_eq!(record.test, TestKind::PairedT);
        // pre = [1.3, 1.2, 0.2, 2.2], post = [1.4, 6.2, 7.3, 0.4]
        assert_relative_eq!(record.statistic, 1.253588418, epsilon = 1e-8);
        assert_relative_eq!(record.pvalue, 0.298791224, epsilon = 1e-8);
    }

    #[test]
    fn test_ancova_adjusts_for_covariate() {
        // feature = 2 * age + group shift of 1
        let ages = [20.0, 30.0, 40.0, 25.0, 35.0, 45.0];
        let noise = [0.1, -0.1, 0.05, -0.05, 0.08, -0.02];
        let values: Vec<Vec<f64>> = (0..6)
            .map(|i| vec![2.0 * ages[i] + if i >= 3 { 1.0 } else { 0.0 } + noise[i]])
            .collect();
        let data = aligned(values, &["A", "A", "A", "B", "B", "B"]);
        let data = AlignedData {
            metadata: data.metadata.with_numeric("age", &ages).unwrap(),
            ..data
        };
        let config = DifferentialConfig::new("group").with_covariates(&["age"]);
        let result = run_differential(&data, &config).unwrap();

        let record = &result.comparisons[0];
        assert_eq!(record.test, TestKind::Ancova);
        // adjusted difference A - B close to -1
        let coefficient = record.coefficient.unwrap();
        assert!((coefficient + 1.0).abs() < 0.2, "{}", coefficient);
        let (low, high) = record.confidence_interval.unwrap();
        assert!(low < coefficient && coefficient < high);
        assert_eq!(result.omnibus.len(), 1);
        assert!(result.omnibus[0].pvalue < 0.05);
        // the contrast and the F-test agree for two levels
        assert_relative_eq!(record.statistic.powi(2), result.omnibus[0].statistic, epsilon = 1e-8);
    }

    #[test]
    fn test_permutation_fdr_reproducible() {
        let values: Vec<Vec<f64>> = (0..8)
            .map(|i| {
                let shift = if i >= 4 { 3.0 } else { 0.0 };
                vec![i as f64 * 0.1 + shift, (i % 3) as f64, (i * 7 % 5) as f64]
            })
            .collect();
        let data = aligned(values, &["A", "A", "A", "A", "B", "B", "B", "B"]);
        let config = DifferentialConfig {
            permutations: 25,
            seed: 7,
            ..DifferentialConfig::new("group")
        };
        let first = run_differential(&data, &config).unwrap();
        let second = run_differential(&data, &config).unwrap();
        assert_eq!(first, second);
        for record in &first.comparisons {
            assert!(record.padj >= record.pvalue && record.padj <= 1.0);
        }
    }

    #[test]
    fn test_equal_variances() {
        let data = aligned(
            vec![vec![1.0], vec![2.0], vec![3.0], vec![10.0], vec![20.0], vec![30.0]],
            &["A", "A", "A", "B", "B", "B"],
        );
        let checks = check_equal_variances(&data, "group", 0.05).unwrap();
        assert_eq!(checks.len(), 1);
        assert!(checks[0].pvalue < 1.0);
        assert!(checks[0].equal_variance.is_some());
    }
}
