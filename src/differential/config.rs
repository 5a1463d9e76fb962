use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::testing::TTestType;
use crate::testing::correction::CorrectionMethod;

/// Options of a differential regulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DifferentialConfig {
    /// Categorical metadata column defining the groups.
    pub group_column: String,
    /// Metadata columns adjusted for (ANCOVA). Each may appear once.
    pub covariates: Vec<String>,
    /// Metadata column identifying the subject of each sample.
    pub subject_column: Option<String>,
    /// Pair observations by subject. Requires `subject_column`.
    pub paired: bool,
    /// Parametric tests (t / ANOVA) or rank tests (Mann-Whitney / Kruskal-Wallis).
    pub parametric: bool,
    pub t_test_type: TTestType,
    /// Values are already log2 transformed.
    pub is_logged: bool,
    pub alpha: f64,
    pub correction: CorrectionMethod,
    /// Label permutations for permutation FDR of the pairwise tests; 0 disables it.
    pub permutations: usize,
    pub seed: u64,
}

impl Default for DifferentialConfig {
    fn default() -> Self {
        DifferentialConfig {
            group_column: "group".to_string(),
            covariates: Vec::new(),
            subject_column: None,
            paired: false,
            parametric: true,
            t_test_type: TTestType::Student,
            is_logged: true,
            alpha: 0.05,
            correction: CorrectionMethod::BenjaminiHochberg,
            permutations: 0,
            seed: 1234,
        }
    }
}

impl DifferentialConfig {
    pub fn new(group_column: &str) -> Self {
        DifferentialConfig {
            group_column: group_column.to_string(),
            ..Default::default()
        }
    }

    pub fn with_covariates(mut self, covariates: &[&str]) -> Self {
        self.covariates = covariates.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn paired_by(mut self, subject_column: &str) -> Self {
        self.subject_column = Some(subject_column.to_string());
        self.paired = true;
        self
    }

    pub fn nonparametric(mut self) -> Self {
        self.parametric = false;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> Result<()> { Err(AnalysisError::InvalidConfig(msg).into()) };

        if self.group_column.is_empty() {
            return invalid("group column name is empty".into());
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return invalid(format!("alpha must be within (0, 1), got {}", self.alpha));
        }
        for (i, covariate) in self.covariates.iter().enumerate() {
            if *covariate == self.group_column {
                return Err(AnalysisError::ColumnCollision(covariate.clone()).into());
            }
            if self.covariates[..i].contains(covariate) {
                return invalid(format!("covariate '{}' is listed more than once", covariate));
            }
        }
        if self.paired {
            match &self.subject_column {
                None => return invalid("paired tests need a subject column".into()),
                Some(subject) if *subject == self.group_column => {
                    return Err(AnalysisError::ColumnCollision(subject.clone()).into());
                }
                Some(_) => {}
            }
            if !self.covariates.is_empty() {
                return invalid("paired designs cannot be adjusted for covariates".into());
            }
        }
        if self.permutations > 0 && (self.paired || !self.covariates.is_empty()) {
            return invalid("permutation FDR is only available for unpaired tests without covariates".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(config: &DifferentialConfig) -> Option<AnalysisError> {
        config
            .validate()
            .err()
            .and_then(|e| AnalysisError::kind_of(&e).cloned())
    }

    #[test]
    fn test_default_is_valid() {
        assert!(DifferentialConfig::default().validate().is_ok());
        assert!(DifferentialConfig::new("disease").nonparametric().validate().is_ok());
    }

    #[test]
    fn test_covariate_collision_and_duplicates() {
        let config = DifferentialConfig::new("disease").with_covariates(&["age", "disease"]);
        assert_eq!(kind(&config), Some(AnalysisError::ColumnCollision("disease".into())));

        let config = DifferentialConfig::new("disease").with_covariates(&["age", "age"]);
        assert!(matches!(kind(&config), Some(AnalysisError::InvalidConfig(_))));
    }

    #[test]
    fn test_paired_needs_subject() {
        let config = DifferentialConfig {
            paired: true,
            ..DifferentialConfig::new("time")
        };
        assert!(matches!(kind(&config), Some(AnalysisError::InvalidConfig(_))));
        assert!(DifferentialConfig::new("time").paired_by("subject").validate().is_ok());
    }

    #[test]
    fn test_serde_defaults() {
        let config: DifferentialConfig =
            serde_json::from_str(r#"{"group_column": "disease", "correction": "holm"}"#).unwrap();
        assert_eq!(config.correction, CorrectionMethod::Holm);
        assert_eq!(config.alpha, 0.05);
        assert!(config.is_logged);
    }
}
