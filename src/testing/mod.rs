use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use single_utilities::traits::FloatOps;

use crate::error::AnalysisError;

pub mod correction;
pub mod effect;
pub mod inference;

pub mod utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TTestType {
    #[default]
    Student, // Equal variance
    Welch,   // Unequal variance
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Alternative {
    #[default]
    TwoSided,
    Less,
    Greater,
}

impl FromStr for Alternative {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "two-sided" | "two_sided" | "twosided" => Ok(Alternative::TwoSided),
            "less" => Ok(Alternative::Less),
            "greater" => Ok(Alternative::Greater),
            other => Err(AnalysisError::InvalidConfig(format!(
                "unknown alternative '{}'",
                other
            ))),
        }
    }
}

/// The statistical procedure that produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    StudentT,
    WelchT,
    PairedT,
    MannWhitney,
    WilcoxonSignedRank,
    Anova,
    KruskalWallis,
    RepeatedMeasuresAnova,
    Friedman,
    Ancova,
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TestKind::StudentT => "Student's t-test",
            TestKind::WelchT => "Welch's t-test",
            TestKind::PairedT => "paired t-test",
            TestKind::MannWhitney => "Mann-Whitney U",
            TestKind::WilcoxonSignedRank => "Wilcoxon signed-rank",
            TestKind::Anova => "one-way ANOVA",
            TestKind::KruskalWallis => "Kruskal-Wallis",
            TestKind::RepeatedMeasuresAnova => "repeated-measures ANOVA",
            TestKind::Friedman => "Friedman",
            TestKind::Ancova => "ANCOVA",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct TestResult<T> {
    /// The test statistic value (e.g., t-statistic, U statistic)
    pub statistic: T,
    /// The p-value of the test
    pub p_value: T,
    /// Confidence interval for the effect size/difference (if available)
    pub confidence_interval: Option<(T, T)>,
    /// Degrees of freedom (for parametric inference)
    pub degrees_of_freedom: Option<T>,
    /// Effect size measurement
    pub effect_size: Option<T>,
    /// Standard error of the effect size or test statistic
    pub standard_error: Option<T>,
    /// Additional test-specific information
    pub metadata: HashMap<String, T>,
}

impl<T> TestResult<T>
where
    T: FloatOps,
{
    /// Create a new test result with minimal information
    pub fn new(statistic: T, p_value: T) -> Self {
        TestResult {
            statistic,
            p_value,
            confidence_interval: None,
            degrees_of_freedom: None,
            effect_size: None,
            standard_error: None,
            metadata: HashMap::new(),
        }
    }

    /// Result of a test that could not be computed (too few observations, zero
    /// variance). Statistic and p-value are NaN.
    pub fn untestable() -> Self {
        let nan = <T as num_traits::Float>::nan();
        Self::new(nan, nan)
    }

    /// Create a new test result with effect size
    pub fn with_effect_size(statistic: T, p_value: T, effect_size: T) -> Self {
        TestResult {
            effect_size: Some(effect_size),
            ..Self::new(statistic, p_value)
        }
    }

    /// Add confidence interval to the result
    pub fn with_confidence_interval(mut self, lower: T, upper: T) -> Self {
        self.confidence_interval = Some((lower, upper));
        self
    }

    /// Add degrees of freedom to the result
    pub fn with_degrees_of_freedom(mut self, df: T) -> Self {
        self.degrees_of_freedom = Some(df);
        self
    }

    /// Add standard error to the result
    pub fn with_standard_error(mut self, se: T) -> Self {
        self.standard_error = Some(se);
        self
    }

    /// Add additional metadata
    pub fn with_metadata(mut self, key: &str, value: T) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Whether statistic and p-value are both defined
    pub fn is_valid(&self) -> bool {
        !num_traits::Float::is_nan(self.p_value) && !num_traits::Float::is_nan(self.statistic)
    }

    /// Check if the result is statistically significant at the given threshold
    pub fn is_significant(&self, alpha: T) -> bool {
        self.p_value <= alpha
    }
}
