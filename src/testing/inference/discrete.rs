use crate::testing::{Alternative, TestResult};
use statrs::distribution::{Discrete, DiscreteCDF, Hypergeometric};

/// Relative tolerance when comparing table probabilities in the two-sided test.
const FISHER_RELATIVE_TOLERANCE: f64 = 1e-7;

/// Counts of a 2x2 over-representation table.
///
/// `overlap` features are both selected and in the set; the universe holds
/// `universe` features of which `set_size` are set members and `selected` are selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlapCounts {
    pub overlap: u64,
    pub selected: u64,
    pub set_size: u64,
    pub universe: u64,
}

impl OverlapCounts {
    pub fn new(overlap: u64, selected: u64, set_size: u64, universe: u64) -> Self {
        OverlapCounts {
            overlap,
            selected,
            set_size,
            universe,
        }
    }

    /// Whether the counts describe a realizable table.
    pub fn is_consistent(&self) -> bool {
        self.selected <= self.universe
            && self.set_size <= self.universe
            && self.overlap <= self.selected.min(self.set_size)
            && self.selected + self.set_size <= self.universe + self.overlap
    }

    /// Selected features expected in the set under independence.
    pub fn expected(&self) -> f64 {
        if self.universe == 0 {
            return f64::NAN;
        }
        self.selected as f64 * self.set_size as f64 / self.universe as f64
    }

    /// Sample odds ratio `(a * d) / (b * c)`; infinite when a margin cell is empty.
    pub fn odds_ratio(&self) -> f64 {
        let a = self.overlap as f64;
        let b = (self.selected - self.overlap) as f64;
        let c = (self.set_size - self.overlap) as f64;
        let d = (self.universe + self.overlap - self.selected - self.set_size) as f64;
        (a * d) / (b * c)
    }
}

/// Hypergeometric test of the overlap between a selection and a feature set.
///
/// `Greater` gives `P(X >= overlap)`, the usual over-representation p-value.
/// `TwoSided` is Fisher's exact test, summing every table no more likely than the
/// observed one. The statistic is the overlap; the effect size is the odds ratio.
pub fn hypergeometric_test(counts: OverlapCounts, alternative: Alternative) -> TestResult<f64> {
    if !counts.is_consistent() || counts.universe == 0 {
        return TestResult::untestable();
    }

    let dist = match Hypergeometric::new(counts.universe, counts.set_size, counts.selected) {
        Ok(d) => d,
        Err(_) => return TestResult::untestable(),
    };
    let a = counts.overlap;

    let p_value = match alternative {
        Alternative::Greater => {
            if a == 0 {
                1.0
            } else {
                dist.sf(a - 1)
            }
        }
        Alternative::Less => dist.cdf(a),
        Alternative::TwoSided => fisher_two_sided(&dist, counts),
    };

    let expected = counts.expected();
    TestResult::with_effect_size(a as f64, p_value.clamp(0.0, 1.0), counts.odds_ratio())
        .with_metadata("expected", expected)
        .with_metadata("fold_enrichment", a as f64 / expected)
}

fn fisher_two_sided(dist: &Hypergeometric, counts: OverlapCounts) -> f64 {
    let low = (counts.selected + counts.set_size).saturating_sub(counts.universe);
    let high = counts.selected.min(counts.set_size);
    let observed = dist.pmf(counts.overlap);
    let threshold = observed * (1.0 + FISHER_RELATIVE_TOLERANCE);

    (low..=high)
        .map(|x| dist.pmf(x))
        .filter(|&p| p <= threshold)
        .sum::<f64>()
        .min(1.0)
}
