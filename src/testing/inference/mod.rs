use rayon::prelude::*;

use crate::data::MeasurementTable;
use crate::testing::utils::observed_values;
use crate::testing::{Alternative, TTestType, TestResult};

pub mod correlation;

pub mod discrete;

pub mod distribution;

pub mod linear_model;

pub mod parametric;

pub mod nonparametric;

pub mod permutation;

/// Feature-wise tests over the rows of a measurement table.
///
/// Every method returns one result per feature in column order. Group arguments are
/// sample (row) indices; missing values are removed feature by feature.
pub trait TableStatTests {
    fn t_test(
        &self,
        group1_indices: &[usize],
        group2_indices: &[usize],
        test_type: TTestType,
    ) -> Vec<TestResult<f64>>;

    fn mann_whitney_test(
        &self,
        group1_indices: &[usize],
        group2_indices: &[usize],
        alternative: Alternative,
    ) -> Vec<TestResult<f64>>;
}

impl TableStatTests for MeasurementTable {
    fn t_test(
        &self,
        group1_indices: &[usize],
        group2_indices: &[usize],
        test_type: TTestType,
    ) -> Vec<TestResult<f64>> {
        (0..self.n_features())
            .into_par_iter()
            .map(|j| {
                let column = self.column(j);
                parametric::t_test(
                    &observed_values(column, group1_indices),
                    &observed_values(column, group2_indices),
                    test_type,
                )
            })
            .collect()
    }

    fn mann_whitney_test(
        &self,
        group1_indices: &[usize],
        group2_indices: &[usize],
        alternative: Alternative,
    ) -> Vec<TestResult<f64>> {
        (0..self.n_features())
            .into_par_iter()
            .map(|j| {
                let column = self.column(j);
                nonparametric::mann_whitney(
                    &observed_values(column, group1_indices),
                    &observed_values(column, group2_indices),
                    alternative,
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn table() -> MeasurementTable {
        MeasurementTable::new(
            vec!["s1".into(), "s2".into(), "s3".into(), "s4".into()],
            vec!["P1".into(), "P2".into()],
            array![[1.4, 1.0], [2.2, f64::NAN], [5.3, 2.0], [4.2, 3.0]],
        )
        .unwrap()
    }

    #[test]
    fn test_table_t_test_per_feature() {
        let results = table().t_test(&[0, 1], &[2, 3], TTestType::Student);
        assert_eq!(results.len(), 2);
        assert_relative_eq!(results[0].p_value, 0.0492523681517403, epsilon = 1e-10);
        // one observation left in group 1
        assert!(!results[1].is_valid());
    }

    #[test]
    fn test_table_rank_test_per_feature() {
        let results = table().mann_whitney_test(&[0, 1], &[2, 3], Alternative::TwoSided);
        assert_eq!(results.len(), 2);
        // both "A" values below both "B" values
        assert_eq!(results[0].statistic, 0.0);
        assert_relative_eq!(results[0].effect_size.unwrap(), 1.0);
        // NaN dropped: one value against two
        assert_eq!(results[1].metadata["nx"], 1.0);
    }
}
