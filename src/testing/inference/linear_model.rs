//! Ordinary least squares fits used by ANCOVA and by the batch-correction design.

use crate::testing::inference::parametric::{f_test, t_critical, t_p_value};
use crate::testing::{Alternative, TestResult};
use nalgebra::{DMatrix, DVector};

/// Result of fitting `y = X beta + e` by least squares.
#[derive(Debug, Clone)]
pub struct OlsFit {
    /// Estimated coefficients, one per design column.
    pub coefficients: DVector<f64>,
    /// `(X'X)^-1`, unscaled.
    pub xtx_inv: DMatrix<f64>,
    /// Residual sum of squares.
    pub rss: f64,
    /// Residual degrees of freedom (`n - p`).
    pub df_residual: usize,
}

impl OlsFit {
    /// Residual variance estimate `rss / df`.
    pub fn sigma2(&self) -> f64 {
        if self.df_residual == 0 {
            return f64::NAN;
        }
        self.rss / self.df_residual as f64
    }

    /// Standard error of coefficient `index`.
    pub fn std_error(&self, index: usize) -> f64 {
        (self.sigma2() * self.xtx_inv[(index, index)]).sqrt()
    }

    /// t-test of the linear contrast `c' beta = 0`.
    ///
    /// Returns the estimate as `effect_size`, its standard error, the residual df and
    /// the 95% confidence interval of the estimate.
    pub fn contrast(&self, c: &DVector<f64>) -> TestResult<f64> {
        if c.len() != self.coefficients.len() || self.df_residual == 0 {
            return TestResult::untestable();
        }
        let estimate = c.dot(&self.coefficients);
        let variance = (c.transpose() * &self.xtx_inv * c)[(0, 0)] * self.sigma2();
        let se = variance.sqrt();
        if !(se > 0.0) {
            return TestResult::untestable();
        }
        let df = self.df_residual as f64;
        let t = estimate / se;
        let margin = t_critical(df, 0.975) * se;

        TestResult::with_effect_size(t, t_p_value(t, df, Alternative::TwoSided), estimate)
            .with_standard_error(se)
            .with_degrees_of_freedom(df)
            .with_confidence_interval(estimate - margin, estimate + margin)
    }
}

/// Fit OLS, or `None` when `X'X` is singular or the model is saturated.
pub fn ols(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<OlsFit> {
    let n = x.nrows();
    let p = x.ncols();
    if n != y.len() || n <= p {
        return None;
    }

    let xt = x.transpose();
    let xtx_inv = (&xt * x).try_inverse()?;
    let coefficients = &xtx_inv * (&xt * y);
    let residuals = y - x * &coefficients;
    let rss = residuals.norm_squared();

    Some(OlsFit {
        coefficients,
        xtx_inv,
        rss,
        df_residual: n - p,
    })
}

/// Extra-sum-of-squares F-test of a full model against a nested reduced model.
///
/// `statistic` is F, `degrees_of_freedom` the numerator df and metadata `df2` the
/// residual df of the full model.
pub fn nested_f_test(full: &OlsFit, reduced: &OlsFit) -> TestResult<f64> {
    if reduced.df_residual <= full.df_residual || full.df_residual == 0 {
        return TestResult::untestable();
    }
    let df1 = (reduced.df_residual - full.df_residual) as f64;
    let df2 = full.df_residual as f64;
    let ms_effect = (reduced.rss - full.rss).max(0.0) / df1;
    f_test(ms_effect, full.rss / df2, df1, df2)
}
