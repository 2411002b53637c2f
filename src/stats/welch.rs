//! Welch's unequal-variance t-test

use super::distributions::student_t_two_tailed;
use super::TestStatistic;

/// Summary statistics of a continuous metric for one variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContinuousSummary {
    /// Number of observations
    pub n: u64,
    /// Sample mean
    pub mean: f64,
    /// Unbiased sample variance
    pub variance: f64,
}

impl ContinuousSummary {
    /// Build from precomputed moments. Negative or non-finite variance
    /// is treated as zero.
    #[must_use]
    pub fn new(n: u64, mean: f64, variance: f64) -> Self {
        let variance = if variance.is_finite() && variance > 0.0 {
            variance
        } else {
            0.0
        };
        let mean = if mean.is_finite() { mean } else { 0.0 };
        Self { n, mean, variance }
    }

    /// Compute mean and unbiased variance from raw observations.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_samples(samples: &[f64]) -> Self {
        let n = samples.len();
        if n == 0 {
            return Self::new(0, 0.0, 0.0);
        }
        let mean = samples.iter().sum::<f64>() / n as f64;
        let variance = if n < 2 {
            0.0
        } else {
            samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64
        };
        Self::new(n as u64, mean, variance)
    }
}

/// Two-sample Welch t-test, two-tailed.
///
/// `t = (m1 - m2) / sqrt(s1²/n1 + s2²/n2)` with Welch–Satterthwaite
/// degrees of freedom. Fewer than two observations in a group, or zero
/// variance in both, leaves the p-value undetermined.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::suboptimal_flops)]
pub fn welch_t_test(a: ContinuousSummary, b: ContinuousSummary) -> TestStatistic {
    if a.n < 2 || b.n < 2 {
        return TestStatistic::undetermined("t-test requires at least 2 observations per variant");
    }

    let va = a.variance / a.n as f64;
    let vb = b.variance / b.n as f64;
    let se = (va + vb).sqrt();
    if se < f64::EPSILON {
        return TestStatistic::undetermined(
            "zero variance in both variants; t statistic is undefined",
        );
    }

    let t = (a.mean - b.mean) / se;
    let df_denom = va.powi(2) / (a.n - 1) as f64 + vb.powi(2) / (b.n - 1) as f64;
    let df = if df_denom > 0.0 {
        (va + vb).powi(2) / df_denom
    } else {
        (a.n + b.n - 2) as f64
    };

    match student_t_two_tailed(t, df) {
        Some(p_value) => TestStatistic {
            statistic: Some(t),
            degrees_of_freedom: Some(df),
            p_value: Some(p_value),
            low_power_warning: false,
            reason: None,
        },
        None => TestStatistic::undetermined("t distribution is undefined for these inputs"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_samples() {
        let s = ContinuousSummary::from_samples(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(s.n, 8);
        assert!((s.mean - 5.0).abs() < 1e-12);
        assert!((s.variance - 32.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_known_welch_example() {
        // Group means 20 vs 22, variances 4 and 9, n = 30 each.
        let a = ContinuousSummary::new(30, 20.0, 4.0);
        let b = ContinuousSummary::new(30, 22.0, 9.0);
        let result = welch_t_test(a, b);

        let se = (4.0_f64 / 30.0 + 9.0 / 30.0).sqrt();
        assert!((result.statistic.unwrap() - (-2.0 / se)).abs() < 1e-12);

        let df = result.degrees_of_freedom.unwrap();
        assert!(df > 29.0 && df < 58.0);
        let p = result.p_value.unwrap();
        assert!(p > 0.0 && p < 0.01);
    }

    #[test]
    fn test_zero_variance_is_undetermined() {
        let a = ContinuousSummary::new(50, 0.3, 0.0);
        let b = ContinuousSummary::new(50, 0.4, 0.0);
        let result = welch_t_test(a, b);
        assert!(result.p_value.is_none());
        assert!(result.reason.unwrap().contains("zero variance"));
    }

    #[test]
    fn test_single_observation_is_undetermined() {
        let a = ContinuousSummary::from_samples(&[1.0]);
        let b = ContinuousSummary::from_samples(&[1.0, 2.0, 3.0]);
        assert!(welch_t_test(a, b).p_value.is_none());
    }

    #[test]
    fn test_one_sided_zero_variance_uses_other_group_df() {
        let a = ContinuousSummary::new(10, 1.0, 0.0);
        let b = ContinuousSummary::new(20, 2.0, 1.0);
        let result = welch_t_test(a, b);
        assert!((result.degrees_of_freedom.unwrap() - 19.0).abs() < 1e-9);
    }
}
