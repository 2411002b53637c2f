//! Two-proportion z-test

use super::distributions::normal_two_tailed;
use super::{TestStatistic, MIN_EXPECTED_CELL};

/// Successes out of trials for one variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProportionSample {
    /// Number of successes (clamped to `trials`)
    pub successes: u64,
    /// Number of trials
    pub trials: u64,
}

impl ProportionSample {
    /// Create a sample, clamping successes to the trial count.
    #[must_use]
    pub fn new(successes: u64, trials: u64) -> Self {
        Self {
            successes: successes.min(trials),
            trials,
        }
    }

    /// Observed proportion, 0 when there are no trials.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn proportion(&self) -> f64 {
        if self.trials == 0 {
            0.0
        } else {
            self.successes as f64 / self.trials as f64
        }
    }
}

/// Pooled two-proportion z-test, two-tailed.
///
/// ```text
/// p_pool = (x1 + x2) / (n1 + n2)
/// SE     = sqrt(p_pool (1 - p_pool) (1/n1 + 1/n2))
/// z      = (p1 - p2) / SE
/// p      = 2 (1 - Φ(|z|))
/// ```
///
/// A zero standard error (both proportions 0% or both 100%) yields
/// `z = 0, p = 1`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn two_proportion_z_test(a: ProportionSample, b: ProportionSample) -> TestStatistic {
    if a.trials == 0 || b.trials == 0 {
        return TestStatistic::undetermined("z-test requires at least one trial per variant");
    }

    let n1 = a.trials as f64;
    let n2 = b.trials as f64;
    let p_pool = (a.successes + b.successes) as f64 / (n1 + n2);
    let se = (p_pool * (1.0 - p_pool) * (1.0 / n1 + 1.0 / n2)).sqrt();

    let low_power = [n1, n2].iter().any(|&n| {
        n * p_pool < MIN_EXPECTED_CELL || n * (1.0 - p_pool) < MIN_EXPECTED_CELL
    });

    if se == 0.0 || !se.is_finite() {
        return TestStatistic {
            statistic: Some(0.0),
            degrees_of_freedom: None,
            p_value: Some(1.0),
            low_power_warning: low_power,
            reason: None,
        };
    }

    let z = (a.proportion() - b.proportion()) / se;
    match normal_two_tailed(z) {
        Some(p_value) => TestStatistic {
            statistic: Some(z),
            degrees_of_freedom: None,
            p_value: Some(p_value),
            low_power_warning: low_power,
            reason: None,
        },
        None => TestStatistic::undetermined("z statistic is not a number"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_example() {
        let result = two_proportion_z_test(
            ProportionSample::new(150, 1000),
            ProportionSample::new(180, 1000),
        );
        assert!((result.statistic.unwrap() + 1.807_261_7).abs() < 1e-6);
        assert!((result.p_value.unwrap() - 0.070_721_5).abs() < 1e-5);
        assert!(!result.low_power_warning);
    }

    #[test]
    fn test_order_symmetry() {
        let a = ProportionSample::new(45, 300);
        let b = ProportionSample::new(70, 310);
        let ab = two_proportion_z_test(a, b);
        let ba = two_proportion_z_test(b, a);
        assert!((ab.statistic.unwrap() + ba.statistic.unwrap()).abs() < 1e-12);
        assert!((ab.p_value.unwrap() - ba.p_value.unwrap()).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_all_zero() {
        let result =
            two_proportion_z_test(ProportionSample::new(0, 500), ProportionSample::new(0, 500));
        assert_eq!(result.p_value, Some(1.0));
        assert_eq!(result.statistic, Some(0.0));
        assert!(result.low_power_warning);
    }

    #[test]
    fn test_degenerate_all_success() {
        let result = two_proportion_z_test(
            ProportionSample::new(200, 200),
            ProportionSample::new(300, 300),
        );
        assert_eq!(result.p_value, Some(1.0));
    }

    #[test]
    fn test_successes_clamped_to_trials() {
        let sample = ProportionSample::new(50, 10);
        assert_eq!(sample.successes, 10);
        assert!((sample.proportion() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_zero_trials_undetermined() {
        let result =
            two_proportion_z_test(ProportionSample::new(0, 0), ProportionSample::new(5, 10));
        assert!(result.p_value.is_none());
        assert!(result.reason.is_some());
    }
}
