//! Thin wrappers over `statrs` distributions.
//!
//! Every function returns `None` instead of panicking or producing NaN
//! when the parameters are outside the distribution's domain.

use statrs::distribution::{ChiSquared, ContinuousCDF, Normal, StudentsT};

fn standard_normal() -> Option<Normal> {
    Normal::new(0.0, 1.0).ok()
}

/// Φ(x), the standard normal CDF.
#[must_use]
pub fn normal_cdf(x: f64) -> Option<f64> {
    if x.is_nan() {
        return None;
    }
    standard_normal().map(|n| n.cdf(x))
}

/// Φ⁻¹(p) for p in (0, 1).
#[must_use]
pub fn inverse_normal_cdf(p: f64) -> Option<f64> {
    if !(p > 0.0 && p < 1.0) {
        return None;
    }
    standard_normal().map(|n| n.inverse_cdf(p))
}

/// Two-tailed p-value of a standard normal statistic: `2 * (1 - Φ(|z|))`.
#[must_use]
pub fn normal_two_tailed(z: f64) -> Option<f64> {
    let tail = 1.0 - normal_cdf(z.abs())?;
    Some(clamp_probability(2.0 * tail))
}

/// Two-tailed p-value of a Student-t statistic with `df` degrees of freedom.
#[must_use]
pub fn student_t_two_tailed(t: f64, df: f64) -> Option<f64> {
    if t.is_nan() || !(df.is_finite() && df > 0.0) {
        return None;
    }
    let dist = StudentsT::new(0.0, 1.0, df).ok()?;
    Some(clamp_probability(2.0 * dist.sf(t.abs())))
}

/// Upper-tail probability of a chi-square statistic.
#[must_use]
pub fn chi_square_upper_tail(statistic: f64, df: f64) -> Option<f64> {
    if statistic.is_nan() || statistic < 0.0 || !(df.is_finite() && df > 0.0) {
        return None;
    }
    let dist = ChiSquared::new(df).ok()?;
    Some(clamp_probability(dist.sf(statistic)))
}

/// Clamp into [0, 1]; rounding can push tails a hair outside.
#[must_use]
pub fn clamp_probability(p: f64) -> f64 {
    p.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_cdf_known_values() {
        assert!((normal_cdf(0.0).unwrap() - 0.5).abs() < 1e-12);
        assert!((normal_cdf(1.959_963_985).unwrap() - 0.975).abs() < 1e-6);
        assert!(normal_cdf(f64::NAN).is_none());
    }

    #[test]
    fn test_inverse_normal_known_values() {
        assert!((inverse_normal_cdf(0.975).unwrap() - 1.959_963_985).abs() < 1e-6);
        assert!((inverse_normal_cdf(0.8).unwrap() - 0.841_621_234).abs() < 1e-6);
        assert!(inverse_normal_cdf(0.0).is_none());
        assert!(inverse_normal_cdf(1.0).is_none());
    }

    #[test]
    fn test_two_tailed_normal_symmetry() {
        let a = normal_two_tailed(1.5).unwrap();
        let b = normal_two_tailed(-1.5).unwrap();
        assert!((a - b).abs() < 1e-15);
        assert!((normal_two_tailed(0.0).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_student_t_approaches_normal() {
        let t = student_t_two_tailed(1.96, 1e6).unwrap();
        assert!((t - 0.05).abs() < 1e-3);
        assert!(student_t_two_tailed(1.0, 0.0).is_none());
    }

    #[test]
    fn test_chi_square_df2_closed_form() {
        // For df = 2 the upper tail is exp(-x/2).
        let p = chi_square_upper_tail(7.554_862_693, 2.0).unwrap();
        assert!((p - (-7.554_862_693_f64 / 2.0).exp()).abs() < 1e-9);
        assert!(chi_square_upper_tail(-1.0, 2.0).is_none());
    }
}
