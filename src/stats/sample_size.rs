//! Required sample size per variant (power analysis)

use super::distributions::inverse_normal_cdf;
use crate::{Error, Result};

/// Default statistical power.
pub const DEFAULT_POWER: f64 = 0.8;

/// Power-analysis calculator with fixed confidence and power.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleSizeCalculator {
    confidence_level: f64,
    power: f64,
}

impl Default for SampleSizeCalculator {
    fn default() -> Self {
        Self {
            confidence_level: crate::config::DEFAULT_CONFIDENCE_LEVEL,
            power: DEFAULT_POWER,
        }
    }
}

impl SampleSizeCalculator {
    /// Create a calculator for the given confidence (percent) and power.
    #[must_use]
    pub const fn new(confidence_level: f64, power: f64) -> Self {
        Self {
            confidence_level,
            power,
        }
    }

    /// Required samples per variant to detect a relative lift of
    /// `minimum_detectable_effect` over `baseline_rate`.
    ///
    /// # Errors
    ///
    /// See [`required_sample_size`].
    pub fn required(&self, baseline_rate: f64, minimum_detectable_effect: f64) -> Result<u64> {
        required_sample_size(
            baseline_rate,
            minimum_detectable_effect,
            self.confidence_level,
            self.power,
        )
    }
}

/// Minimum sample size per variant for a two-proportion comparison.
///
/// ```text
/// p1 = baseline_rate
/// p2 = baseline_rate * (1 + minimum_detectable_effect)
/// n  = (Zα + Zβ)² (p1(1-p1) + p2(1-p2)) / (p1 - p2)²
/// ```
///
/// with `Zα = Φ⁻¹(1 - α/2)` and `Zβ = Φ⁻¹(power)`, rounded up.
///
/// # Errors
///
/// Returns `Error::Validation` if the effect is zero, the baseline is
/// outside (0, 1), the lifted rate is outside (0, 1], the confidence
/// level is outside (0, 100) or the power is outside (0, 1).
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::suboptimal_flops
)]
pub fn required_sample_size(
    baseline_rate: f64,
    minimum_detectable_effect: f64,
    confidence_level: f64,
    power: f64,
) -> Result<u64> {
    if !minimum_detectable_effect.is_finite() || minimum_detectable_effect == 0.0 {
        return Err(Error::Validation(
            "minimum_detectable_effect must be non-zero".to_string(),
        ));
    }
    if !(baseline_rate > 0.0 && baseline_rate < 1.0) {
        return Err(Error::Validation(format!(
            "baseline_rate must be in (0, 1), got {baseline_rate}"
        )));
    }
    if !(confidence_level > 0.0 && confidence_level < 100.0) {
        return Err(Error::Validation(format!(
            "confidence_level must be in (0, 100), got {confidence_level}"
        )));
    }
    if !(power > 0.0 && power < 1.0) {
        return Err(Error::Validation(format!(
            "power must be in (0, 1), got {power}"
        )));
    }

    let p1 = baseline_rate;
    let p2 = baseline_rate * (1.0 + minimum_detectable_effect);
    if !(p2 > 0.0 && p2 <= 1.0) {
        return Err(Error::Validation(format!(
            "lifted rate {p2} falls outside (0, 1]"
        )));
    }

    let alpha = 1.0 - confidence_level / 100.0;
    let z_alpha = inverse_normal_cdf(1.0 - alpha / 2.0)
        .ok_or_else(|| Error::Validation("confidence level out of range".to_string()))?;
    let z_beta = inverse_normal_cdf(power)
        .ok_or_else(|| Error::Validation("power out of range".to_string()))?;

    let n = (z_alpha + z_beta).powi(2) * (p1 * (1.0 - p1) + p2 * (1.0 - p2)) / (p1 - p2).powi(2);
    Ok(n.ceil().max(1.0) as u64)
}
