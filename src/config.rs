//! Configuration: per-experiment `TestConfig` and process-wide `EngineConfig`
//!
//! Both deserialize from JSON with every field defaulted, so an empty
//! object `{}` is a valid configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{Error, Result};

/// Default confidence level, in percent.
pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 95.0;
/// Default minimum sample size per variant.
pub const DEFAULT_MINIMUM_SAMPLE_SIZE: u64 = 100;
/// Default interval between scheduled sweeps.
pub const DEFAULT_EVALUATION_INTERVAL_SECONDS: u64 = 3600;
/// Longest evaluation lease accepted (one day).
pub const MAX_LOCK_LEASE_SECONDS: u64 = 86_400;

/// Derived rate a test optimizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WinnerMetric {
    /// opened / delivered
    OpenRate,
    /// clicked / opened
    ClickRate,
    /// converted / sent
    #[default]
    ConversionRate,
    /// Weighted composite of the four engagement rates
    EngagementScore,
}

impl WinnerMetric {
    /// Whether the metric is a ratio of counts (z-test) or a continuous
    /// composite (t-test).
    #[must_use]
    pub const fn is_proportion(self) -> bool {
        !matches!(self, Self::EngagementScore)
    }

    /// Snake-case name used in logs and summaries.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenRate => "open_rate",
            Self::ClickRate => "click_rate",
            Self::ConversionRate => "conversion_rate",
            Self::EngagementScore => "engagement_score",
        }
    }
}

/// Statistical settings for one experiment.
///
/// Set at creation and editable only until a winner is declared.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    /// Which derived rate decides the winner
    pub winner_metric: WinnerMetric,
    /// Confidence level in percent, exclusive range (0, 100)
    pub confidence_level: f64,
    /// Every variant needs at least this many samples before a winner
    pub minimum_sample_size: u64,
    /// Declare automatically when the analysis finds a winner
    pub auto_select_winner: bool,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            winner_metric: WinnerMetric::default(),
            confidence_level: DEFAULT_CONFIDENCE_LEVEL,
            minimum_sample_size: DEFAULT_MINIMUM_SAMPLE_SIZE,
            auto_select_winner: false,
        }
    }
}

impl TestConfig {
    /// Significance threshold: `1 - confidence_level / 100`.
    #[must_use]
    pub fn alpha(&self) -> f64 {
        1.0 - self.confidence_level / 100.0
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the confidence level is outside
    /// (0, 100) or the minimum sample size is zero.
    pub fn validate(&self) -> Result<()> {
        if !self.confidence_level.is_finite()
            || self.confidence_level <= 0.0
            || self.confidence_level >= 100.0
        {
            return Err(Error::Validation(format!(
                "confidence_level must be in (0, 100), got {}",
                self.confidence_level
            )));
        }
        if self.minimum_sample_size == 0 {
            return Err(Error::Validation(
                "minimum_sample_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Weights of the engagement score composite.
///
/// The default 0.2/0.3/0.3/0.2 split is a policy constant, not a derived
/// quantity; deployments may tune it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngagementWeights {
    /// Weight of `open_rate`
    pub open: f64,
    /// Weight of `click_rate`
    pub click: f64,
    /// Weight of `reply_rate`
    pub reply: f64,
    /// Weight of `conversion_rate`
    pub conversion: f64,
}

impl Default for EngagementWeights {
    fn default() -> Self {
        Self {
            open: 0.2,
            click: 0.3,
            reply: 0.3,
            conversion: 0.2,
        }
    }
}

impl EngagementWeights {
    /// Weights in open, click, reply, conversion order.
    #[must_use]
    pub const fn as_array(&self) -> [f64; 4] {
        [self.open, self.click, self.reply, self.conversion]
    }

    /// Validate that weights are non-negative and sum to 1.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` otherwise.
    pub fn validate(&self) -> Result<()> {
        let weights = self.as_array();
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(Error::Validation(
                "engagement weights must be finite and non-negative".to_string(),
            ));
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > 1e-9 {
            return Err(Error::Validation(format!(
                "engagement weights must sum to 1, got {sum}"
            )));
        }
        Ok(())
    }
}

/// Process-wide engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds between scheduled sweeps
    pub evaluation_interval_seconds: u64,
    /// Time budget of a single experiment evaluation
    pub evaluation_timeout_millis: u64,
    /// Consecutive failures before an experiment is flagged for review
    pub max_consecutive_failures: u32,
    /// Lifetime of an evaluation lease before it may be reclaimed
    pub lock_lease_seconds: u64,
    /// Upper bound on evaluations running at once within a sweep
    pub max_concurrent_evaluations: usize,
    /// Engagement score composite weights
    pub engagement_weights: EngagementWeights,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_seconds: DEFAULT_EVALUATION_INTERVAL_SECONDS,
            evaluation_timeout_millis: 5_000,
            max_consecutive_failures: 3,
            lock_lease_seconds: 60,
            max_concurrent_evaluations: 8,
            engagement_weights: EngagementWeights::default(),
        }
    }
}

impl EngineConfig {
    /// Create a builder starting from the defaults.
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Parse and validate a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` for malformed JSON and
    /// `Error::Validation` for out-of-range values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for zero intervals, budgets or limits,
    /// a lease outside `1..=MAX_LOCK_LEASE_SECONDS` or shorter than the
    /// evaluation budget, or invalid engagement weights.
    pub fn validate(&self) -> Result<()> {
        if self.evaluation_interval_seconds == 0 {
            return Err(Error::Validation(
                "evaluation_interval_seconds must be positive".to_string(),
            ));
        }
        if self.evaluation_timeout_millis == 0 {
            return Err(Error::Validation(
                "evaluation_timeout_millis must be positive".to_string(),
            ));
        }
        if !(1..=MAX_LOCK_LEASE_SECONDS).contains(&self.lock_lease_seconds) {
            return Err(Error::Validation(format!(
                "lock_lease_seconds must be between 1 and {MAX_LOCK_LEASE_SECONDS}, got {}",
                self.lock_lease_seconds
            )));
        }
        // The lease must outlive the evaluation budget.
        if self.lock_lease_seconds.saturating_mul(1000) < self.evaluation_timeout_millis {
            return Err(Error::Validation(format!(
                "lock_lease_seconds ({}s) must cover evaluation_timeout_millis ({}ms)",
                self.lock_lease_seconds, self.evaluation_timeout_millis
            )));
        }
        if self.max_consecutive_failures == 0 {
            return Err(Error::Validation(
                "max_consecutive_failures must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_evaluations == 0 {
            return Err(Error::Validation(
                "max_concurrent_evaluations must be at least 1".to_string(),
            ));
        }
        self.engagement_weights.validate()
    }

    /// Interval between sweeps.
    #[must_use]
    pub const fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval_seconds)
    }

    /// Per-experiment evaluation budget.
    #[must_use]
    pub const fn evaluation_timeout(&self) -> Duration {
        Duration::from_millis(self.evaluation_timeout_millis)
    }

    /// Lease lifetime as a chrono duration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if `lock_lease_seconds` is outside
    /// `1..=MAX_LOCK_LEASE_SECONDS`.
    pub fn lock_lease(&self) -> Result<chrono::Duration> {
        i64::try_from(self.lock_lease_seconds)
            .ok()
            .filter(|_| (1..=MAX_LOCK_LEASE_SECONDS).contains(&self.lock_lease_seconds))
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "lock_lease_seconds must be between 1 and {MAX_LOCK_LEASE_SECONDS}, got {}",
                    self.lock_lease_seconds
                ))
            })
    }
}

/// Builder for `EngineConfig`.
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Set the sweep interval.
    #[must_use]
    pub const fn evaluation_interval_seconds(mut self, seconds: u64) -> Self {
        self.config.evaluation_interval_seconds = seconds;
        self
    }

    /// Set the per-experiment evaluation budget.
    #[must_use]
    pub const fn evaluation_timeout_millis(mut self, millis: u64) -> Self {
        self.config.evaluation_timeout_millis = millis;
        self
    }

    /// Set the failure count that flags an experiment for review.
    #[must_use]
    pub const fn max_consecutive_failures(mut self, failures: u32) -> Self {
        self.config.max_consecutive_failures = failures;
        self
    }

    /// Set the lease lifetime.
    #[must_use]
    pub const fn lock_lease_seconds(mut self, seconds: u64) -> Self {
        self.config.lock_lease_seconds = seconds;
        self
    }

    /// Set the sweep concurrency cap.
    #[must_use]
    pub const fn max_concurrent_evaluations(mut self, limit: usize) -> Self {
        self.config.max_concurrent_evaluations = limit;
        self
    }

    /// Set the engagement weights.
    #[must_use]
    pub const fn engagement_weights(mut self, weights: EngagementWeights) -> Self {
        self.config.engagement_weights = weights;
        self
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if any value is out of range.
    pub fn build(self) -> Result<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_config_defaults() {
        let config = TestConfig::default();
        assert_eq!(config.winner_metric, WinnerMetric::ConversionRate);
        assert!((config.confidence_level - 95.0).abs() < f64::EPSILON);
        assert_eq!(config.minimum_sample_size, 100);
        assert!(!config.auto_select_winner);
        assert!((config.alpha() - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_test_config_rejects_bad_confidence() {
        for level in [0.0, 100.0, -5.0, 150.0, f64::NAN] {
            let config = TestConfig {
                confidence_level: level,
                ..TestConfig::default()
            };
            assert!(matches!(config.validate(), Err(Error::Validation(_))));
        }
    }

    #[test]
    fn test_test_config_rejects_zero_sample_size() {
        let config = TestConfig {
            minimum_sample_size: 0,
            ..TestConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_test_config_from_partial_json() {
        let config: TestConfig =
            serde_json::from_str(r#"{"winner_metric":"click_rate","auto_select_winner":true}"#)
                .unwrap();
        assert_eq!(config.winner_metric, WinnerMetric::ClickRate);
        assert!(config.auto_select_winner);
        assert_eq!(config.minimum_sample_size, 100);
    }

    #[test]
    fn test_engine_config_from_empty_json() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.evaluation_interval(), Duration::from_secs(3600));
    }

    #[test]
    fn test_engine_config_rejects_bad_weights() {
        let result = EngineConfig::builder()
            .engagement_weights(EngagementWeights {
                open: 0.5,
                click: 0.5,
                reply: 0.5,
                conversion: 0.0,
            })
            .build();
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_engine_config_rejects_zero_lease() {
        let result = EngineConfig::from_json_str(r#"{"lock_lease_seconds":0}"#);
        assert!(matches!(result, Err(Error::Validation(_))));
        let config = EngineConfig {
            lock_lease_seconds: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.lock_lease(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_engine_config_rejects_oversized_lease() {
        let result = EngineConfig::builder()
            .lock_lease_seconds(MAX_LOCK_LEASE_SECONDS + 1)
            .build();
        assert!(matches!(result, Err(Error::Validation(_))));

        let huge = EngineConfig::from_json_str(r#"{"lock_lease_seconds":18446744073709551615}"#);
        assert!(matches!(huge, Err(Error::Validation(_))));

        let unchecked = EngineConfig {
            lock_lease_seconds: u64::MAX,
            ..EngineConfig::default()
        };
        assert!(matches!(unchecked.lock_lease(), Err(Error::Validation(_))));

        let widest = EngineConfig::builder()
            .lock_lease_seconds(MAX_LOCK_LEASE_SECONDS)
            .build()
            .unwrap();
        assert_eq!(widest.lock_lease().unwrap(), chrono::Duration::days(1));
    }

    #[test]
    fn test_engine_config_rejects_lease_shorter_than_timeout() {
        let result = EngineConfig::builder()
            .lock_lease_seconds(5)
            .evaluation_timeout_millis(5_001)
            .build();
        assert!(matches!(result, Err(Error::Validation(_))));

        let exact = EngineConfig::builder()
            .lock_lease_seconds(5)
            .evaluation_timeout_millis(5_000)
            .build()
            .unwrap();
        assert_eq!(exact.lock_lease().unwrap(), chrono::Duration::seconds(5));
    }

    #[test]
    fn test_engine_config_rejects_malformed_json() {
        assert!(matches!(
            EngineConfig::from_json_str("{not json"),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_metric_kinds() {
        assert!(WinnerMetric::OpenRate.is_proportion());
        assert!(WinnerMetric::ConversionRate.is_proportion());
        assert!(!WinnerMetric::EngagementScore.is_proportion());
        assert_eq!(WinnerMetric::ClickRate.as_str(), "click_rate");
    }
}
