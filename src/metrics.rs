//! Metric aggregation: raw counters to derived rates
//!
//! All rates are fractions in [0, 1]. Percentages only appear through
//! [`DerivedRates::as_percentages`], for presentation.
//!
//! A zero denominator yields a rate of 0 flagged `low_confidence`. A
//! numerator larger than its denominator (upstream data error) is clamped
//! to 1 and flagged the same way. Aggregation never fails.

use serde::{Deserialize, Serialize};

use crate::config::{EngagementWeights, WinnerMetric};
use crate::experiment::RawCounters;
use crate::stats::{ContinuousSummary, Observations, ProportionSample};

/// A derived rate and whether it rests on usable data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rate {
    /// Fraction in [0, 1], never NaN
    pub value: f64,
    /// Denominator was zero or the ratio had to be clamped
    pub low_confidence: bool,
}

impl Rate {
    /// `numerator / denominator` under the zero-denominator policy.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ratio(numerator: u64, denominator: u64) -> Self {
        if denominator == 0 {
            return Self {
                value: 0.0,
                low_confidence: true,
            };
        }
        if numerator > denominator {
            return Self {
                value: 1.0,
                low_confidence: true,
            };
        }
        Self {
            value: numerator as f64 / denominator as f64,
            low_confidence: false,
        }
    }
}

/// Rates derived from one variant's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedRates {
    /// delivered / sent
    pub delivery_rate: Rate,
    /// opened / delivered
    pub open_rate: Rate,
    /// clicked / opened
    pub click_rate: Rate,
    /// replied / delivered
    pub reply_rate: Rate,
    /// converted / sent
    pub conversion_rate: Rate,
    /// Weighted composite of open, click, reply and conversion rates
    pub engagement_score: Rate,
    /// bounced / sent
    pub bounce_rate: Rate,
    /// unsubscribed / delivered
    pub unsubscribe_rate: Rate,
}

impl DerivedRates {
    /// The rate a test optimizes.
    #[must_use]
    pub const fn metric(&self, metric: WinnerMetric) -> Rate {
        match metric {
            WinnerMetric::OpenRate => self.open_rate,
            WinnerMetric::ClickRate => self.click_rate,
            WinnerMetric::ConversionRate => self.conversion_rate,
            WinnerMetric::EngagementScore => self.engagement_score,
        }
    }

    /// Whether any rate is flagged `low_confidence`.
    #[must_use]
    pub const fn any_low_confidence(&self) -> bool {
        self.delivery_rate.low_confidence
            || self.open_rate.low_confidence
            || self.click_rate.low_confidence
            || self.reply_rate.low_confidence
            || self.conversion_rate.low_confidence
            || self.engagement_score.low_confidence
    }

    /// Rates scaled to percentages for display.
    #[must_use]
    pub fn as_percentages(&self) -> PercentageRates {
        PercentageRates {
            delivery_rate: self.delivery_rate.value * 100.0,
            open_rate: self.open_rate.value * 100.0,
            click_rate: self.click_rate.value * 100.0,
            reply_rate: self.reply_rate.value * 100.0,
            conversion_rate: self.conversion_rate.value * 100.0,
            engagement_score: self.engagement_score.value * 100.0,
            bounce_rate: self.bounce_rate.value * 100.0,
            unsubscribe_rate: self.unsubscribe_rate.value * 100.0,
        }
    }
}

/// Display-only view of [`DerivedRates`] in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct PercentageRates {
    pub delivery_rate: f64,
    pub open_rate: f64,
    pub click_rate: f64,
    pub reply_rate: f64,
    pub conversion_rate: f64,
    pub engagement_score: f64,
    pub bounce_rate: f64,
    pub unsubscribe_rate: f64,
}

/// Converts raw counters into derived rates and test observations.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsAggregator {
    weights: EngagementWeights,
}

impl MetricsAggregator {
    /// Create an aggregator with the given engagement weights.
    #[must_use]
    pub const fn new(weights: EngagementWeights) -> Self {
        Self { weights }
    }

    /// Get the engagement weights.
    #[must_use]
    pub const fn weights(&self) -> &EngagementWeights {
        &self.weights
    }

    /// Derive every rate for one variant.
    #[must_use]
    pub fn aggregate(&self, counters: &RawCounters) -> DerivedRates {
        let open_rate = Rate::ratio(counters.opened, counters.delivered);
        let click_rate = Rate::ratio(counters.clicked, counters.opened);
        let reply_rate = Rate::ratio(counters.replied, counters.delivered);
        let conversion_rate = Rate::ratio(counters.converted, counters.sent);

        let components = [open_rate, click_rate, reply_rate, conversion_rate];
        let score: f64 = self
            .weights
            .as_array()
            .iter()
            .zip(components.iter())
            .map(|(w, r)| w * r.value)
            .sum();
        let engagement_score = Rate {
            value: score.clamp(0.0, 1.0),
            low_confidence: components.iter().any(|r| r.low_confidence),
        };

        DerivedRates {
            delivery_rate: Rate::ratio(counters.delivered, counters.sent),
            open_rate,
            click_rate,
            reply_rate,
            conversion_rate,
            engagement_score,
            bounce_rate: Rate::ratio(counters.bounced, counters.sent),
            unsubscribe_rate: Rate::ratio(counters.unsubscribed, counters.delivered),
        }
    }

    /// Observations of `metric` for the analyzer.
    ///
    /// Proportions use the rate's own numerator and denominator. The
    /// engagement score is modelled per delivered message as a weighted
    /// sum of independent indicators: mean = score,
    /// variance = Σ wᵢ² pᵢ (1 − pᵢ), n = delivered.
    #[must_use]
    pub fn observations(&self, counters: &RawCounters, metric: WinnerMetric) -> Observations {
        match metric {
            WinnerMetric::OpenRate => Observations::Proportion(ProportionSample::new(
                counters.opened,
                counters.delivered,
            )),
            WinnerMetric::ClickRate => Observations::Proportion(ProportionSample::new(
                counters.clicked,
                counters.opened,
            )),
            WinnerMetric::ConversionRate => Observations::Proportion(ProportionSample::new(
                counters.converted,
                counters.sent,
            )),
            WinnerMetric::EngagementScore => {
                let rates = self.aggregate(counters);
                let components = [
                    rates.open_rate.value,
                    rates.click_rate.value,
                    rates.reply_rate.value,
                    rates.conversion_rate.value,
                ];
                let variance: f64 = self
                    .weights
                    .as_array()
                    .iter()
                    .zip(components.iter())
                    .map(|(w, p)| w * w * p * (1.0 - p))
                    .sum();
                Observations::Continuous(ContinuousSummary::new(
                    counters.delivered,
                    rates.engagement_score.value,
                    variance,
                ))
            }
        }
    }
}
