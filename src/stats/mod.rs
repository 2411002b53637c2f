//! Hypothesis testing and winner selection
//!
//! ## Test selection
//!
//! The test is a pure function of the eligible variant count and the
//! metric kind; there is no runtime switch:
//!
//! ```text
//! eligible < 2              -> none
//! eligible = 2, proportion  -> two-proportion z-test
//! eligible = 2, continuous  -> Welch t-test
//! eligible >= 3             -> chi-square over the 2×k table
//! ```
//!
//! Variants with a zero sample size are never eligible; they are reported
//! in `skipped_variants`.
//!
//! ## Winner selection
//!
//! When the p-value is below `1 - confidence/100`, the variant with the
//! highest metric value wins. Values within [`TIE_EPSILON`] of each other
//! are ties and go to the lowest variant ID.

mod chi_square;
pub mod distributions;
mod proportion;
mod sample_size;
mod welch;

pub use chi_square::{chi_square_test, TableColumn};
pub use proportion::{two_proportion_z_test, ProportionSample};
pub use sample_size::{required_sample_size, SampleSizeCalculator, DEFAULT_POWER};
pub use welch::{welch_t_test, ContinuousSummary};

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::config::TestConfig;

/// Expected cell count below which a test is flagged as low power.
pub const MIN_EXPECTED_CELL: f64 = 5.0;

/// Metric values closer than this are considered tied.
pub const TIE_EPSILON: f64 = 1e-9;

/// Which hypothesis test produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestType {
    /// Pooled two-proportion z-test
    #[serde(rename = "z-test")]
    ZTest,
    /// Welch's unequal-variance t-test
    #[serde(rename = "t-test")]
    TTest,
    /// Pearson chi-square over a 2×k table
    #[serde(rename = "chi-square")]
    ChiSquare,
    /// Not enough eligible variants to test
    #[serde(rename = "none")]
    None,
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ZTest => "z-test",
            Self::TTest => "t-test",
            Self::ChiSquare => "chi-square",
            Self::None => "none",
        })
    }
}

/// Pick the test for `eligible` variants of the given metric kind.
#[must_use]
pub const fn select_test(eligible: usize, metric_is_proportion: bool) -> TestType {
    match (eligible, metric_is_proportion) {
        (0 | 1, _) => TestType::None,
        (2, true) => TestType::ZTest,
        (2, false) => TestType::TTest,
        _ => TestType::ChiSquare,
    }
}

/// Output of a single hypothesis test.
#[derive(Debug, Clone, PartialEq)]
pub struct TestStatistic {
    /// z, t or χ² value
    pub statistic: Option<f64>,
    /// Degrees of freedom (t and chi-square)
    pub degrees_of_freedom: Option<f64>,
    /// Two-tailed / upper-tail probability, in [0, 1]
    pub p_value: Option<f64>,
    /// Some expected cell count fell below 5
    pub low_power_warning: bool,
    /// Why the p-value could not be determined
    pub reason: Option<String>,
}

impl TestStatistic {
    /// A result whose p-value cannot be determined.
    #[must_use]
    pub fn undetermined(reason: impl Into<String>) -> Self {
        Self {
            statistic: None,
            degrees_of_freedom: None,
            p_value: None,
            low_power_warning: false,
            reason: Some(reason.into()),
        }
    }
}

/// Per-variant data handed to the analyzer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observations {
    /// Successes out of trials (open, click, conversion rates)
    Proportion(ProportionSample),
    /// Moments of a continuous metric (engagement score)
    Continuous(ContinuousSummary),
}

impl Observations {
    /// Number of observations backing the metric.
    #[must_use]
    pub const fn sample_size(&self) -> u64 {
        match self {
            Self::Proportion(p) => p.trials,
            Self::Continuous(c) => c.n,
        }
    }

    /// Point estimate of the metric.
    #[must_use]
    pub fn metric_value(&self) -> f64 {
        match self {
            Self::Proportion(p) => p.proportion(),
            Self::Continuous(c) => c.mean,
        }
    }

    /// View as moments; a proportion becomes a Bernoulli mean/variance.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_continuous(&self) -> ContinuousSummary {
        match self {
            Self::Proportion(p) => {
                let mean = p.proportion();
                let variance = if p.trials > 1 {
                    mean * (1.0 - mean) * p.trials as f64 / (p.trials - 1) as f64
                } else {
                    0.0
                };
                ContinuousSummary::new(p.trials, mean, variance)
            }
            Self::Continuous(c) => *c,
        }
    }

    /// Column of a success/failure table, if the metric lies in [0, 1].
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_table_column(&self) -> Option<TableColumn> {
        match self {
            Self::Proportion(p) => Some(TableColumn {
                successes: p.successes as f64,
                total: p.trials as f64,
            }),
            Self::Continuous(c) if (0.0..=1.0).contains(&c.mean) => Some(TableColumn {
                successes: c.mean * c.n as f64,
                total: c.n as f64,
            }),
            Self::Continuous(_) => None,
        }
    }
}

/// Observations of one variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariantObservation {
    /// Variant ID
    pub variant_id: u64,
    /// Measured data
    pub observations: Observations,
}

impl VariantObservation {
    /// Pair a variant with its observations.
    #[must_use]
    pub const fn new(variant_id: u64, observations: Observations) -> Self {
        Self {
            variant_id,
            observations,
        }
    }
}

/// Sample size and metric value reported for one variant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariantStat {
    /// Variant ID
    pub variant_id: u64,
    /// Observations backing the metric
    pub sample_size: u64,
    /// Metric value as a fraction
    pub metric_value: f64,
}

/// Outcome of analysing one experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    /// Test that was run
    pub test_type: TestType,
    /// Test statistic, when computed
    pub statistic: Option<f64>,
    /// Degrees of freedom, for t and chi-square
    pub degrees_of_freedom: Option<f64>,
    /// p-value in [0, 1]; `None` means "cannot determine"
    pub p_value: Option<f64>,
    /// `p_value < alpha`
    pub is_significant: bool,
    /// Best variant when significant
    pub winner_variant_id: Option<u64>,
    /// Winner's relative lift over the runner-up
    pub relative_lift: Option<f64>,
    /// Eligible variants in input order
    pub variants: Vec<VariantStat>,
    /// Variants excluded for having no samples
    pub skipped_variants: Vec<u64>,
    /// Expected cell counts below 5
    pub low_power_warning: bool,
    /// Explanation when the p-value is undetermined or no test ran
    pub reason: Option<String>,
}

/// Selects and runs the hypothesis test for a set of variants.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatisticalAnalyzer;

impl StatisticalAnalyzer {
    /// Create an analyzer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Analyse the variants of one experiment.
    ///
    /// Never fails: degenerate inputs produce `p_value = None` with a
    /// reason, and fewer than two eligible variants produce
    /// `TestType::None`.
    #[must_use]
    pub fn analyze(
        &self,
        variants: &[VariantObservation],
        metric_is_proportion: bool,
        config: &TestConfig,
    ) -> Analysis {
        let (eligible, skipped): (Vec<&VariantObservation>, Vec<&VariantObservation>) = variants
            .iter()
            .partition(|v| v.observations.sample_size() > 0);
        let skipped_variants: Vec<u64> = skipped.iter().map(|v| v.variant_id).collect();
        let stats: Vec<VariantStat> = eligible
            .iter()
            .map(|v| VariantStat {
                variant_id: v.variant_id,
                sample_size: v.observations.sample_size(),
                metric_value: v.observations.metric_value(),
            })
            .collect();

        let test_type = select_test(eligible.len(), metric_is_proportion);
        let outcome = match test_type {
            TestType::None => TestStatistic::undetermined(format!(
                "{} eligible variant(s); at least 2 are needed to test",
                eligible.len()
            )),
            TestType::ZTest => {
                match (
                    &eligible[0].observations,
                    &eligible[1].observations,
                ) {
                    (Observations::Proportion(a), Observations::Proportion(b)) => {
                        two_proportion_z_test(*a, *b)
                    }
                    _ => TestStatistic::undetermined(
                        "z-test requires success/trial counts for both variants",
                    ),
                }
            }
            TestType::TTest => welch_t_test(
                eligible[0].observations.as_continuous(),
                eligible[1].observations.as_continuous(),
            ),
            TestType::ChiSquare => {
                let columns: Option<Vec<TableColumn>> = eligible
                    .iter()
                    .map(|v| v.observations.as_table_column())
                    .collect();
                columns.map_or_else(
                    || {
                        TestStatistic::undetermined(
                            "chi-square requires metric values within [0, 1]",
                        )
                    },
                    |columns| chi_square_test(&columns),
                )
            }
        };

        let alpha = config.alpha();
        let is_significant = outcome.p_value.is_some_and(|p| p < alpha);
        let winner_variant_id = if is_significant {
            select_winner(&stats)
        } else {
            None
        };
        let relative_lift = winner_variant_id.and_then(|id| relative_lift(&stats, id));

        debug!(
            %test_type,
            eligible = stats.len(),
            skipped = skipped_variants.len(),
            p_value = ?outcome.p_value,
            winner = ?winner_variant_id,
            "analysis complete"
        );

        Analysis {
            test_type,
            statistic: outcome.statistic,
            degrees_of_freedom: outcome.degrees_of_freedom,
            p_value: outcome.p_value,
            is_significant,
            winner_variant_id,
            relative_lift,
            variants: stats,
            skipped_variants,
            low_power_warning: outcome.low_power_warning,
            reason: outcome.reason,
        }
    }
}

/// Highest metric value; ties go to the lowest variant ID.
///
/// A variant ties when it lies within `TIE_EPSILON` of the maximum.
#[must_use]
pub fn select_winner(stats: &[VariantStat]) -> Option<u64> {
    let max = stats
        .iter()
        .map(|s| s.metric_value)
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))?;
    stats
        .iter()
        .filter(|s| s.metric_value >= max - TIE_EPSILON)
        .map(|s| s.variant_id)
        .min()
}

fn relative_lift(stats: &[VariantStat], winner: u64) -> Option<f64> {
    let winner_value = stats.iter().find(|s| s.variant_id == winner)?.metric_value;
    let runner_up = stats
        .iter()
        .filter(|s| s.variant_id != winner)
        .map(|s| s.metric_value)
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))?;
    (runner_up > 0.0).then(|| (winner_value - runner_up) / runner_up)
}
