//! Test Result and Winner Decision - append-only evaluation records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::config::TestConfig;
use crate::stats::{Analysis, TestType, VariantStat};

/// Immutable record of one evaluation.
///
/// Results form an append-only log per experiment; fields are only
/// readable, never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    experiment_id: String,
    computed_at: DateTime<Utc>,
    test_type: TestType,
    variants: Vec<VariantStat>,
    statistic: Option<f64>,
    degrees_of_freedom: Option<f64>,
    p_value: Option<f64>,
    is_significant: bool,
    winner_variant_id: Option<u64>,
    relative_lift: Option<f64>,
    skipped_variants: Vec<u64>,
    low_power_warning: bool,
    low_confidence_variants: Vec<u64>,
    reason: Option<String>,
    summary_text: String,
}

impl TestResult {
    /// Record an analysis.
    ///
    /// `low_confidence_variants` lists variants whose derived rates hit
    /// a zero denominator or a clamped ratio.
    #[must_use]
    pub fn from_analysis(
        experiment_id: impl Into<String>,
        computed_at: DateTime<Utc>,
        analysis: Analysis,
        config: &TestConfig,
        low_confidence_variants: Vec<u64>,
    ) -> Self {
        let summary_text = summarize(&analysis, config);
        Self {
            experiment_id: experiment_id.into(),
            computed_at,
            test_type: analysis.test_type,
            variants: analysis.variants,
            statistic: analysis.statistic,
            degrees_of_freedom: analysis.degrees_of_freedom,
            p_value: analysis.p_value,
            is_significant: analysis.is_significant,
            winner_variant_id: analysis.winner_variant_id,
            relative_lift: analysis.relative_lift,
            skipped_variants: analysis.skipped_variants,
            low_power_warning: analysis.low_power_warning,
            low_confidence_variants,
            reason: analysis.reason,
            summary_text,
        }
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the computation timestamp.
    #[must_use]
    pub const fn computed_at(&self) -> DateTime<Utc> {
        self.computed_at
    }

    /// Get the test that was run.
    #[must_use]
    pub const fn test_type(&self) -> TestType {
        self.test_type
    }

    /// Get per-variant sample sizes and metric values.
    #[must_use]
    pub fn variants(&self) -> &[VariantStat] {
        &self.variants
    }

    /// Look up one variant's statistics.
    #[must_use]
    pub fn variant(&self, variant_id: u64) -> Option<&VariantStat> {
        self.variants.iter().find(|v| v.variant_id == variant_id)
    }

    /// Get the test statistic.
    #[must_use]
    pub const fn statistic(&self) -> Option<f64> {
        self.statistic
    }

    /// Get the degrees of freedom.
    #[must_use]
    pub const fn degrees_of_freedom(&self) -> Option<f64> {
        self.degrees_of_freedom
    }

    /// Get the p-value; `None` means "cannot determine".
    #[must_use]
    pub const fn p_value(&self) -> Option<f64> {
        self.p_value
    }

    /// Whether the p-value cleared the significance threshold.
    #[must_use]
    pub const fn is_significant(&self) -> bool {
        self.is_significant
    }

    /// Get the analysis winner, if any.
    #[must_use]
    pub const fn winner_variant_id(&self) -> Option<u64> {
        self.winner_variant_id
    }

    /// Get the winner's relative lift over the runner-up.
    #[must_use]
    pub const fn relative_lift(&self) -> Option<f64> {
        self.relative_lift
    }

    /// Get variants excluded for having no samples.
    #[must_use]
    pub fn skipped_variants(&self) -> &[u64] {
        &self.skipped_variants
    }

    /// Whether expected cell counts fell below 5.
    #[must_use]
    pub const fn low_power_warning(&self) -> bool {
        self.low_power_warning
    }

    /// Get variants whose rates were flagged `low_confidence`.
    #[must_use]
    pub fn low_confidence_variants(&self) -> &[u64] {
        &self.low_confidence_variants
    }

    /// Get the explanation for an undetermined p-value.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Get the human-readable summary.
    #[must_use]
    pub fn summary_text(&self) -> &str {
        &self.summary_text
    }
}

fn summarize(analysis: &Analysis, config: &TestConfig) -> String {
    let metric = config.winner_metric.as_str();
    let mut text = match (analysis.test_type, analysis.p_value) {
        (TestType::None, _) => format!("No test run on {metric}"),
        (test_type, Some(p)) => format!("{test_type} on {metric}: p = {p:.4}"),
        (test_type, None) => format!("{test_type} on {metric}: p-value undetermined"),
    };

    match analysis.winner_variant_id {
        Some(winner) => {
            let value = analysis
                .variants
                .iter()
                .find(|v| v.variant_id == winner)
                .map_or(0.0, |v| v.metric_value);
            let _ = write!(
                text,
                "; variant {winner} wins at {:.0}% confidence with {metric} {:.2}%",
                config.confidence_level,
                value * 100.0
            );
            if let Some(lift) = analysis.relative_lift {
                let _ = write!(text, " ({:+.1}% lift)", lift * 100.0);
            }
        }
        None if analysis.p_value.is_some() => {
            let _ = write!(
                text,
                "; not significant at {:.0}% confidence",
                config.confidence_level
            );
        }
        None => {}
    }

    if let Some(reason) = &analysis.reason {
        let _ = write!(text, " ({reason})");
    }
    if !analysis.skipped_variants.is_empty() {
        let _ = write!(text, "; skipped variants {:?}", analysis.skipped_variants);
    }
    if analysis.low_power_warning {
        text.push_str("; low power: expected cell count below 5");
    }
    text
}

/// Who declared a winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclaredBy {
    /// The decision engine, from a significant analysis
    Auto,
    /// An explicit operator request
    Manual,
}

/// The single, terminal winner of an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WinnerDecision {
    experiment_id: String,
    winner_variant_id: u64,
    declared_at: DateTime<Utc>,
    declared_by: DeclaredBy,
    confidence_level: f64,
    p_value: Option<f64>,
    forced: bool,
}

impl WinnerDecision {
    /// Create a decision record.
    #[must_use]
    pub fn new(
        experiment_id: impl Into<String>,
        winner_variant_id: u64,
        declared_at: DateTime<Utc>,
        declared_by: DeclaredBy,
        confidence_level: f64,
        p_value: Option<f64>,
        forced: bool,
    ) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            winner_variant_id,
            declared_at,
            declared_by,
            confidence_level,
            p_value,
            forced,
        }
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the winning variant.
    #[must_use]
    pub const fn winner_variant_id(&self) -> u64 {
        self.winner_variant_id
    }

    /// Get the declaration timestamp.
    #[must_use]
    pub const fn declared_at(&self) -> DateTime<Utc> {
        self.declared_at
    }

    /// Get who declared the winner.
    #[must_use]
    pub const fn declared_by(&self) -> DeclaredBy {
        self.declared_by
    }

    /// Get the confidence level in force at declaration.
    #[must_use]
    pub const fn confidence_level(&self) -> f64 {
        self.confidence_level
    }

    /// Get the p-value backing the decision, if any.
    #[must_use]
    pub const fn p_value(&self) -> Option<f64> {
        self.p_value
    }

    /// Whether the declaration bypassed the statistical checks.
    #[must_use]
    pub const fn forced(&self) -> bool {
        self.forced
    }
}
