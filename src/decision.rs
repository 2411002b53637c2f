//! Winner decision state machine
//!
//! ```text
//! RUNNING ──> EVALUATING ──> WINNER_DECLARED   (terminal)
//!    ^             │
//!    └─────────────┘  insufficient data / no winner / auto select off
//! ```
//!
//! An automatic declaration needs every variant at or above
//! `minimum_sample_size`, a winner from the analysis, and
//! `auto_select_winner`. A forced manual declaration skips the first two
//! checks. Once a decision exists every further call returns it unchanged.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::TestConfig;
use crate::experiment::{
    DeclaredBy, Experiment, ExperimentState, TestResult, WinnerDecision,
};
use crate::{Error, Result};

/// What an evaluation concluded.
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionOutcome {
    /// A decision already existed and was returned untouched
    AlreadyDeclared(WinnerDecision),
    /// A new decision should be recorded
    Declare(WinnerDecision),
    /// No decision this time; the experiment keeps running
    Continue {
        /// Why no winner was declared
        reason: String,
    },
}

impl DecisionOutcome {
    /// State the experiment moves to after this outcome.
    #[must_use]
    pub const fn next_state(&self) -> ExperimentState {
        match self {
            Self::AlreadyDeclared(_) | Self::Declare(_) => ExperimentState::WinnerDeclared,
            Self::Continue { .. } => ExperimentState::Running,
        }
    }

    /// The decision carried by this outcome, if any.
    #[must_use]
    pub const fn decision(&self) -> Option<&WinnerDecision> {
        match self {
            Self::AlreadyDeclared(d) | Self::Declare(d) => Some(d),
            Self::Continue { .. } => None,
        }
    }
}

/// Combines analysis results with test settings to declare winners.
#[derive(Debug, Clone, Copy, Default)]
pub struct WinnerDecisionEngine;

impl WinnerDecisionEngine {
    /// Create an engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// State to enter when an evaluation starts.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for experiments that have not started.
    pub fn begin_evaluation(&self, experiment: &Experiment) -> Result<ExperimentState> {
        match experiment.state() {
            ExperimentState::Draft => Err(Error::Validation(format!(
                "experiment {} has not been started",
                experiment.experiment_id()
            ))),
            ExperimentState::Running | ExperimentState::Evaluating => {
                Ok(ExperimentState::Evaluating)
            }
            ExperimentState::WinnerDeclared => Ok(ExperimentState::WinnerDeclared),
        }
    }

    /// Decide after an automatic evaluation.
    #[must_use]
    pub fn decide(
        &self,
        experiment: &Experiment,
        config: &TestConfig,
        result: &TestResult,
        existing: Option<&WinnerDecision>,
        now: DateTime<Utc>,
    ) -> DecisionOutcome {
        if let Some(decision) = existing {
            return DecisionOutcome::AlreadyDeclared(decision.clone());
        }

        if let Some(reason) = undersampled(experiment, result, config.minimum_sample_size) {
            return DecisionOutcome::Continue { reason };
        }

        let Some(winner) = result.winner_variant_id() else {
            return DecisionOutcome::Continue {
                reason: "analysis found no significant winner".to_string(),
            };
        };

        if !config.auto_select_winner {
            return DecisionOutcome::Continue {
                reason: format!(
                    "variant {winner} is significant but auto_select_winner is disabled"
                ),
            };
        }

        info!(
            experiment_id = experiment.experiment_id(),
            winner,
            p_value = ?result.p_value(),
            "declaring winner automatically"
        );
        DecisionOutcome::Declare(WinnerDecision::new(
            experiment.experiment_id(),
            winner,
            now,
            DeclaredBy::Auto,
            config.confidence_level,
            result.p_value(),
            false,
        ))
    }

    /// Decide on an explicit operator declaration.
    ///
    /// A forced declaration bypasses the sample size and significance
    /// checks. An unforced one must agree with the latest analysis.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownVariant` for a variant outside the
    /// experiment, `Error::Validation` for a draft experiment, and
    /// `Error::NotReady` when an unforced declaration fails its checks.
    pub fn declare_manually(
        &self,
        experiment: &Experiment,
        config: &TestConfig,
        variant_id: u64,
        forced: bool,
        latest: Option<&TestResult>,
        existing: Option<&WinnerDecision>,
        now: DateTime<Utc>,
    ) -> Result<DecisionOutcome> {
        if let Some(decision) = existing {
            return Ok(DecisionOutcome::AlreadyDeclared(decision.clone()));
        }
        if experiment.variant(variant_id).is_none() {
            return Err(Error::UnknownVariant {
                experiment_id: experiment.experiment_id().to_string(),
                variant_id,
            });
        }
        if experiment.state() == ExperimentState::Draft {
            return Err(Error::Validation(format!(
                "experiment {} has not been started",
                experiment.experiment_id()
            )));
        }

        if !forced {
            let Some(result) = latest else {
                return Err(Error::NotReady(
                    "no evaluation has been recorded yet".to_string(),
                ));
            };
            if let Some(reason) = undersampled(experiment, result, config.minimum_sample_size) {
                return Err(Error::NotReady(reason));
            }
            if result.winner_variant_id() != Some(variant_id) {
                return Err(Error::NotReady(format!(
                    "latest analysis does not support variant {variant_id} (winner: {:?})",
                    result.winner_variant_id()
                )));
            }
        }

        info!(
            experiment_id = experiment.experiment_id(),
            winner = variant_id,
            forced,
            "declaring winner manually"
        );
        Ok(DecisionOutcome::Declare(WinnerDecision::new(
            experiment.experiment_id(),
            variant_id,
            now,
            DeclaredBy::Manual,
            config.confidence_level,
            latest.and_then(TestResult::p_value),
            forced,
        )))
    }
}

/// First variant below the minimum sample size, as a reason string.
fn undersampled(experiment: &Experiment, result: &TestResult, minimum: u64) -> Option<String> {
    experiment.variants().iter().find_map(|variant| {
        let samples = result
            .variant(variant.id())
            .map_or(0, |stat| stat.sample_size);
        (samples < minimum).then(|| {
            format!(
                "variant {} has {samples} samples, below the minimum of {minimum}",
                variant.id()
            )
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{Analysis, TestType, VariantStat};

    fn config(auto: bool) -> TestConfig {
        TestConfig {
            auto_select_winner: auto,
            ..TestConfig::default()
        }
    }

    fn experiment(auto: bool) -> Experiment {
        let mut exp = Experiment::builder("exp-1", "Subject line")
            .variant(crate::experiment::Variant::new(1, "A", 50.0))
            .variant(crate::experiment::Variant::new(2, "B", 50.0))
            .config(config(auto))
            .build();
        exp.start(Utc::now()).unwrap();
        exp
    }

    fn result(samples: u64, winner: Option<u64>) -> TestResult {
        let analysis = Analysis {
            test_type: TestType::ZTest,
            statistic: Some(2.5),
            degrees_of_freedom: None,
            p_value: Some(if winner.is_some() { 0.01 } else { 0.4 }),
            is_significant: winner.is_some(),
            winner_variant_id: winner,
            relative_lift: None,
            variants: vec![
                VariantStat {
                    variant_id: 1,
                    sample_size: samples,
                    metric_value: 0.1,
                },
                VariantStat {
                    variant_id: 2,
                    sample_size: samples,
                    metric_value: 0.2,
                },
            ],
            skipped_variants: vec![],
            low_power_warning: false,
            reason: None,
        };
        TestResult::from_analysis("exp-1", Utc::now(), analysis, &TestConfig::default(), vec![])
    }

    #[test]
    fn test_auto_declares_when_all_conditions_hold() {
        let engine = WinnerDecisionEngine::new();
        let outcome = engine.decide(
            &experiment(true),
            &config(true),
            &result(500, Some(2)),
            None,
            Utc::now(),
        );
        let decision = outcome.decision().unwrap();
        assert_eq!(decision.winner_variant_id(), 2);
        assert_eq!(decision.declared_by(), DeclaredBy::Auto);
        assert!(!decision.forced());
        assert_eq!(outcome.next_state(), ExperimentState::WinnerDeclared);
    }

    #[test]
    fn test_insufficient_samples_keeps_running() {
        let outcome = WinnerDecisionEngine::new().decide(
            &experiment(true),
            &config(true),
            &result(50, Some(2)),
            None,
            Utc::now(),
        );
        assert!(matches!(outcome, DecisionOutcome::Continue { .. }));
        assert_eq!(outcome.next_state(), ExperimentState::Running);
    }

    #[test]
    fn test_auto_select_disabled_keeps_running() {
        let outcome = WinnerDecisionEngine::new().decide(
            &experiment(false),
            &config(false),
            &result(500, Some(2)),
            None,
            Utc::now(),
        );
        match outcome {
            DecisionOutcome::Continue { reason } => assert!(reason.contains("auto_select_winner")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_existing_decision_returned_unchanged() {
        let existing =
            WinnerDecision::new("exp-1", 1, Utc::now(), DeclaredBy::Manual, 95.0, None, true);
        let outcome = WinnerDecisionEngine::new().decide(
            &experiment(true),
            &config(true),
            &result(500, Some(2)),
            Some(&existing),
            Utc::now(),
        );
        assert_eq!(outcome, DecisionOutcome::AlreadyDeclared(existing));
    }

    #[test]
    fn test_forced_manual_bypasses_checks() {
        let outcome = WinnerDecisionEngine::new()
            .declare_manually(&experiment(false), &config(false), 1, true, None, None, Utc::now())
            .unwrap();
        let decision = outcome.decision().unwrap();
        assert_eq!(decision.declared_by(), DeclaredBy::Manual);
        assert!(decision.forced());
        assert_eq!(decision.winner_variant_id(), 1);
    }

    #[test]
    fn test_unforced_manual_requires_agreeing_analysis() {
        let engine = WinnerDecisionEngine::new();
        let exp = experiment(false);
        let cfg = config(false);
        let latest = result(500, Some(2));

        assert!(matches!(
            engine.declare_manually(&exp, &cfg, 1, false, Some(&latest), None, Utc::now()),
            Err(Error::NotReady(_))
        ));
        assert!(matches!(
            engine.declare_manually(&exp, &cfg, 2, false, None, None, Utc::now()),
            Err(Error::NotReady(_))
        ));

        let outcome = engine
            .declare_manually(&exp, &cfg, 2, false, Some(&latest), None, Utc::now())
            .unwrap();
        let decision = outcome.decision().unwrap();
        assert!(!decision.forced());
        assert_eq!(decision.p_value(), Some(0.01));
    }

    #[test]
    fn test_manual_unknown_variant() {
        let result = WinnerDecisionEngine::new().declare_manually(
            &experiment(false),
            &config(false),
            42,
            true,
            None,
            None,
            Utc::now(),
        );
        assert!(matches!(result, Err(Error::UnknownVariant { variant_id: 42, .. })));
    }

    #[test]
    fn test_begin_evaluation_transitions() {
        let engine = WinnerDecisionEngine::new();
        assert_eq!(
            engine.begin_evaluation(&experiment(true)).unwrap(),
            ExperimentState::Evaluating
        );
        let draft = Experiment::new("exp-2", "Draft");
        assert!(engine.begin_evaluation(&draft).is_err());
    }
}
