//! Experiment service: the engine's public operations
//!
//! - [`ExperimentService::evaluate_experiment`]: evaluate now
//! - [`ExperimentService::latest_result`]: most recent `TestResult`
//! - [`ExperimentService::declare_winner`]: manual (optionally forced) declaration
//! - [`ExperimentService::required_sample_size`]: power analysis
//!
//! Every evaluation runs the pipeline
//!
//! ```text
//! latest snapshots ─> MetricsAggregator ─> StatisticalAnalyzer ─> WinnerDecisionEngine
//! ```
//!
//! under a per-experiment lease and a time budget. A request for an
//! experiment whose lease is held is rejected with
//! `Error::EvaluationInProgress` rather than queued.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::ExperimentBackend;
use crate::clock::{Clock, SystemClock};
use crate::config::{EngineConfig, TestConfig};
use crate::decision::{DecisionOutcome, WinnerDecisionEngine};
use crate::experiment::{Experiment, ExperimentState, RawCounters, TestResult, WinnerDecision};
use crate::lock::EvaluationGuard;
use crate::metrics::MetricsAggregator;
use crate::stats::{required_sample_size, StatisticalAnalyzer, VariantObservation};
use crate::{Error, Result};

/// Outcome of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// The result recorded (or, once terminal, the last one recorded)
    pub result: TestResult,
    /// The experiment's winner, if one exists
    pub decision: Option<WinnerDecision>,
    /// Whether this evaluation declared the winner
    pub newly_declared: bool,
    /// State after the evaluation
    pub state: ExperimentState,
}

/// Entry point for evaluating experiments and declaring winners.
pub struct ExperimentService<B: ExperimentBackend> {
    backend: Arc<B>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    aggregator: MetricsAggregator,
    analyzer: StatisticalAnalyzer,
    engine: WinnerDecisionEngine,
}

impl<B: ExperimentBackend> ExperimentService<B> {
    /// Create a service over `backend` using the system clock.
    #[must_use]
    pub fn new(backend: Arc<B>, config: EngineConfig) -> Self {
        Self {
            aggregator: MetricsAggregator::new(config.engagement_weights),
            backend,
            config,
            clock: Arc::new(SystemClock),
            analyzer: StatisticalAnalyzer::new(),
            engine: WinnerDecisionEngine::new(),
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Get the backend.
    #[must_use]
    pub const fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Get the engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get the clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Evaluate an experiment now and return the recorded result.
    ///
    /// After a winner is declared this returns the last recorded result
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns `Error::EvaluationInProgress` if another evaluation holds
    /// the lease, `Error::Timeout` if the budget is exceeded, and
    /// collaborator or validation errors otherwise.
    pub async fn evaluate_experiment(&self, experiment_id: &str) -> Result<TestResult> {
        self.evaluate_at(experiment_id, self.clock.now())
            .await
            .map(|evaluation| evaluation.result)
    }

    /// Evaluate an experiment as of `now`.
    ///
    /// # Errors
    ///
    /// See [`Self::evaluate_experiment`].
    pub async fn evaluate_at(&self, experiment_id: &str, now: DateTime<Utc>) -> Result<Evaluation> {
        let outcome = self
            .with_budget(experiment_id, self.evaluate_locked(experiment_id, now))
            .await;
        if matches!(outcome, Err(Error::Timeout { .. })) {
            self.reset_after_timeout(experiment_id).await;
        }
        outcome
    }

    /// Most recent result for an experiment, if any.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownExperiment` or collaborator errors.
    pub async fn latest_result(&self, experiment_id: &str) -> Result<Option<TestResult>> {
        self.backend.latest_result(experiment_id).await
    }

    /// Declare a winner by hand.
    ///
    /// With `forced` the sample size and significance checks are skipped
    /// and the decision is recorded as forced. Without it the latest
    /// analysis must support the variant. If a winner already exists it is
    /// returned unchanged whatever variant was requested.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownVariant`, `Error::NotReady`,
    /// `Error::EvaluationInProgress`, `Error::Timeout` or collaborator
    /// errors.
    pub async fn declare_winner(
        &self,
        experiment_id: &str,
        variant_id: u64,
        forced: bool,
    ) -> Result<WinnerDecision> {
        let now = self.clock.now();
        self.with_budget(
            experiment_id,
            self.declare_locked(experiment_id, variant_id, forced, now),
        )
        .await
    }

    /// Samples per variant needed to detect a relative lift.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for out-of-range inputs.
    pub fn required_sample_size(
        &self,
        baseline_rate: f64,
        minimum_detectable_effect: f64,
        confidence_level: f64,
        power: f64,
    ) -> Result<u64> {
        required_sample_size(
            baseline_rate,
            minimum_detectable_effect,
            confidence_level,
            power,
        )
    }

    async fn with_budget<T>(
        &self,
        experiment_id: &str,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let budget = self.config.evaluation_timeout();
        tokio::time::timeout(budget, work).await.unwrap_or_else(|_| {
            warn!(experiment_id, budget_ms = self.config.evaluation_timeout_millis, "evaluation timed out");
            Err(Error::Timeout {
                experiment_id: experiment_id.to_string(),
                millis: self.config.evaluation_timeout_millis,
            })
        })
    }

    fn lease(&self, experiment_id: &str, now: DateTime<Utc>) -> Result<EvaluationGuard<B>> {
        EvaluationGuard::acquire(&self.backend, experiment_id, now, self.config.lock_lease()?)?
            .ok_or_else(|| Error::EvaluationInProgress(experiment_id.to_string()))
    }

    async fn evaluate_locked(&self, experiment_id: &str, now: DateTime<Utc>) -> Result<Evaluation> {
        let _lease = self.lease(experiment_id, now)?;

        let experiment = self.backend.experiment(experiment_id).await?;
        if let Some(decision) = self.backend.winner_decision(experiment_id).await? {
            return self.terminal_evaluation(&experiment, decision, now).await;
        }

        let entering = self.engine.begin_evaluation(&experiment)?;
        self.backend.set_state(experiment_id, entering).await?;

        match self.run_pipeline(&experiment, now).await {
            Ok(evaluation) => Ok(evaluation),
            Err(e) => {
                self.reset_state(experiment_id).await;
                Err(e)
            }
        }
    }

    async fn run_pipeline(&self, experiment: &Experiment, now: DateTime<Utc>) -> Result<Evaluation> {
        let experiment_id = experiment.experiment_id();
        let config = self.backend.test_config(experiment_id).await?;
        config.validate()?;

        let result = self.analyze(experiment, &config, now).await?;
        self.backend.append_result(result.clone()).await?;

        let outcome = self.engine.decide(experiment, &config, &result, None, now);
        let next_state = outcome.next_state();
        let (decision, newly_declared) = match outcome {
            DecisionOutcome::Declare(decision) => {
                let stored = self.backend.record_decision(decision.clone()).await?;
                let newly_declared = stored == decision;
                if newly_declared {
                    info!(
                        experiment_id,
                        winner = stored.winner_variant_id(),
                        "winner declared"
                    );
                }
                (Some(stored), newly_declared)
            }
            DecisionOutcome::AlreadyDeclared(decision) => (Some(decision), false),
            DecisionOutcome::Continue { reason } => {
                debug!(experiment_id, %reason, "no winner this evaluation");
                (None, false)
            }
        };
        self.backend.set_state(experiment_id, next_state).await?;

        Ok(Evaluation {
            result,
            decision,
            newly_declared,
            state: next_state,
        })
    }

    /// Read the latest counters and run the analyzer; does not persist.
    async fn analyze(
        &self,
        experiment: &Experiment,
        config: &TestConfig,
        now: DateTime<Utc>,
    ) -> Result<TestResult> {
        let experiment_id = experiment.experiment_id();
        let snapshots = self.backend.latest_snapshots(experiment_id).await?;
        let latest: HashMap<u64, (RawCounters, bool)> = snapshots
            .iter()
            .map(|s| (s.variant_id(), (*s.counters(), s.is_clamped())))
            .collect();

        let metric = config.winner_metric;
        let mut low_confidence = Vec::new();
        let observations: Vec<VariantObservation> = experiment
            .variants()
            .iter()
            .map(|variant| {
                let (raw, clamped) = latest.get(&variant.id()).copied().unwrap_or_default();
                if clamped || self.aggregator.aggregate(&raw).metric(metric).low_confidence {
                    low_confidence.push(variant.id());
                }
                VariantObservation::new(variant.id(), self.aggregator.observations(&raw, metric))
            })
            .collect();

        let analysis = self
            .analyzer
            .analyze(&observations, metric.is_proportion(), config);
        debug!(
            experiment_id,
            metric = metric.as_str(),
            test_type = %analysis.test_type,
            p_value = ?analysis.p_value,
            "experiment analysed"
        );
        Ok(TestResult::from_analysis(
            experiment_id,
            now,
            analysis,
            config,
            low_confidence,
        ))
    }

    /// Evaluation of a decided experiment: no new analysis once a result
    /// exists, so repeated calls return identical output.
    async fn terminal_evaluation(
        &self,
        experiment: &Experiment,
        decision: WinnerDecision,
        now: DateTime<Utc>,
    ) -> Result<Evaluation> {
        let experiment_id = experiment.experiment_id();
        self.backend
            .set_state(experiment_id, ExperimentState::WinnerDeclared)
            .await?;

        let result = match self.backend.latest_result(experiment_id).await? {
            Some(result) => result,
            None => {
                // Forced before any evaluation: record one analysis, once.
                let config = self.backend.test_config(experiment_id).await?;
                let result = self.analyze(experiment, &config, now).await?;
                self.backend.append_result(result.clone()).await?;
                result
            }
        };

        Ok(Evaluation {
            result,
            decision: Some(decision),
            newly_declared: false,
            state: ExperimentState::WinnerDeclared,
        })
    }

    async fn declare_locked(
        &self,
        experiment_id: &str,
        variant_id: u64,
        forced: bool,
        now: DateTime<Utc>,
    ) -> Result<WinnerDecision> {
        let _lease = self.lease(experiment_id, now)?;

        let experiment = self.backend.experiment(experiment_id).await?;
        let config = self.backend.test_config(experiment_id).await?;
        let latest = self.backend.latest_result(experiment_id).await?;
        let existing = self.backend.winner_decision(experiment_id).await?;

        let outcome = self.engine.declare_manually(
            &experiment,
            &config,
            variant_id,
            forced,
            latest.as_ref(),
            existing.as_ref(),
            now,
        )?;

        match outcome {
            DecisionOutcome::AlreadyDeclared(decision) => {
                if decision.winner_variant_id() != variant_id {
                    warn!(
                        experiment_id,
                        requested = variant_id,
                        existing = decision.winner_variant_id(),
                        "winner already declared; keeping existing decision"
                    );
                }
                Ok(decision)
            }
            DecisionOutcome::Declare(decision) => {
                let stored = self.backend.record_decision(decision).await?;
                self.backend
                    .set_state(experiment_id, ExperimentState::WinnerDeclared)
                    .await?;
                Ok(stored)
            }
            DecisionOutcome::Continue { reason } => Err(Error::NotReady(reason)),
        }
    }

    /// The timed-out future dropped its lease. Undo its `Evaluating`
    /// marker only under a fresh lease, so a newer holder keeps its state.
    async fn reset_after_timeout(&self, experiment_id: &str) {
        match self.lease(experiment_id, self.clock.now()) {
            Ok(_lease) => self.reset_state(experiment_id).await,
            Err(Error::EvaluationInProgress(_)) => {
                debug!(experiment_id, "lease taken by a newer evaluation; leaving state");
            }
            Err(e) => warn!(experiment_id, error = %e, "failed to reset experiment state"),
        }
    }

    async fn reset_state(&self, experiment_id: &str) {
        if let Err(e) = self
            .backend
            .set_state(experiment_id, ExperimentState::Running)
            .await
        {
            warn!(experiment_id, error = %e, "failed to reset experiment state");
        }
    }
}
