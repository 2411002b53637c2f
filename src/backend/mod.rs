//! Collaborator interfaces consumed by the engine
//!
//! The engine reads raw counters from a [`MetricsSource`], settings from a
//! [`ConfigStore`], lifecycle data from an [`ExperimentRegistry`], and
//! appends results to a [`ResultSink`]. Evaluations are serialized with an
//! [`EvaluationLock`]. [`MemoryExperimentStore`] implements all of them
//! for embedding and tests.
//!
//! # Example
//!
//! ```rust
//! use campaign_experiments::backend::{MemoryExperimentStore, MetricsSource};
//! use campaign_experiments::experiment::{Experiment, MetricSnapshot, RawCounters, Variant};
//!
//! # async fn example() -> campaign_experiments::Result<()> {
//! let store = MemoryExperimentStore::new();
//! let mut exp = Experiment::builder("exp-1", "Subject line")
//!     .variant(Variant::new(1, "A", 50.0))
//!     .variant(Variant::new(2, "B", 50.0))
//!     .build();
//! exp.start(chrono::Utc::now())?;
//! store.add_experiment(exp);
//!
//! let counters = RawCounters { sent: 100, delivered: 98, ..RawCounters::default() };
//! store.record_snapshot("exp-1", MetricSnapshot::new(1, counters))?;
//! assert_eq!(store.latest_snapshots("exp-1").await?.len(), 1);
//! # Ok(())
//! # }
//! ```

mod memory;

pub use memory::MemoryExperimentStore;

use std::future::Future;

use crate::config::TestConfig;
use crate::experiment::{
    Experiment, ExperimentState, MetricSnapshot, RunSummary, TestResult, WinnerDecision,
};
use crate::lock::EvaluationLock;
use crate::Result;

/// Source of raw per-variant counters.
pub trait MetricsSource: Send + Sync {
    /// Latest snapshot of each variant, as one consistent read.
    ///
    /// Variants without data may be absent.
    fn latest_snapshots(
        &self,
        experiment_id: &str,
    ) -> impl Future<Output = Result<Vec<MetricSnapshot>>> + Send;
}

/// Source of per-experiment test settings.
pub trait ConfigStore: Send + Sync {
    /// Test configuration of an experiment.
    fn test_config(&self, experiment_id: &str) -> impl Future<Output = Result<TestConfig>> + Send;
}

/// Experiment definitions, lifecycle state and failure bookkeeping.
pub trait ExperimentRegistry: Send + Sync {
    /// IDs of experiments in `Running` or `Evaluating` state.
    fn active_experiment_ids(&self) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Experiment definition and current state.
    fn experiment(&self, experiment_id: &str) -> impl Future<Output = Result<Experiment>> + Send;

    /// Move an experiment to a new state. `WinnerDeclared` is sticky.
    fn set_state(
        &self,
        experiment_id: &str,
        state: ExperimentState,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Count a failed evaluation; returns the consecutive failure count.
    fn record_failure(&self, experiment_id: &str) -> impl Future<Output = Result<u32>> + Send;

    /// Reset the failure count and clear any review flag.
    fn clear_failures(&self, experiment_id: &str) -> impl Future<Output = Result<()>> + Send;

    /// Mark an experiment as needing manual review. It stays active.
    fn flag_for_review(&self, experiment_id: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Append-only persistence for results, decisions and sweep summaries.
pub trait ResultSink: Send + Sync {
    /// Append a result to the experiment's log.
    fn append_result(&self, result: TestResult) -> impl Future<Output = Result<()>> + Send;

    /// Most recent result, if any.
    fn latest_result(
        &self,
        experiment_id: &str,
    ) -> impl Future<Output = Result<Option<TestResult>>> + Send;

    /// The experiment's winner, if declared.
    fn winner_decision(
        &self,
        experiment_id: &str,
    ) -> impl Future<Output = Result<Option<WinnerDecision>>> + Send;

    /// Store a decision unless one exists; returns the stored decision.
    ///
    /// Implementations must be insert-if-absent so a decision is never
    /// overwritten.
    fn record_decision(
        &self,
        decision: WinnerDecision,
    ) -> impl Future<Output = Result<WinnerDecision>> + Send;

    /// Append a sweep summary.
    fn append_run_summary(&self, summary: RunSummary) -> impl Future<Output = Result<()>> + Send;
}

/// Everything the engine needs from its environment.
pub trait ExperimentBackend:
    MetricsSource + ConfigStore + ExperimentRegistry + ResultSink + EvaluationLock
{
}

impl<T> ExperimentBackend for T where
    T: MetricsSource + ConfigStore + ExperimentRegistry + ResultSink + EvaluationLock
{
}
