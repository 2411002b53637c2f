//! In-memory experiment store using `DashMap`.
//!
//! Data is lost on process restart. The store implements every
//! collaborator trait, so it can back an engine directly.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::{PoisonError, RwLock};
use tracing::warn;

use super::{ConfigStore, ExperimentRegistry, MetricsSource, ResultSink};
use crate::config::TestConfig;
use crate::experiment::{
    Experiment, ExperimentState, MetricSnapshot, RunSummary, TestResult, WinnerDecision,
};
use crate::lock::{EvaluationLock, LeaseToken, MemoryEvaluationLock};
use crate::{Error, Result};

#[derive(Debug)]
struct ExperimentEntry {
    experiment: Experiment,
    snapshots: Vec<MetricSnapshot>,
    results: Vec<TestResult>,
    decision: Option<WinnerDecision>,
    consecutive_failures: u32,
    flagged_for_review: bool,
}

impl ExperimentEntry {
    fn new(experiment: Experiment) -> Self {
        Self {
            experiment,
            snapshots: Vec::new(),
            results: Vec::new(),
            decision: None,
            consecutive_failures: 0,
            flagged_for_review: false,
        }
    }
}

/// In-memory store for experiments, snapshots, results and decisions.
///
/// Thread-safe; each experiment lives in its own `DashMap` shard entry so
/// evaluations of different experiments never contend.
///
/// # Example
///
/// ```rust
/// use campaign_experiments::backend::MemoryExperimentStore;
/// use campaign_experiments::experiment::{Experiment, Variant};
///
/// let store = MemoryExperimentStore::new();
/// store.add_experiment(
///     Experiment::builder("exp-1", "Subject line")
///         .variant(Variant::new(1, "A", 50.0))
///         .variant(Variant::new(2, "B", 50.0))
///         .build(),
/// );
/// assert_eq!(store.experiment_count(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemoryExperimentStore {
    experiments: DashMap<String, ExperimentEntry>,
    run_summaries: RwLock<Vec<RunSummary>>,
    lock: MemoryEvaluationLock,
}

impl MemoryExperimentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the store holds no experiments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }

    /// Number of experiments in the store.
    #[must_use]
    pub fn experiment_count(&self) -> usize {
        self.experiments.len()
    }

    /// Add or replace an experiment definition.
    pub fn add_experiment(&self, experiment: Experiment) {
        self.experiments.insert(
            experiment.experiment_id().to_string(),
            ExperimentEntry::new(experiment),
        );
    }

    /// Start a draft experiment.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownExperiment`, or `Error::Validation` if the
    /// definition is invalid.
    pub fn start_experiment(&self, experiment_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.with_entry(experiment_id, |entry| entry.experiment.start(now))?
    }

    /// Replace an experiment's test configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` once a winner is declared or if the
    /// configuration is invalid.
    pub fn set_config(&self, experiment_id: &str, config: TestConfig) -> Result<()> {
        self.with_entry(experiment_id, |entry| entry.experiment.set_config(config))?
    }

    /// Record a counter snapshot for one variant.
    ///
    /// A snapshot whose counters went backwards is stored but logged,
    /// since writers are external.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownExperiment` or `Error::UnknownVariant`.
    pub fn record_snapshot(&self, experiment_id: &str, snapshot: MetricSnapshot) -> Result<()> {
        self.with_entry(experiment_id, |entry| {
            let variant_id = snapshot.variant_id();
            if entry.experiment.variant(variant_id).is_none() {
                return Err(Error::UnknownVariant {
                    experiment_id: experiment_id.to_string(),
                    variant_id,
                });
            }
            if let Some(previous) = latest_for(&entry.snapshots, variant_id) {
                if !snapshot.counters().is_successor_of(previous.counters()) {
                    warn!(
                        experiment_id,
                        variant_id, "counters decreased since the previous snapshot"
                    );
                }
            }
            entry.snapshots.push(snapshot);
            Ok(())
        })?
    }

    /// Every snapshot recorded for an experiment, oldest first.
    #[must_use]
    pub fn snapshots(&self, experiment_id: &str) -> Vec<MetricSnapshot> {
        self.experiments
            .get(experiment_id)
            .map(|e| e.snapshots.clone())
            .unwrap_or_default()
    }

    /// The full result log of an experiment, oldest first.
    #[must_use]
    pub fn results(&self, experiment_id: &str) -> Vec<TestResult> {
        self.experiments
            .get(experiment_id)
            .map(|e| e.results.clone())
            .unwrap_or_default()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self, experiment_id: &str) -> Option<ExperimentState> {
        self.experiments
            .get(experiment_id)
            .map(|e| e.experiment.state())
    }

    /// Consecutive failed evaluations.
    #[must_use]
    pub fn consecutive_failures(&self, experiment_id: &str) -> u32 {
        self.experiments
            .get(experiment_id)
            .map_or(0, |e| e.consecutive_failures)
    }

    /// Whether the experiment is flagged for manual review.
    #[must_use]
    pub fn is_flagged_for_review(&self, experiment_id: &str) -> bool {
        self.experiments
            .get(experiment_id)
            .is_some_and(|e| e.flagged_for_review)
    }

    /// Every sweep summary, oldest first.
    #[must_use]
    pub fn run_summaries(&self) -> Vec<RunSummary> {
        self.run_summaries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether an evaluation lease is held for the experiment.
    #[must_use]
    pub fn is_evaluation_in_progress(&self, experiment_id: &str) -> bool {
        self.lock.is_held(experiment_id)
    }

    fn with_entry<T>(
        &self,
        experiment_id: &str,
        f: impl FnOnce(&mut ExperimentEntry) -> T,
    ) -> Result<T> {
        let mut entry = self
            .experiments
            .get_mut(experiment_id)
            .ok_or_else(|| Error::UnknownExperiment(experiment_id.to_string()))?;
        Ok(f(entry.value_mut()))
    }
}

/// Latest snapshot of a variant; on equal capture times the later insert wins.
fn latest_for(snapshots: &[MetricSnapshot], variant_id: u64) -> Option<&MetricSnapshot> {
    snapshots
        .iter()
        .filter(|s| s.variant_id() == variant_id)
        .fold(None, |best: Option<&MetricSnapshot>, s| match best {
            Some(b) if b.timestamp() > s.timestamp() => Some(b),
            _ => Some(s),
        })
}

impl MetricsSource for MemoryExperimentStore {
    async fn latest_snapshots(&self, experiment_id: &str) -> Result<Vec<MetricSnapshot>> {
        self.with_entry(experiment_id, |entry| {
            entry
                .experiment
                .variants()
                .iter()
                .filter_map(|v| latest_for(&entry.snapshots, v.id()).cloned())
                .collect()
        })
    }
}

impl ConfigStore for MemoryExperimentStore {
    async fn test_config(&self, experiment_id: &str) -> Result<TestConfig> {
        self.with_entry(experiment_id, |entry| *entry.experiment.config())
    }
}

impl ExperimentRegistry for MemoryExperimentStore {
    async fn active_experiment_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .experiments
            .iter()
            .filter(|e| e.experiment.state().is_active())
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn experiment(&self, experiment_id: &str) -> Result<Experiment> {
        self.with_entry(experiment_id, |entry| entry.experiment.clone())
    }

    async fn set_state(&self, experiment_id: &str, state: ExperimentState) -> Result<()> {
        self.with_entry(experiment_id, |entry| entry.experiment.set_state(state))
    }

    async fn record_failure(&self, experiment_id: &str) -> Result<u32> {
        self.with_entry(experiment_id, |entry| {
            entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
            entry.consecutive_failures
        })
    }

    async fn clear_failures(&self, experiment_id: &str) -> Result<()> {
        self.with_entry(experiment_id, |entry| {
            entry.consecutive_failures = 0;
            entry.flagged_for_review = false;
        })
    }

    async fn flag_for_review(&self, experiment_id: &str) -> Result<()> {
        self.with_entry(experiment_id, |entry| entry.flagged_for_review = true)
    }
}

impl ResultSink for MemoryExperimentStore {
    async fn append_result(&self, result: TestResult) -> Result<()> {
        let experiment_id = result.experiment_id().to_string();
        self.with_entry(&experiment_id, |entry| entry.results.push(result))
    }

    async fn latest_result(&self, experiment_id: &str) -> Result<Option<TestResult>> {
        self.with_entry(experiment_id, |entry| entry.results.last().cloned())
    }

    async fn winner_decision(&self, experiment_id: &str) -> Result<Option<WinnerDecision>> {
        self.with_entry(experiment_id, |entry| entry.decision.clone())
    }

    async fn record_decision(&self, decision: WinnerDecision) -> Result<WinnerDecision> {
        let experiment_id = decision.experiment_id().to_string();
        self.with_entry(&experiment_id, |entry| {
            if let Some(existing) = &entry.decision {
                return existing.clone();
            }
            entry
                .experiment
                .set_state(ExperimentState::WinnerDeclared);
            entry.decision = Some(decision.clone());
            decision
        })
    }

    async fn append_run_summary(&self, summary: RunSummary) -> Result<()> {
        self.run_summaries
            .write()
            .map_err(|_| Error::Store("run summary log poisoned".to_string()))?
            .push(summary);
        Ok(())
    }
}

impl EvaluationLock for MemoryExperimentStore {
    fn try_acquire(
        &self,
        experiment_id: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<LeaseToken>> {
        self.lock.try_acquire(experiment_id, now, lease)
    }

    fn release(&self, experiment_id: &str, token: LeaseToken) -> Result<()> {
        self.lock.release(experiment_id, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::{DeclaredBy, RawCounters, Variant};

    fn running_store() -> MemoryExperimentStore {
        let store = MemoryExperimentStore::new();
        store.add_experiment(
            Experiment::builder("exp-1", "Subject line")
                .variant(Variant::new(1, "A", 50.0))
                .variant(Variant::new(2, "B", 50.0))
                .build(),
        );
        store.start_experiment("exp-1", Utc::now()).unwrap();
        store
    }

    fn counters(sent: u64) -> RawCounters {
        RawCounters {
            sent,
            ..RawCounters::default()
        }
    }

    #[test]
    fn test_store_default() {
        let store = MemoryExperimentStore::new();
        assert!(store.is_empty());
        assert_eq!(store.experiment_count(), 0);
        assert!(store.run_summaries().is_empty());
    }

    #[tokio::test]
    async fn test_latest_snapshot_per_variant() {
        let store = running_store();
        let t0 = Utc::now();
        store
            .record_snapshot("exp-1", MetricSnapshot::captured_at(1, counters(10), t0))
            .unwrap();
        store
            .record_snapshot(
                "exp-1",
                MetricSnapshot::captured_at(1, counters(20), t0 + Duration::seconds(5)),
            )
            .unwrap();
        store
            .record_snapshot("exp-1", MetricSnapshot::captured_at(2, counters(7), t0))
            .unwrap();

        let latest = store.latest_snapshots("exp-1").await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].counters().sent, 20);
        assert_eq!(latest[1].counters().sent, 7);
        assert_eq!(store.snapshots("exp-1").len(), 3);
    }

    #[test]
    fn test_snapshot_for_unknown_variant_rejected() {
        let store = running_store();
        let result = store.record_snapshot("exp-1", MetricSnapshot::new(99, counters(1)));
        assert!(matches!(result, Err(Error::UnknownVariant { variant_id: 99, .. })));
        assert!(matches!(
            store.record_snapshot("nope", MetricSnapshot::new(1, counters(1))),
            Err(Error::UnknownExperiment(_))
        ));
    }

    #[tokio::test]
    async fn test_active_ids_sorted_and_filtered() {
        let store = running_store();
        store.add_experiment(Experiment::new("exp-0", "Draft"));
        store.add_experiment(
            Experiment::builder("exp-a", "Other")
                .variant(Variant::new(1, "A", 50.0))
                .variant(Variant::new(2, "B", 50.0))
                .build(),
        );
        store.start_experiment("exp-a", Utc::now()).unwrap();
        let ids = store.active_experiment_ids().await.unwrap();
        assert_eq!(ids, vec!["exp-1".to_string(), "exp-a".to_string()]);
    }

    #[tokio::test]
    async fn test_record_decision_is_insert_if_absent() {
        let store = running_store();
        let first = WinnerDecision::new(
            "exp-1",
            1,
            Utc::now(),
            DeclaredBy::Auto,
            95.0,
            Some(0.01),
            false,
        );
        let second =
            WinnerDecision::new("exp-1", 2, Utc::now(), DeclaredBy::Manual, 95.0, None, true);

        let stored = store.record_decision(first.clone()).await.unwrap();
        assert_eq!(stored, first);
        let again = store.record_decision(second).await.unwrap();
        assert_eq!(again, first);
        assert_eq!(store.state("exp-1"), Some(ExperimentState::WinnerDeclared));

        store.set_state("exp-1", ExperimentState::Running).await.unwrap();
        assert_eq!(store.state("exp-1"), Some(ExperimentState::WinnerDeclared));
        assert!(store.set_config("exp-1", TestConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_failure_bookkeeping() {
        let store = running_store();
        assert_eq!(store.record_failure("exp-1").await.unwrap(), 1);
        assert_eq!(store.record_failure("exp-1").await.unwrap(), 2);
        store.flag_for_review("exp-1").await.unwrap();
        assert!(store.is_flagged_for_review("exp-1"));
        store.clear_failures("exp-1").await.unwrap();
        assert_eq!(store.consecutive_failures("exp-1"), 0);
        assert!(!store.is_flagged_for_review("exp-1"));
    }
}
