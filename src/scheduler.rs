//! Periodic sweep over active experiments
//!
//! [`ExperimentScheduler::run_sweep`] is a per-tick function: list active
//! experiments, evaluate each one independently and return a
//! [`RunSummary`]. A failing, slow or locked experiment never affects the
//! others. [`ExperimentScheduler::spawn`] drives sweeps from a tokio
//! interval and from manual triggers.
//!
//! ```text
//! tick(now)
//!   ├─ exp-a ─> evaluate_at ─> Ok          evaluated (+ winner)
//!   ├─ exp-b ─> evaluate_at ─> InProgress  skipped, retried next tick
//!   └─ exp-c ─> evaluate_at ─> Err/Timeout failure count, review flag
//! ```

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::backend::ExperimentBackend;
use crate::experiment::{RunSummary, SweepError};
use crate::service::{Evaluation, ExperimentService};
use crate::{Error, Result};

/// Drives evaluations of every active experiment.
pub struct ExperimentScheduler<B: ExperimentBackend + 'static> {
    service: Arc<ExperimentService<B>>,
    permits: Arc<Semaphore>,
}

impl<B: ExperimentBackend + 'static> ExperimentScheduler<B> {
    /// Create a scheduler over a service.
    #[must_use]
    pub fn new(service: Arc<ExperimentService<B>>) -> Self {
        let permits = Arc::new(Semaphore::new(
            service.config().max_concurrent_evaluations.max(1),
        ));
        Self { service, permits }
    }

    /// Get the service.
    #[must_use]
    pub const fn service(&self) -> &Arc<ExperimentService<B>> {
        &self.service
    }

    /// Run one sweep at the clock's current time.
    pub async fn tick(&self) -> RunSummary {
        self.run_sweep(self.service.clock().now()).await
    }

    /// Evaluate every active experiment as of `now`.
    ///
    /// Never fails as a whole: listing and per-experiment failures are
    /// reported in the summary, which is also appended to the backend.
    pub async fn run_sweep(&self, now: DateTime<Utc>) -> RunSummary {
        let mut summary = RunSummary::new(now);
        let backend = self.service.backend();

        let ids = match backend.active_experiment_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "failed to list active experiments");
                summary.errors.push(SweepError {
                    experiment_id: String::new(),
                    message: e.to_string(),
                    consecutive_failures: 0,
                    flagged_for_review: false,
                });
                self.persist(&summary).await;
                return summary;
            }
        };
        debug!(count = ids.len(), "sweep started");

        let mut tasks = JoinSet::new();
        let mut names = HashMap::with_capacity(ids.len());
        for experiment_id in ids {
            let service = Arc::clone(&self.service);
            let permits = Arc::clone(&self.permits);
            let id = experiment_id.clone();
            let handle = tasks.spawn(async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => service.evaluate_at(&id, now).await,
                    Err(_) => Err(Error::Other("evaluation permits closed".to_string())),
                };
                (id, outcome)
            });
            names.insert(handle.id(), experiment_id);
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((experiment_id, outcome)) => {
                    self.record(&mut summary, experiment_id, outcome).await;
                }
                Err(join_error) => {
                    let experiment_id = names.remove(&join_error.id()).unwrap_or_default();
                    let outcome = Err(Error::Other(format!("evaluation task failed: {join_error}")));
                    self.record(&mut summary, experiment_id, outcome).await;
                }
            }
        }

        summary.skipped_in_progress.sort();
        summary
            .errors
            .sort_by(|a, b| a.experiment_id.cmp(&b.experiment_id));

        info!(
            evaluated = summary.experiments_evaluated,
            winners = summary.winners_declared,
            skipped = summary.skipped_in_progress.len(),
            errors = summary.errors.len(),
            "sweep finished"
        );
        self.persist(&summary).await;
        summary
    }

    /// Start a background task sweeping every `evaluation_interval`.
    ///
    /// The first sweep runs immediately. Sweeps never overlap; a trigger
    /// that arrives mid-sweep runs after it.
    #[must_use]
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        let (trigger_tx, mut trigger_rx) = mpsc::channel::<oneshot::Sender<RunSummary>>(8);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let period = self.service.config().evaluation_interval();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = interval.tick() => {
                        self.tick().await;
                    }
                    Some(reply) = trigger_rx.recv() => {
                        let summary = self.tick().await;
                        if reply.send(summary).is_err() {
                            debug!("trigger caller went away before the sweep finished");
                        }
                    }
                }
            }
            info!("scheduler stopped");
        });

        SchedulerHandle {
            trigger: trigger_tx,
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    async fn record(
        &self,
        summary: &mut RunSummary,
        experiment_id: String,
        outcome: Result<Evaluation>,
    ) {
        let backend = self.service.backend();
        match outcome {
            Ok(evaluation) => {
                summary.experiments_evaluated += 1;
                if evaluation.newly_declared {
                    summary.winners_declared += 1;
                }
                if let Err(e) = backend.clear_failures(&experiment_id).await {
                    warn!(experiment_id, error = %e, "failed to clear failure count");
                }
            }
            Err(Error::EvaluationInProgress(_)) => {
                debug!(experiment_id, "evaluation in progress; skipping this tick");
                summary.skipped_in_progress.push(experiment_id);
            }
            Err(e) => {
                let failure = self.register_failure(&experiment_id, &e).await;
                summary.errors.push(failure);
            }
        }
    }

    async fn register_failure(&self, experiment_id: &str, cause: &Error) -> SweepError {
        let backend = self.service.backend();
        let threshold = self.service.config().max_consecutive_failures;

        let consecutive_failures = match backend.record_failure(experiment_id).await {
            Ok(count) => count,
            Err(e) => {
                warn!(experiment_id, error = %e, "failed to record evaluation failure");
                0
            }
        };
        let flagged_for_review = threshold > 0 && consecutive_failures >= threshold;
        if flagged_for_review {
            if let Err(e) = backend.flag_for_review(experiment_id).await {
                warn!(experiment_id, error = %e, "failed to flag experiment for review");
            }
            error!(
                experiment_id,
                consecutive_failures, "experiment flagged for manual review"
            );
        } else {
            warn!(experiment_id, error = %cause, consecutive_failures, "evaluation failed");
        }

        SweepError {
            experiment_id: experiment_id.to_string(),
            message: cause.to_string(),
            consecutive_failures,
            flagged_for_review,
        }
    }

    async fn persist(&self, summary: &RunSummary) {
        if let Err(e) = self
            .service
            .backend()
            .append_run_summary(summary.clone())
            .await
        {
            warn!(error = %e, "failed to persist run summary");
        }
    }
}

/// Control handle for a spawned scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    trigger: mpsc::Sender<oneshot::Sender<RunSummary>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Request a sweep now and wait for its summary.
    ///
    /// # Errors
    ///
    /// Returns `Error::Other` if the scheduler has stopped.
    pub async fn trigger(&self) -> Result<RunSummary> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.trigger
            .send(reply_tx)
            .await
            .map_err(|_| Error::Other("scheduler is not running".to_string()))?;
        reply_rx
            .await
            .map_err(|_| Error::Other("scheduler stopped before the sweep finished".to_string()))
    }

    /// Stop the scheduler after any sweep in progress.
    ///
    /// # Errors
    ///
    /// Returns `Error::Other` if the scheduler task panicked.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            // Already stopped if the receiver is gone.
            let _ = shutdown.send(());
        }
        (&mut self.task)
            .await
            .map_err(|e| Error::Other(format!("scheduler task failed: {e}")))
    }
}
