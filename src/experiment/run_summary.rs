//! Run Summary - outcome of one scheduler sweep

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A failed evaluation within a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepError {
    /// Experiment whose evaluation failed
    pub experiment_id: String,
    /// Rendered error
    pub message: String,
    /// Failures in a row, including this one
    pub consecutive_failures: u32,
    /// Whether the experiment now needs manual review
    pub flagged_for_review: bool,
}

/// Summary of one sweep over the active experiments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Tick time the sweep ran for
    pub timestamp: DateTime<Utc>,
    /// Experiments evaluated to completion
    pub experiments_evaluated: usize,
    /// Winners declared during this sweep
    pub winners_declared: usize,
    /// Experiments skipped because an evaluation was already in flight
    pub skipped_in_progress: Vec<String>,
    /// Per-experiment failures
    pub errors: Vec<SweepError>,
}

impl RunSummary {
    /// Create an empty summary for a tick.
    #[must_use]
    pub const fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            experiments_evaluated: 0,
            winners_declared: 0,
            skipped_in_progress: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Whether every experiment evaluated cleanly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}
