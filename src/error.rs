//! Error types for the experimentation engine
//!
//! Only failures a caller must act on are errors. Malformed counters are
//! clamped (`low_confidence`), and numerically degenerate tests produce a
//! `None` p-value with a reason string instead.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Experimentation engine error types
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed configuration or experiment definition (never retried)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Experiment is not known to the store
    #[error("Unknown experiment: {0}")]
    UnknownExperiment(String),

    /// Variant does not belong to the experiment
    #[error("Unknown variant {variant_id} for experiment {experiment_id}")]
    UnknownVariant {
        /// Experiment that was addressed
        experiment_id: String,
        /// Variant id that was not found
        variant_id: u64,
    },

    /// Another evaluation of the same experiment holds the lease
    #[error("Evaluation in progress for experiment {0}\nRetry on the next tick")]
    EvaluationInProgress(String),

    /// A non-forced declaration whose preconditions are not met
    #[error("Winner cannot be declared: {0}")]
    NotReady(String),

    /// Evaluation exceeded its time budget
    #[error("Evaluation of experiment {experiment_id} timed out after {millis}ms")]
    Timeout {
        /// Experiment that timed out
        experiment_id: String,
        /// Budget that was exceeded
        millis: u64,
    },

    /// Collaborator (metrics source, config store, sink) failure
    #[error("Store error: {0}")]
    Store(String),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
