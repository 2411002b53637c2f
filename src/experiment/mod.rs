//! Experiment schema
//!
//! Data structures shared by the engine and its collaborators.
//!
//! ## Schema Overview
//!
//! ```text
//! Experiment (1) ──< Variant (N)
//!      │                 │
//!      │                 └──< MetricSnapshot (N) [cumulative counters]
//!      ├──< TestResult (N)       [append-only log]
//!      ├──  WinnerDecision (0..1) [terminal]
//!      └─── RunSummary (per sweep)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use campaign_experiments::experiment::{Experiment, ExperimentState, Variant};
//!
//! let mut experiment = Experiment::builder("exp-001", "Subject line test")
//!     .variant(Variant::new(1, "Control", 50.0))
//!     .variant(Variant::new(2, "Emoji subject", 50.0))
//!     .build();
//!
//! experiment.start(chrono::Utc::now()).unwrap();
//! assert_eq!(experiment.state(), ExperimentState::Running);
//! ```

mod experiment_record;
mod result_record;
mod run_summary;
mod snapshot;

pub use experiment_record::{
    Experiment, ExperimentBuilder, ExperimentState, Variant, TRAFFIC_SUM_TOLERANCE,
};
pub use result_record::{DeclaredBy, TestResult, WinnerDecision};
pub use run_summary::{RunSummary, SweepError};
pub use snapshot::{MetricSnapshot, RawCounters};
