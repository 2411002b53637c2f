//! # Campaign Experiments: A/B Testing Engine for Marketing Campaigns
//!
//! **Version**: 0.1.0
//!
//! Decides, with statistical rigor, which variant of a campaign performs
//! best. Raw delivery counters flow bottom-up through the pipeline:
//!
//! ```text
//! RawCounters ─> MetricsAggregator ─> StatisticalAnalyzer ─> WinnerDecisionEngine
//!                  (derived rates)      (z / t / chi-square)   (RUNNING ⇄ EVALUATING
//!                                                               ─> WINNER_DECLARED)
//! ```
//!
//! [`scheduler::ExperimentScheduler`] runs the pipeline for every active
//! experiment on a timer, and [`service::ExperimentService`] exposes it on
//! demand.
//!
//! ## Design Principles
//!
//! - **No silent fallbacks**: degenerate data yields `p_value = None` and a
//!   reason, never a fabricated number
//! - **Terminal decisions**: a declared winner is never overwritten
//! - **Isolation**: one experiment's failure never aborts a sweep
//! - **Injected time**: every decision takes `now` from a [`clock::Clock`]
//!
//! ## Example Usage
//!
//! ```rust
//! use campaign_experiments::stats::SampleSizeCalculator;
//!
//! // Samples per variant to detect a 20% relative lift on a 10% baseline
//! let n = SampleSizeCalculator::default().required(0.10, 0.20)?;
//! assert_eq!(n, 3839);
//! # Ok::<(), campaign_experiments::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod backend;
pub mod clock;
pub mod config;
pub mod decision;
pub mod error;
pub mod experiment;
pub mod lock;
pub mod metrics;
pub mod scheduler;
pub mod service;
pub mod stats;

pub use error::{Error, Result};
