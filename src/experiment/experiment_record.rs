//! Experiment Record - the campaign variants under test and their lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::config::TestConfig;
use crate::{Error, Result};

/// Tolerance on the traffic fraction sum.
pub const TRAFFIC_SUM_TOLERANCE: f64 = 0.01;

/// Lifecycle state of an experiment.
///
/// ```text
/// Draft ──start──> Running ──> Evaluating ──> WinnerDeclared (terminal)
///                     ^            │
///                     └────────────┘ insufficient data
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentState {
    /// Variants and traffic split are still editable.
    Draft,
    /// Collecting data; eligible for evaluation.
    Running,
    /// An evaluation is in flight.
    Evaluating,
    /// A winner has been declared. Terminal.
    WinnerDeclared,
}

impl ExperimentState {
    /// Whether the scheduler should sweep this experiment.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Evaluating)
    }

    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::WinnerDeclared)
    }
}

/// One alternative version of a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    id: u64,
    name: String,
    traffic_fraction: f64,
}

impl Variant {
    /// Create a variant with its share of traffic in percent.
    #[must_use]
    pub fn new(id: u64, name: impl Into<String>, traffic_fraction: f64) -> Self {
        Self {
            id,
            name: name.into(),
            traffic_fraction,
        }
    }

    /// Get the variant ID.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Get the variant name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the assigned traffic share, in percent.
    #[must_use]
    pub const fn traffic_fraction(&self) -> f64 {
        self.traffic_fraction
    }
}

/// A campaign experiment: its variants, test settings and state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    experiment_id: String,
    name: String,
    variants: Vec<Variant>,
    config: TestConfig,
    state: ExperimentState,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
}

impl Experiment {
    /// Create a draft experiment with default test settings.
    #[must_use]
    pub fn new(experiment_id: impl Into<String>, name: impl Into<String>) -> Self {
        ExperimentBuilder::new(experiment_id, name).build()
    }

    /// Create a builder for constructing an experiment.
    #[must_use]
    pub fn builder(experiment_id: impl Into<String>, name: impl Into<String>) -> ExperimentBuilder {
        ExperimentBuilder::new(experiment_id, name)
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the experiment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the variants in their configured order.
    #[must_use]
    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    /// Look up a variant by ID.
    #[must_use]
    pub fn variant(&self, variant_id: u64) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == variant_id)
    }

    /// Get the test configuration.
    #[must_use]
    pub const fn config(&self) -> &TestConfig {
        &self.config
    }

    /// Get the lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ExperimentState {
        self.state
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the start timestamp, if started.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Add a variant while the experiment is still a draft.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` once the experiment has started.
    pub fn add_variant(&mut self, variant: Variant) -> Result<()> {
        if self.state != ExperimentState::Draft {
            return Err(Error::Validation(format!(
                "variants of experiment {} are immutable after start",
                self.experiment_id
            )));
        }
        self.variants.push(variant);
        Ok(())
    }

    /// Replace the test configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the configuration is invalid or a
    /// winner has already been declared.
    pub fn set_config(&mut self, config: TestConfig) -> Result<()> {
        if self.state.is_terminal() {
            return Err(Error::Validation(format!(
                "config of experiment {} is frozen after a winner is declared",
                self.experiment_id
            )));
        }
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Validate the definition and move from Draft to Running.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the experiment is not a draft, has
    /// fewer than two variants, duplicate variant IDs, an invalid config,
    /// or traffic fractions that do not sum to 100.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.state != ExperimentState::Draft {
            return Err(Error::Validation(format!(
                "experiment {} already started",
                self.experiment_id
            )));
        }
        self.config.validate()?;
        validate_variants(&self.variants)?;
        self.state = ExperimentState::Running;
        self.started_at = Some(now);
        Ok(())
    }

    /// Set the lifecycle state. Terminal state is sticky.
    pub(crate) fn set_state(&mut self, state: ExperimentState) {
        if !self.state.is_terminal() {
            self.state = state;
        }
    }
}

fn validate_variants(variants: &[Variant]) -> Result<()> {
    if variants.len() < 2 {
        return Err(Error::Validation(format!(
            "an experiment needs at least 2 variants, got {}",
            variants.len()
        )));
    }

    let mut seen = HashSet::with_capacity(variants.len());
    for variant in variants {
        if !seen.insert(variant.id) {
            return Err(Error::Validation(format!(
                "duplicate variant id {}",
                variant.id
            )));
        }
        if !variant.traffic_fraction.is_finite()
            || !(0.0..=100.0).contains(&variant.traffic_fraction)
        {
            return Err(Error::Validation(format!(
                "variant {} traffic fraction {} outside [0, 100]",
                variant.id, variant.traffic_fraction
            )));
        }
    }

    let total: f64 = variants.iter().map(Variant::traffic_fraction).sum();
    if (total - 100.0).abs() > TRAFFIC_SUM_TOLERANCE {
        return Err(Error::Validation(format!(
            "traffic fractions must sum to 100, got {total}"
        )));
    }
    Ok(())
}

/// Builder for `Experiment`.
#[derive(Debug)]
pub struct ExperimentBuilder {
    experiment_id: String,
    name: String,
    variants: Vec<Variant>,
    config: TestConfig,
    created_at: DateTime<Utc>,
}

impl ExperimentBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(experiment_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            name: name.into(),
            variants: Vec::new(),
            config: TestConfig::default(),
            created_at: Utc::now(),
        }
    }

    /// Append a variant.
    #[must_use]
    pub fn variant(mut self, variant: Variant) -> Self {
        self.variants.push(variant);
        self
    }

    /// Set the test configuration.
    #[must_use]
    pub const fn config(mut self, config: TestConfig) -> Self {
        self.config = config;
        self
    }

    /// Set a custom creation timestamp.
    #[must_use]
    pub const fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Build the draft `Experiment`.
    #[must_use]
    pub fn build(self) -> Experiment {
        Experiment {
            experiment_id: self.experiment_id,
            name: self.name,
            variants: self.variants,
            config: self.config,
            state: ExperimentState::Draft,
            created_at: self.created_at,
            started_at: None,
        }
    }
}
