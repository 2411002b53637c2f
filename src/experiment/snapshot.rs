//! Metric Snapshot - raw per-variant event counters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw event counters of one variant.
///
/// Counters are unsigned; upstream values that are negative, fractional
/// or not numbers at all are clamped on ingestion (see [`RawCounters::from_json`]).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawCounters {
    /// Messages sent
    pub sent: u64,
    /// Messages delivered
    pub delivered: u64,
    /// Messages opened
    pub opened: u64,
    /// Messages with at least one click
    pub clicked: u64,
    /// Messages replied to
    pub replied: u64,
    /// Recipients that converted
    pub converted: u64,
    /// Recipients that unsubscribed
    pub unsubscribed: u64,
    /// Messages that bounced
    pub bounced: u64,
}

impl RawCounters {
    /// Read counters from loosely typed upstream JSON.
    ///
    /// Missing, negative and non-numeric fields become 0; fractional
    /// values are floored. Returns the counters and whether any field had
    /// to be clamped.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> (Self, bool) {
        let mut clamped = false;
        let mut field = |name: &str| {
            let (count, was_clamped) = clamp_count(value.get(name));
            clamped |= was_clamped;
            count
        };
        let counters = Self {
            sent: field("sent"),
            delivered: field("delivered"),
            opened: field("opened"),
            clicked: field("clicked"),
            replied: field("replied"),
            converted: field("converted"),
            unsubscribed: field("unsubscribed"),
            bounced: field("bounced"),
        };
        (counters, clamped)
    }

    /// Whether every counter is at least its value in `previous`.
    #[must_use]
    pub const fn is_successor_of(&self, previous: &Self) -> bool {
        self.sent >= previous.sent
            && self.delivered >= previous.delivered
            && self.opened >= previous.opened
            && self.clicked >= previous.clicked
            && self.replied >= previous.replied
            && self.converted >= previous.converted
            && self.unsubscribed >= previous.unsubscribed
            && self.bounced >= previous.bounced
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_count(value: Option<&serde_json::Value>) -> (u64, bool) {
    match value {
        None | Some(serde_json::Value::Null) => (0, false),
        Some(v) => {
            if let Some(n) = v.as_u64() {
                (n, false)
            } else if let Some(f) = v.as_f64() {
                if f.is_finite() && f > 0.0 {
                    (f.floor() as u64, f.fract() != 0.0)
                } else {
                    (0, true)
                }
            } else {
                (0, true)
            }
        }
    }
}

/// Point-in-time counters of one variant.
///
/// Snapshots are retained for audit; evaluation only reads the latest per
/// variant. A snapshot whose counters were clamped on ingestion marks its
/// variant low confidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    variant_id: u64,
    counters: RawCounters,
    captured_at: DateTime<Utc>,
    #[serde(default)]
    clamped: bool,
}

impl MetricSnapshot {
    /// Create a snapshot captured now.
    #[must_use]
    pub fn new(variant_id: u64, counters: RawCounters) -> Self {
        Self::captured_at(variant_id, counters, Utc::now())
    }

    /// Create a snapshot with an explicit capture time.
    #[must_use]
    pub const fn captured_at(
        variant_id: u64,
        counters: RawCounters,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            variant_id,
            counters,
            captured_at,
            clamped: false,
        }
    }

    /// Create a snapshot captured now from loosely typed upstream JSON.
    ///
    /// See [`RawCounters::from_json`] for the clamping rules.
    #[must_use]
    pub fn from_json(variant_id: u64, value: &serde_json::Value) -> Self {
        let (counters, clamped) = RawCounters::from_json(value);
        Self {
            clamped,
            ..Self::new(variant_id, counters)
        }
    }

    /// Get the variant ID.
    #[must_use]
    pub const fn variant_id(&self) -> u64 {
        self.variant_id
    }

    /// Get the raw counters.
    #[must_use]
    pub const fn counters(&self) -> &RawCounters {
        &self.counters
    }

    /// Get the capture timestamp.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Whether any counter was clamped on ingestion.
    #[must_use]
    pub const fn is_clamped(&self) -> bool {
        self.clamped
    }
}
