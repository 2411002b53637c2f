//! Per-experiment evaluation leases
//!
//! At most one evaluation per experiment may be in flight. The lease is a
//! compare-and-swap on an "evaluation in progress" marker with an owner
//! token and an expiry, so a backend can implement it as an advisory lock
//! row shared across processes. [`EvaluationGuard`] releases the lease on
//! drop, which covers early returns, errors and timeouts alike.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Proof of lease ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseToken(u64);

impl LeaseToken {
    /// Wrap a raw token value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw token value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

/// Advisory lock over experiment evaluations.
pub trait EvaluationLock: Send + Sync {
    /// Take the lease for `experiment_id` if it is free or expired.
    ///
    /// Returns `None` without blocking when another holder owns a live
    /// lease.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock backend is unavailable.
    fn try_acquire(
        &self,
        experiment_id: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<LeaseToken>>;

    /// Release a lease. Releasing with a stale token is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock backend is unavailable.
    fn release(&self, experiment_id: &str, token: LeaseToken) -> Result<()>;
}

/// Scoped lease; released when dropped.
#[derive(Debug)]
pub struct EvaluationGuard<L: EvaluationLock + ?Sized> {
    lock: Arc<L>,
    experiment_id: String,
    token: LeaseToken,
}

impl<L: EvaluationLock + ?Sized> EvaluationGuard<L> {
    /// Try to take the lease; `Ok(None)` if it is held elsewhere.
    ///
    /// # Errors
    ///
    /// Propagates lock backend failures.
    pub fn acquire(
        lock: &Arc<L>,
        experiment_id: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<Self>> {
        Ok(lock
            .try_acquire(experiment_id, now, lease)?
            .map(|token| Self {
                lock: Arc::clone(lock),
                experiment_id: experiment_id.to_string(),
                token,
            }))
    }

    /// Experiment the lease covers.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Token of this lease.
    #[must_use]
    pub const fn token(&self) -> LeaseToken {
        self.token
    }
}

impl<L: EvaluationLock + ?Sized> Drop for EvaluationGuard<L> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release(&self.experiment_id, self.token) {
            warn!(experiment_id = %self.experiment_id, error = %e, "failed to release evaluation lease");
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Lease {
    token: LeaseToken,
    expires_at: DateTime<Utc>,
}

/// In-process lease table.
#[derive(Debug)]
pub struct MemoryEvaluationLock {
    leases: DashMap<String, Lease>,
    next_token: AtomicU64,
}

impl MemoryEvaluationLock {
    /// Create an empty lease table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            leases: DashMap::new(),
            next_token: AtomicU64::new(1),
        }
    }

    /// Whether a lease entry exists for the experiment (live or expired).
    #[must_use]
    pub fn is_held(&self, experiment_id: &str) -> bool {
        self.leases.contains_key(experiment_id)
    }
}

impl Default for MemoryEvaluationLock {
    fn default() -> Self {
        Self::new()
    }
}

impl EvaluationLock for MemoryEvaluationLock {
    fn try_acquire(
        &self,
        experiment_id: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<LeaseToken>> {
        if lease <= Duration::zero() {
            return Err(Error::Validation(format!(
                "evaluation lease must be positive, got {lease}"
            )));
        }
        let expires_at = now.checked_add_signed(lease).ok_or_else(|| {
            Error::Validation(format!("evaluation lease of {lease} overflows the clock"))
        })?;
        let token = LeaseToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let fresh = Lease { token, expires_at };

        match self.leases.entry(experiment_id.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(fresh);
                Ok(Some(token))
            }
            Entry::Occupied(mut slot) => {
                if slot.get().expires_at <= now {
                    debug!(experiment_id, "reclaiming expired evaluation lease");
                    slot.insert(fresh);
                    Ok(Some(token))
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn release(&self, experiment_id: &str, token: LeaseToken) -> Result<()> {
        self.leases
            .remove_if(experiment_id, |_, lease| lease.token == token);
        Ok(())
    }
}
