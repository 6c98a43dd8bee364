//! Bucket Leases
//!
//! A lease is the caller's single-use claim on one reservation in one
//! container slot. It must be finished with [`Lease::commit`] once the
//! response is in, or [`Lease::cancel`] if the request never reached the
//! server.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::warn;

use super::container::BucketContainer;
use super::error::RateLimitError;
use super::headers::RateLimitSnapshot;
use crate::metrics;

/// Result of asking the container for a route
#[derive(Debug)]
pub enum LeaseOutcome {
    /// A reservation was taken
    Granted(Lease),

    /// The route's bucket is empty; retry after `reset`
    Refused {
        /// Route that was refused
        route: String,

        /// When the bucket resets, if a response has reported it
        reset: Option<DateTime<Utc>>,
    },
}

impl LeaseOutcome {
    /// Whether a reservation was taken
    pub fn is_granted(&self) -> bool {
        matches!(self, LeaseOutcome::Granted(_))
    }

    /// Take the lease, if granted
    pub fn into_lease(self) -> Option<Lease> {
        match self {
            LeaseOutcome::Granted(lease) => Some(lease),
            LeaseOutcome::Refused { .. } => None,
        }
    }

    /// How long a refused caller should wait, `fallback` when no reset is known
    pub fn retry_after(&self, now: DateTime<Utc>, fallback: Duration) -> Option<Duration> {
        match self {
            LeaseOutcome::Granted(_) => None,
            LeaseOutcome::Refused { reset, .. } => Some(
                reset
                    .and_then(|reset| (reset - now).to_std().ok())
                    .unwrap_or(fallback),
            ),
        }
    }

    /// Convert a refusal into a [`RateLimitError::Preemptive`]
    pub fn into_result(self, fallback: Duration) -> Result<Lease, RateLimitError> {
        let reset_after = self.retry_after(Utc::now(), fallback);
        match self {
            LeaseOutcome::Granted(lease) => Ok(lease),
            LeaseOutcome::Refused { route, .. } => Err(RateLimitError::Preemptive {
                scope: route,
                reset_after: reset_after.unwrap_or(fallback),
            }),
        }
    }
}

/// Claim on one reservation in a container slot
#[must_use = "a lease must be committed or cancelled, dropping it leaks a reservation"]
#[derive(Debug)]
pub struct Lease {
    container: BucketContainer,
    index: usize,
    route: String,
    completed: bool,
}

impl Lease {
    pub(crate) fn new(container: BucketContainer, index: usize, route: &str) -> Self {
        Self {
            container,
            index,
            route: route.to_string(),
            completed: false,
        }
    }

    /// Slot the reservation was taken from
    pub fn index(&self) -> usize {
        self.index
    }

    /// Route this lease was taken for
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Finish the lease with the bucket state reported by the response
    pub fn commit(mut self, snapshot: &RateLimitSnapshot) -> Result<(), RateLimitError> {
        self.completed = true;
        self.container.return_lease(snapshot, &self.route, self.index)
    }

    /// Give the reservation back; the request never got a response
    pub fn cancel(mut self) -> Result<(), RateLimitError> {
        self.completed = true;
        self.container.cancel_lease(&self.route, self.index)
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.completed {
            metrics::LEASES_LEAKED_TOTAL.inc();
            warn!(
                route = %self.route,
                index = self.index,
                "Lease dropped without commit or cancel, reservation leaked"
            );
        }
    }
}
