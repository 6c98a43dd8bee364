//! Route Bucket
//!
//! Quota bookkeeping for a single rate-limit bucket. A bucket is only ever
//! touched while the container slot that owns it is locked.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Quota state for one bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// Capacity of the bucket per window
    pub maximum: u32,

    /// Tokens left in the current window, net of reservations
    pub remaining: u32,

    /// When the current window ends (`None` until a response reports one,
    /// and again after a local refill)
    pub reset: Option<DateTime<Utc>>,

    /// Requests admitted but not yet answered
    pub reservations: u32,
}

impl Default for Bucket {
    fn default() -> Self {
        Self::new()
    }
}

impl Bucket {
    /// Create a bucket for a route whose quota is not known yet.
    ///
    /// It admits a single request so the first response can reveal the
    /// real limits.
    pub fn new() -> Self {
        Self {
            maximum: 1,
            remaining: 1,
            reset: None,
            reservations: 0,
        }
    }

    /// Create a bucket from known limits
    pub fn with_limits(maximum: u32, remaining: u32, reset: DateTime<Utc>) -> Self {
        Self {
            maximum,
            remaining: remaining.min(maximum),
            reset: Some(reset),
            reservations: 0,
        }
    }

    /// Try to reserve a token for a request that is about to be sent
    pub fn admit_reservation(&mut self) -> bool {
        self.admit_reservation_at(Utc::now())
    }

    /// Try to reserve a token, treating `now` as the current time.
    ///
    /// Once `reset` has passed the bucket refills to `maximum`, minus the
    /// requests still in flight from the previous window.
    pub fn admit_reservation_at(&mut self, now: DateTime<Utc>) -> bool {
        if let Some(reset) = self.reset {
            if now >= reset {
                self.remaining = self.maximum.saturating_sub(self.reservations);
                self.reset = None;
            }
        }

        if self.remaining == 0 {
            return false;
        }

        self.remaining -= 1;
        self.reservations += 1;
        true
    }

    /// Give back a reservation whose request never got a response
    pub fn cancel_reservation(&mut self) {
        if self.reservations == 0 {
            return;
        }
        self.reservations -= 1;
        self.remaining = (self.remaining + 1).min(self.maximum);
    }

    /// Retire a reservation whose request was answered.
    ///
    /// The token is not restored: the server's remaining count already
    /// reflects the request.
    pub fn complete_reservation(&mut self) {
        self.reservations = self.reservations.saturating_sub(1);
    }

    /// Overwrite the window with the values from the latest response
    pub fn update(&mut self, maximum: u32, remaining: u32, reset: DateTime<Utc>) {
        self.maximum = maximum;
        self.remaining = remaining.min(maximum);
        self.reset = Some(reset);
    }

    /// Time until the window resets, if one is known and still ahead
    pub fn reset_after(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        self.reset.and_then(|reset| (reset - now).to_std().ok())
    }
}
