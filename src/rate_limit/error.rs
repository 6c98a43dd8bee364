//! Rate Limit Error Types

use std::time::Duration;

/// Error types for bucket container operations
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// The resize lock could not be taken; bucket state may be inconsistent
    #[error("Failed to enter the resize lock, rate-limit state may be corrupt")]
    ResizeLock,

    /// A slot or table lock was poisoned by a panicking holder
    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),

    /// A lease referenced a slot outside the table
    #[error("Slot {index} does not exist (capacity {capacity})")]
    InvalidSlot { index: usize, capacity: usize },

    /// The route is out of tokens until its bucket resets
    #[error("Preemptive rate limit on {scope}, resets after {reset_after:?}")]
    Preemptive { scope: String, reset_after: Duration },

    /// Acquisition gave up after repeated refusals
    #[error("Route {route} still limited after {attempts} attempts")]
    Exhausted { route: String, attempts: u32 },
}

impl RateLimitError {
    /// Whether the caller can retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RateLimitError::Preemptive { .. } | RateLimitError::Exhausted { .. }
        )
    }
}
