//! Rate Limit Configuration
//!
//! Configuration for the route bucket container and the acquisition helper.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::container::DEFAULT_CAPACITY;

/// Default rate limits
pub const DEFAULT_MAX_ACQUIRE_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_AFTER_MS: u64 = 250; // wait when a refusal has no known reset

/// Rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Slots allocated up front (the table doubles when full)
    pub initial_capacity: usize,

    /// Refusals tolerated by `RouteLimiter::acquire` before giving up
    pub max_acquire_attempts: u32,

    /// Back-off for refusals on buckets whose reset is not known yet
    pub default_retry_after_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_CAPACITY,
            max_acquire_attempts: DEFAULT_MAX_ACQUIRE_ATTEMPTS,
            default_retry_after_ms: DEFAULT_RETRY_AFTER_MS,
        }
    }
}

impl RateLimitConfig {
    /// Create a new rate limit configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    /// Override fields from `SHARDLINE_*` environment variables
    pub fn apply_env(self) -> Self {
        self.apply_overrides(&|key| std::env::var(key).ok())
    }

    /// Override fields from `lookup`; unparsable values keep the current setting
    pub(crate) fn apply_overrides<F>(mut self, lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(capacity) = lookup("SHARDLINE_RATELIMIT_CAPACITY").and_then(|v| v.parse().ok()) {
            self.initial_capacity = capacity;
        }

        if let Some(attempts) = lookup("SHARDLINE_RATELIMIT_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.max_acquire_attempts = attempts;
        }

        if let Some(ms) = lookup("SHARDLINE_RATELIMIT_RETRY_MS").and_then(|v| v.parse().ok()) {
            self.default_retry_after_ms = ms;
        }

        self
    }

    /// Get the fallback back-off
    pub fn default_retry_after(&self) -> Duration {
        Duration::from_millis(self.default_retry_after_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.initial_capacity == 0 || !self.initial_capacity.is_power_of_two() {
            anyhow::bail!(
                "Rate limit initial capacity must be a power of two, got {}",
                self.initial_capacity
            );
        }
        if self.max_acquire_attempts == 0 {
            anyhow::bail!("Rate limit max acquire attempts must be > 0");
        }
        Ok(())
    }
}
