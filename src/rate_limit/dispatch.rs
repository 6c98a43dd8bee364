//! Route Acquisition
//!
//! Caller-side half of the lease protocol: ask the container for a route
//! and sleep until the bucket resets whenever it refuses.

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use super::config::RateLimitConfig;
use super::container::BucketContainer;
use super::error::RateLimitError;
use super::lease::{Lease, LeaseOutcome};
use super::telemetry::DelayTelemetry;

/// Acquires leases for REST requests, waiting out exhausted buckets
#[derive(Debug, Clone)]
pub struct RouteLimiter {
    container: BucketContainer,
    config: RateLimitConfig,
    telemetry: DelayTelemetry,
}

impl RouteLimiter {
    /// Create a limiter with its own container
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_container(BucketContainer::with_capacity(config.initial_capacity), config)
    }

    /// Create a limiter over an existing container
    pub fn with_container(container: BucketContainer, config: RateLimitConfig) -> Self {
        Self {
            container,
            config,
            telemetry: DelayTelemetry::new(),
        }
    }

    /// The underlying bucket container
    pub fn container(&self) -> &BucketContainer {
        &self.container
    }

    /// Delay telemetry recorded by [`RouteLimiter::acquire_for`]
    pub fn telemetry(&self) -> &DelayTelemetry {
        &self.telemetry
    }

    /// Acquire a lease for `route`
    pub async fn acquire(&self, route: &str) -> Result<Lease, RateLimitError> {
        self.acquire_for(route, Uuid::new_v4()).await
    }

    /// Acquire a lease for `route`, recording delays under `request_id`
    pub async fn acquire_for(&self, route: &str, request_id: Uuid) -> Result<Lease, RateLimitError> {
        let fallback = self.config.default_retry_after();

        for attempt in 1..=self.config.max_acquire_attempts {
            let refused = match self.container.lease_or_create(route)? {
                LeaseOutcome::Granted(lease) => return Ok(lease),
                refused => refused,
            };

            if attempt == self.config.max_acquire_attempts {
                break;
            }

            let wait = refused
                .retry_after(Utc::now(), fallback)
                .unwrap_or(fallback);
            debug!(
                route,
                attempt,
                wait_ms = wait.as_millis() as u64,
                "Route exhausted, waiting for reset"
            );
            self.telemetry.record_delay(request_id, wait).await;
            tokio::time::sleep(wait).await;
        }

        Err(RateLimitError::Exhausted {
            route: route.to_string(),
            attempts: self.config.max_acquire_attempts,
        })
    }
}
