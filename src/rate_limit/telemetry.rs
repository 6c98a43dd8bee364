//! Rate Limit Delay Telemetry
//!
//! Tracks how long each request spent waiting on exhausted buckets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::trace;
use uuid::Uuid;

/// Requests tracked before the stalest one is evicted
pub const MAX_TRACKED_REQUESTS: usize = 10_000;

/// Accumulated rate-limit delay for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTelemetry {
    /// Last time a delay was recorded
    pub last_update: DateTime<Utc>,

    /// Sum of all delays, in milliseconds
    pub total_delay_ms: u64,

    /// Number of delays
    pub delay_count: u32,
}

/// Delay telemetry keyed by request id
#[derive(Debug, Clone, Default)]
pub struct DelayTelemetry {
    requests: Arc<RwLock<HashMap<Uuid, RequestTelemetry>>>,
}

impl DelayTelemetry {
    /// Create an empty telemetry store
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a rate-limit delay for `request_id`
    pub async fn record_delay(&self, request_id: Uuid, delay: Duration) {
        let delay_ms = delay.as_millis() as u64;
        trace!(%request_id, delay_ms, "Rate limit delay");

        let mut requests = self.requests.write().await;
        if !requests.contains_key(&request_id) && requests.len() >= MAX_TRACKED_REQUESTS {
            let stalest = requests
                .iter()
                .min_by_key(|(_, t)| t.last_update)
                .map(|(id, _)| *id);
            if let Some(id) = stalest {
                requests.remove(&id);
            }
        }

        let entry = requests.entry(request_id).or_insert(RequestTelemetry {
            last_update: Utc::now(),
            total_delay_ms: 0,
            delay_count: 0,
        });
        entry.last_update = Utc::now();
        entry.total_delay_ms += delay_ms;
        entry.delay_count += 1;
    }

    /// Telemetry for one request
    pub async fn get(&self, request_id: &Uuid) -> Option<RequestTelemetry> {
        self.requests.read().await.get(request_id).copied()
    }

    /// Remove and return telemetry for a finished request
    pub async fn take(&self, request_id: &Uuid) -> Option<RequestTelemetry> {
        self.requests.write().await.remove(request_id)
    }

    /// Number of tracked requests
    pub async fn count(&self) -> usize {
        self.requests.read().await.len()
    }

    /// Clear all telemetry
    pub async fn clear(&self) {
        self.requests.write().await.clear();
    }
}
