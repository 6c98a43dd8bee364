//! Identify Gate Registry
//!
//! One admission gate per application id, shared by every shard of that
//! application.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::admission::AdmissionGate;
use super::config::GatewayConfig;
use super::error::GatewayError;

/// Concurrency bucket a shard identifies in.
///
/// Shards in the same bucket must identify one after another; shards in
/// different buckets may identify together.
pub fn identify_bucket(shard_id: u32, max_concurrency: usize) -> usize {
    shard_id as usize % max_concurrency.max(1)
}

/// Gates keyed by application id
#[derive(Debug, Clone, Default)]
pub struct GateRegistry {
    config: GatewayConfig,
    gates: Arc<RwLock<HashMap<u64, AdmissionGate>>>,
}

impl GateRegistry {
    /// Create an empty registry
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            gates: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get the gate for `application_id`, creating it with the configured
    /// concurrency
    pub async fn gate(&self, application_id: u64) -> Result<AdmissionGate, GatewayError> {
        self.gate_with(application_id, self.config.max_concurrency).await
    }

    /// Get the gate for `application_id`, creating it with
    /// `max_concurrency` permits.
    ///
    /// The platform reports max concurrency per session start; an existing
    /// gate keeps the concurrency it was created with.
    pub async fn gate_with(
        &self,
        application_id: u64,
        max_concurrency: usize,
    ) -> Result<AdmissionGate, GatewayError> {
        if let Some(gate) = self.gates.read().await.get(&application_id) {
            if gate.max_concurrency() != max_concurrency {
                warn!(
                    application_id,
                    current = gate.max_concurrency(),
                    requested = max_concurrency,
                    "Identify gate already exists with a different max concurrency"
                );
            }
            return Ok(gate.clone());
        }

        let mut gates = self.gates.write().await;
        if let Some(gate) = gates.get(&application_id) {
            return Ok(gate.clone());
        }

        let gate = AdmissionGate::with_hold(
            application_id,
            max_concurrency,
            self.config.hold_timeout(),
        )?;
        gates.insert(application_id, gate.clone());
        info!(application_id, max_concurrency, "Created identify gate");
        Ok(gate)
    }

    /// Get a gate if it exists
    pub async fn get(&self, application_id: u64) -> Option<AdmissionGate> {
        self.gates.read().await.get(&application_id).cloned()
    }

    /// Remove a gate
    pub async fn remove(&self, application_id: u64) -> Option<AdmissionGate> {
        self.gates.write().await.remove(&application_id)
    }

    /// Get gate count
    pub async fn count(&self) -> usize {
        self.gates.read().await.len()
    }
}
