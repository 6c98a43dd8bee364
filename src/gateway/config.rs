//! Gateway Admission Configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default identify hold before an automatic release
pub const DEFAULT_HOLD_TIMEOUT_SECS: u64 = 30;

/// Identify admission configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Concurrent identify handshakes allowed per application
    pub max_concurrency: usize,

    /// Seconds a held gate waits before releasing on its own
    pub hold_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            hold_timeout_secs: DEFAULT_HOLD_TIMEOUT_SECS,
        }
    }
}

impl GatewayConfig {
    /// Get the automatic release timeout
    pub fn hold_timeout(&self) -> Duration {
        Duration::from_secs(self.hold_timeout_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrency == 0 {
            anyhow::bail!("Gateway max concurrency must be > 0");
        }
        if self.hold_timeout_secs == 0 {
            anyhow::bail!("Gateway hold timeout must be > 0 seconds");
        }
        Ok(())
    }
}
