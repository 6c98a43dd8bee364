//! Gateway Identify Admission
//!
//! The platform lets an application start only a few gateway sessions at a
//! time. Every shard waits on its application's [`AdmissionGate`] before
//! sending an identify, then tells the gate when the cooldown ends.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use shardline::gateway::{GateRegistry, GatewayConfig};
//!
//! # async fn run() -> Result<(), shardline::gateway::GatewayError> {
//! let registry = GateRegistry::new(GatewayConfig::default());
//! let gate = registry.gate_with(1234, 16).await?;
//!
//! gate.lock().await?;
//! // send identify, wait for READY ...
//! gate.unlock_after(Duration::from_secs(5))?;
//! # Ok(())
//! # }
//! ```

pub mod admission;
pub mod config;
pub mod error;
pub mod registry;

pub use admission::AdmissionGate;
pub use config::GatewayConfig;
pub use error::GatewayError;
pub use registry::{identify_bucket, GateRegistry};
