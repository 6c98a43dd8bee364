//! Shardline
//!
//! Client-side traffic control for chat-platform API and gateway clients:
//!
//! - [`rate_limit`]: route-to-bucket rate limiting with leases, bucket hash
//!   discovery and a lock-striped container that grows without blocking
//!   unrelated routes
//! - [`gateway`]: the identify admission gate that spaces out session starts
//!   per application
//! - [`config`]: TOML configuration with environment overrides
//! - [`metrics`]: Prometheus collectors for both subsystems

pub mod config;
pub mod gateway;
pub mod metrics;
pub mod rate_limit;
