//! Route Rate Limiting
//!
//! This module tracks the platform's per-route request quotas on behalf of
//! many concurrent REST callers.
//!
//! # Features
//!
//! - Lock-striped bucket container keyed by route, growing on demand
//! - Reservations taken before a request is sent, corrected from the
//!   response headers afterwards
//! - Routes that turn out to share a bucket hash are merged into one slot
//! - Async acquisition helper that waits out exhausted buckets
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Route Limiter                          │
//! │            (acquire → sleep until reset → retry)             │
//! ├─────────────────────────────────────────────────────────────┤
//! │                     Bucket Container                         │
//! │  ┌─────────┐  ┌─────────┐  ┌─────────┐  ┌─────────┐         │
//! │  │ slot 0  │  │ slot 1  │  │ slot 2  │  │  ...    │         │
//! │  │ routes  │  │ routes  │  │ (dead)  │  │         │         │
//! │  │ bucket  │  │ bucket  │  │         │  │         │         │
//! │  └─────────┘  └─────────┘  └─────────┘  └─────────┘         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use std::collections::HashMap;
//! use shardline::rate_limit::{BucketContainer, RateLimitSnapshot};
//!
//! let container = BucketContainer::new();
//! let lease = container
//!     .lease_or_create("/channels/123/messages")?
//!     .into_lease()
//!     .expect("fresh route admits one request");
//!
//! let headers: HashMap<String, String> = [
//!     ("x-ratelimit-limit", "5"),
//!     ("x-ratelimit-remaining", "4"),
//!     ("x-ratelimit-reset-after", "1.0"),
//!     ("x-ratelimit-bucket", "abc"),
//! ]
//! .into_iter()
//! .map(|(k, v)| (k.to_string(), v.to_string()))
//! .collect();
//!
//! match RateLimitSnapshot::from_headers(&headers) {
//!     Some(snapshot) => lease.commit(&snapshot)?,
//!     None => lease.cancel()?,
//! }
//! # Ok::<(), shardline::rate_limit::RateLimitError>(())
//! ```

pub mod bucket;
pub mod config;
pub mod container;
pub mod dispatch;
pub mod error;
pub mod headers;
pub mod lease;
pub mod stats;
pub mod telemetry;

pub use bucket::Bucket;
pub use config::RateLimitConfig;
pub use container::BucketContainer;
pub use dispatch::RouteLimiter;
pub use error::RateLimitError;
pub use headers::{RateLimitHeaders, RateLimitScope, RateLimitSnapshot};
pub use lease::{Lease, LeaseOutcome};
pub use stats::{ContainerStats, EntryView};
pub use telemetry::{DelayTelemetry, RequestTelemetry};
