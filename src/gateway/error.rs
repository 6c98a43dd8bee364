//! Gateway Admission Error Types

/// Error types for identify admission
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// A gate needs at least one permit
    #[error("Invalid max concurrency {0}, must be at least 1")]
    InvalidConcurrency(usize),

    /// The gate's permit pool was closed
    #[error("Identify gate for application {0} is closed")]
    GateClosed(u64),

    /// The release timer lock was poisoned
    #[error("Identify gate for application {0} has a poisoned timer lock")]
    LockPoisoned(u64),
}
