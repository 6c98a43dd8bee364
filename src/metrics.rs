// Prometheus metrics for rate-limit and identify admission
//
// - Leases granted / refused / leaked (counters)
// - Bucket migrations and slot retirements (counters)
// - Container growth (counter) and capacity (gauge)
// - Identify gate locks and releases (counters)

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    // Bucket container metrics
    pub static ref LEASES_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("ratelimit_leases_total", "Lease attempts by outcome"),
        &["outcome"]
    ).expect("Failed to create leases metric");

    pub static ref LEASES_LEAKED_TOTAL: IntCounter = IntCounter::new(
        "ratelimit_leases_leaked_total",
        "Leases dropped without commit or cancel"
    ).expect("Failed to create leaked leases metric");

    pub static ref BUCKET_MIGRATIONS_TOTAL: IntCounter = IntCounter::new(
        "ratelimit_bucket_migrations_total",
        "Routes moved into a slot already carrying their bucket hash"
    ).expect("Failed to create migrations metric");

    pub static ref SLOTS_RETIRED_TOTAL: IntCounter = IntCounter::new(
        "ratelimit_slots_retired_total",
        "Slots retired after their last route migrated away"
    ).expect("Failed to create retired slots metric");

    pub static ref CONTAINER_RESIZES_TOTAL: IntCounter = IntCounter::new(
        "ratelimit_container_resizes_total",
        "Number of times the bucket container grew"
    ).expect("Failed to create resizes metric");

    pub static ref CONTAINER_CAPACITY: IntGauge = IntGauge::new(
        "ratelimit_container_capacity",
        "Slot capacity of the most recently created or grown bucket container"
    ).expect("Failed to create capacity metric");

    // Identify admission metrics
    pub static ref IDENTIFY_LOCKS_TOTAL: IntCounter = IntCounter::new(
        "gateway_identify_locks_total",
        "Identify permits handed out"
    ).expect("Failed to create identify locks metric");

    pub static ref IDENTIFY_RELEASES_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("gateway_identify_releases_total", "Identify windows released by trigger"),
        &["trigger"]
    ).expect("Failed to create identify releases metric");
}

/// Initialize metrics registry - must be called once at startup
pub fn init() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(LEASES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(LEASES_LEAKED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BUCKET_MIGRATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SLOTS_RETIRED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CONTAINER_RESIZES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CONTAINER_CAPACITY.clone()))?;
    REGISTRY.register(Box::new(IDENTIFY_LOCKS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(IDENTIFY_RELEASES_TOTAL.clone()))?;
    Ok(())
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment() {
        let before = LEASES_TOTAL.with_label_values(&["granted"]).get();
        LEASES_TOTAL.with_label_values(&["granted"]).inc();
        assert!(LEASES_TOTAL.with_label_values(&["granted"]).get() > before);
    }

    #[test]
    fn test_gather_after_init() {
        // other tests may have registered already
        let _ = init();
        let text = gather_metrics().unwrap();
        assert!(text.contains("ratelimit_container_capacity"));
    }
}
