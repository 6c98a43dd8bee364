use futures::future::join_all;
use shardline::gateway::{identify_bucket, GateRegistry, GatewayConfig};
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_shards_identify_in_windows() {
    let registry = GateRegistry::new(GatewayConfig {
        max_concurrency: 2,
        hold_timeout_secs: 30,
    });
    let start = Instant::now();

    let shards = (0..6u32).map(|shard_id| {
        let registry = registry.clone();
        tokio::spawn(async move {
            let gate = registry.gate(99).await.unwrap();
            gate.lock().await.unwrap();
            let waited = start.elapsed();
            gate.unlock_after(Duration::from_secs(5)).unwrap();
            (shard_id, waited)
        })
    });

    let mut waits: Vec<Duration> = join_all(shards)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().1)
        .collect();
    waits.sort();

    // two shards per five-second window
    assert!(waits[1] < Duration::from_secs(1));
    assert!(waits[2] >= Duration::from_secs(5));
    assert!(waits[3] < Duration::from_secs(6));
    assert!(waits[4] >= Duration::from_secs(10));
    assert_eq!(registry.count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_unreported_identify_times_out() {
    let registry = GateRegistry::new(GatewayConfig::default());
    let gate = registry.gate(5).await.unwrap();

    gate.lock().await.unwrap();
    let start = Instant::now();
    gate.lock().await.unwrap();

    assert!(start.elapsed() >= Duration::from_secs(30));
    gate.release().unwrap();
    assert_eq!(gate.available(), 1);
}

#[test]
fn test_identify_buckets_cover_every_permit() {
    let buckets: std::collections::HashSet<usize> =
        (0..32).map(|shard| identify_bucket(shard, 16)).collect();
    assert_eq!(buckets.len(), 16);
}
