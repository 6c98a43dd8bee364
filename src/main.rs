// Shardline - Main Entry Point
//
// Command-line driver for the rate-limit container and the identify gate:
// - Synthetic route traffic against a bucket container
// - Synthetic shard start-up against an identify gate
// - Effective configuration dump

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::json;
use shardline::config::Config;
use shardline::gateway::{identify_bucket, GateRegistry};
use shardline::metrics;
use shardline::rate_limit::{BucketContainer, LeaseOutcome, RateLimitSnapshot};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Shardline: route rate limits and identify admission
#[derive(Parser, Debug)]
#[command(name = "shardline")]
#[command(author = "Shardline Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Route rate-limit buckets and identify admission for chat-platform clients", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive a bucket container with synthetic responses and print its stats
    SimulateRoutes {
        /// Number of distinct routes
        #[arg(long, default_value_t = 8)]
        routes: usize,

        /// Number of distinct bucket hashes the routes share
        #[arg(long, default_value_t = 2)]
        buckets: usize,

        /// Requests issued per route
        #[arg(long, default_value_t = 3)]
        rounds: u32,

        /// Bucket maximum reported by the synthetic responses
        #[arg(long, default_value_t = 5)]
        limit: u32,
    },
    /// Start shards through an identify gate and report how long each waited
    SimulateIdentify {
        /// Number of shards to start
        #[arg(long, default_value_t = 4)]
        shards: u32,

        /// Identify concurrency (defaults to the configured value)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Cooldown reported after each identify, in milliseconds
        #[arg(long, default_value_t = 100)]
        cooldown_ms: u64,

        /// Application id the gate belongs to
        #[arg(long, default_value_t = 1)]
        application_id: u64,
    },
    /// Print the effective configuration as TOML
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    if args.verbose {
        config.logging.level = "debug".to_string();
    }
    init_tracing(&config)?;

    if config.metrics.enabled {
        metrics::init().context("Failed to register metrics")?;
    }

    match args.command {
        Some(Commands::SimulateRoutes {
            routes,
            buckets,
            rounds,
            limit,
        }) => {
            info!(routes, buckets, rounds, "Simulating route traffic");
            simulate_routes(&config, routes, buckets, rounds, limit)?;
        }
        Some(Commands::SimulateIdentify {
            shards,
            concurrency,
            cooldown_ms,
            application_id,
        }) => {
            info!(shards, application_id, "Simulating shard identify");
            simulate_identify(&config, shards, concurrency, cooldown_ms, application_id).await?;
        }
        Some(Commands::ShowConfig) => {
            let text = toml::to_string_pretty(&config).context("Failed to render config")?;
            print!("{}", text);
        }
        None => {
            info!("No command specified. Use \"shardline --help\" for usage.");
        }
    }

    if config.metrics.enabled {
        eprint!("{}", metrics::gather_metrics()?);
    }

    Ok(())
}

/// Initialize tracing on stderr so command output stays machine-readable
fn init_tracing(config: &Config) -> Result<()> {
    let level = config.log_level()?;
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.logging.format.to_lowercase().as_str() {
        "json" => builder.json().init(),
        "pretty" => builder.pretty().init(),
        _ => builder.compact().init(),
    }
    Ok(())
}

/// Issue `rounds` requests on every route, answering each granted lease with
/// a response that reveals the route's bucket hash
fn simulate_routes(
    config: &Config,
    routes: usize,
    buckets: usize,
    rounds: u32,
    limit: u32,
) -> Result<()> {
    let container = BucketContainer::with_capacity(config.rate_limit.initial_capacity);
    let buckets = buckets.max(1);
    let limit = limit.max(1);
    let reset = Utc::now() + chrono::Duration::seconds(60);

    let mut granted = 0u64;
    let mut refused = 0u64;

    for round in 0..rounds {
        for index in 0..routes {
            let route = format!("/channels/{}/messages", index);
            match container.lease_or_create(&route)? {
                LeaseOutcome::Granted(lease) => {
                    granted += 1;
                    let snapshot = RateLimitSnapshot::new(
                        limit,
                        limit.saturating_sub(round + 1),
                        reset,
                        format!("bucket-{}", index % buckets),
                    );
                    lease.commit(&snapshot)?;
                }
                LeaseOutcome::Refused { route, reset } => {
                    refused += 1;
                    debug!(route = %route, reset = ?reset, "Request refused");
                }
            }
        }
    }

    let stats = container.stats()?;
    info!(
        granted,
        refused,
        capacity = stats.capacity,
        live_slots = stats.live_slots,
        "Route simulation finished"
    );

    let report = json!({
        "granted": granted,
        "refused": refused,
        "stats": stats,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Start every shard through the application's gate; each shard reports the
/// cooldown once its session is ready
async fn simulate_identify(
    config: &Config,
    shards: u32,
    concurrency: Option<usize>,
    cooldown_ms: u64,
    application_id: u64,
) -> Result<()> {
    let registry = GateRegistry::new(config.gateway.clone());
    let concurrency = concurrency.unwrap_or(config.gateway.max_concurrency);
    let gate = registry.gate_with(application_id, concurrency).await?;
    let cooldown = Duration::from_millis(cooldown_ms);
    let start = Instant::now();

    let mut handles = Vec::with_capacity(shards as usize);
    for shard_id in 0..shards {
        let gate = gate.clone();
        handles.push(tokio::spawn(async move {
            gate.lock().await?;
            let waited = start.elapsed();
            debug!(shard_id, waited_ms = waited.as_millis() as u64, "Shard identified");
            gate.unlock_after(cooldown)?;
            Ok::<_, shardline::gateway::GatewayError>((shard_id, waited))
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        let (shard_id, waited) = handle.await.context("Shard task panicked")??;
        results.push(json!({
            "shard": shard_id,
            "bucket": identify_bucket(shard_id, concurrency),
            "waited_ms": waited.as_millis() as u64,
        }));
    }

    if gate.is_held() {
        warn!(application_id, "Identify gate still held after simulation, releasing");
        gate.release()?;
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
