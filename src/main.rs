//! Upstream balancer CLI.
//!
//! # Architecture Overview
//!
//! ```text
//!     Outgoing request
//!     ─────────────────▶ Balancer::dispatch ──▶ strategy ──▶ ServerPool
//!                              │                               ▲
//!                              ▼                               │
//!                        rewritten URL                  HealthMonitor
//!                        + Host header                  (probe rounds)
//! ```
//!
//! # Commands
//! - `check-config`: validate a config file and print a summary
//! - `simulate`: dispatch in-memory requests and print where they went
//! - `watch`: run the configured health checks and log verdicts

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

use upstream_balancer::balancer::{Balancer, OutgoingRequest, SimulatedRequest, TerminalEvent};
use upstream_balancer::config::{load_config, BalancerConfig};
use upstream_balancer::load_balancer::Backend;
use upstream_balancer::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "upstream-balancer")]
#[command(about = "Backend selection and health tracking for outgoing requests", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "balancer.toml")]
    config: PathBuf,

    /// Overrides `observability.log_level`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and print a summary
    CheckConfig,
    /// Dispatch in-memory requests and print the rewritten targets
    Simulate {
        #[arg(short = 'n', long, default_value_t = 10)]
        requests: usize,

        #[arg(short, long, default_value = "/")]
        url: String,

        /// Use this strategy instead of the configured one.
        #[arg(short, long)]
        strategy: Option<String>,
    },
    /// Run the configured health checks and log verdicts until Ctrl-C
    Watch,
}

#[derive(Serialize)]
struct Routed {
    url: String,
    host: Option<String>,
    backend: Option<String>,
}

#[derive(Serialize)]
struct SimulationReport {
    strategy: String,
    requests: Vec<Routed>,
    /// Availability view while the requests were in flight.
    in_flight: Vec<Backend>,
    available: Vec<Backend>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let level = cli.log_level.as_deref().unwrap_or(&config.observability.log_level);
    logging::init_logging(level);

    tracing::info!(
        path = %cli.config.display(),
        strategy = %config.strategy,
        backends = config.backends.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    match cli.command {
        Commands::CheckConfig => check_config(&config)?,
        Commands::Simulate {
            requests,
            url,
            strategy,
        } => simulate(&config, requests, &url, strategy.as_deref())?,
        Commands::Watch => watch(&config).await?,
    }

    Ok(())
}

fn check_config(config: &BalancerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let balancer = Balancer::from_config(config)?;
    let pool = balancer.pool();

    println!("strategy: {}", config.strategy);
    println!("backends: {} ({} available)", pool.len(), pool.available().len());
    for backend in pool.all() {
        println!(
            "  {} -> {} weight={} backup={} status={:?}",
            backend.label(),
            backend.origin(),
            backend.weight,
            backend.backup,
            backend.status
        );
    }

    let health = &config.health_check;
    if health.enabled {
        println!(
            "health check: {:?} every {}ms, {}/{} probes to stay enabled",
            health.probe, health.interval_ms, health.threshold, health.window
        );
    } else {
        println!("health check: disabled");
    }
    Ok(())
}

fn simulate(
    config: &BalancerConfig,
    requests: usize,
    url: &str,
    strategy: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let balancer = Balancer::from_config(config)?;
    if let Some(strategy) = strategy {
        balancer.set_strategy(strategy);
    }

    let mut pending = Vec::with_capacity(requests);
    let mut routed = Vec::with_capacity(requests);
    for _ in 0..requests {
        let mut request = SimulatedRequest::new(url);
        let dispatch = balancer.dispatch(&mut request)?;
        routed.push(Routed {
            url: request.url().to_string(),
            host: request.header("host").map(str::to_string),
            backend: dispatch.backend().map(Backend::label),
        });
        pending.push(request);
    }

    let in_flight = balancer.available_servers();
    for request in &pending {
        request.finish(TerminalEvent::Completed);
    }

    let report = SimulationReport {
        strategy: balancer.strategy_name(),
        requests: routed,
        in_flight,
        available: balancer.available_servers(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn watch(config: &BalancerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let balancer = Balancer::from_config(config)?;
    let health = &config.health_check;
    if !health.enabled {
        tracing::warn!("health_check.enabled is false; watching anyway");
    }

    let mut events = balancer.health_events();
    balancer.start_shared_health_check(health.options(), health.build_probe())?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => tracing::info!(
                    backend = %event.backend.label(),
                    verdict = ?event.verdict,
                    successes = event.successes,
                    window = event.window,
                    available = balancer.available_servers().len(),
                    "Health verdict"
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Health events dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl-C, stopping health checks");
                break;
            }
        }
    }

    balancer.stop_health_check();
    tracing::info!("Shutdown complete");
    Ok(())
}
