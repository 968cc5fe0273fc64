//! gymbridge - gym usage bridge for home automation
//!
//! Polls a fitness chain's mobile backend (Netpulse) for gym occupancy and
//! member check-ins, folds the visits into weekly/monthly/yearly usage
//! buckets with a live presence flag, and publishes snapshots over MQTT.
//!
//! Module structure:
//! - `domain/` - Core business types (CheckIn, Snapshot, period keys)
//! - `io/` - External interfaces (Netpulse HTTP, MQTT egress)
//! - `services/` - Business logic (normalize, visits, aggregate, coordinator)
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use gymbridge::infra::{Config, Metrics};
use gymbridge::io::netpulse::{ApiError, GymApi, NetpulseClient};
use gymbridge::io::{create_egress_channel, MqttPublisher};
use gymbridge::services::{rollover, Refresher};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// gymbridge - gym occupancy and visit aggregation bridge
#[derive(Parser, Debug)]
#[command(name = "gymbridge", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git = env!("GIT_HASH"), "gymbridge starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        base_url = %config.api_base_url(),
        poll_interval_secs = config.poll_interval().as_secs(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        state_topic = %config.mqtt_egress_state_topic(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());

    // Create MQTT egress channel and publisher (if enabled)
    let egress_sender = if config.mqtt_egress_enabled() {
        let (egress_sender, egress_rx) = create_egress_channel(64, config.site_id().to_string());

        let publisher = MqttPublisher::new(&config, egress_rx);
        let publisher_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });

        // Daily display-reset notifier
        let rollover_egress = egress_sender.clone();
        let rollover_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            rollover::run(rollover_egress, rollover_shutdown).await;
        });

        Some(egress_sender)
    } else {
        None
    };

    // Periodic metrics reporter (logs always, publishes when egress is on)
    let reporter_metrics = metrics.clone();
    let reporter_egress = egress_sender.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            let summary = reporter_metrics.report();
            summary.log();
            if let Some(egress) = &reporter_egress {
                egress.send_metrics(summary);
            }
        }
    });

    // Authenticate before the first refresh. Invalid credentials are fatal;
    // transient failures get the same bounded backoff as fetches.
    let client = Arc::new(NetpulseClient::new(&config)?);
    let profile = login_with_backoff(client.as_ref(), &config).await?;
    info!(
        chain = profile.chain_name.as_deref().unwrap_or("unknown"),
        home_club = profile.home_club_name.as_deref().unwrap_or("unknown"),
        "session_established"
    );

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Run the refresh loop - polls until shutdown
    let refresher = Refresher::new(client, config, metrics, egress_sender, profile);
    info!("refresher_started");
    refresher.run(shutdown_rx).await;

    info!("gymbridge shutdown complete");
    Ok(())
}

/// Login with capped exponential backoff on transient failure.
async fn login_with_backoff(
    client: &NetpulseClient,
    config: &Config,
) -> Result<gymbridge::domain::api::Profile, ApiError> {
    let mut attempt = 0u32;
    loop {
        match client.login().await {
            Ok(profile) => return Ok(profile),
            Err(e @ ApiError::Auth(_)) => {
                error!(error = %e, "login_rejected");
                return Err(e);
            }
            Err(e) => {
                if attempt >= config.backoff_max_retries() {
                    error!(attempts = attempt + 1, error = %e, "login_retries_exhausted");
                    return Err(e);
                }
                let delay = config.backoff_base() * 2u32.pow(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e,
                    "login_transient_failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
