//! Cash gateway - bill acceptor and coin changer controller
//!
//! Drives two serial cash devices for a ticketing terminal and exposes the
//! payment flow over HTTP.
//!
//! Module structure:
//! - `domain/` - Money, session ids, events
//! - `io/` - External interfaces (serial devices, HTTP, command table)
//! - `services/` - Payment logic (evaluators, tiers, change, session, controller)
//! - `infra/` - Infrastructure (Config, Metrics)

use cash_gateway::domain::types::Device;
use cash_gateway::infra::{Config, Metrics};
use cash_gateway::io::{create_device_channel, start_http_server, HttpState, SerialDevice};
use cash_gateway::services::{
    create_controller_channel, CashController, ControllerSettings, EventBus,
};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Cash gateway - bill acceptor and coin changer controller
#[derive(Parser, Debug)]
#[command(name = "cash-gateway", version, about)]
struct Args {
    /// Path to TOML configuration file (default: $CONFIG_FILE or config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for command traffic, trace for raw bytes
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "cash-gateway starting");

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(Config::default_path);
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        http_port = %config.http_port(),
        base_path = %config.http_base_path(),
        bill_device = %config.bill_device(),
        coin_device = %config.coin_device(),
        min_change_float = %config.min_change_float(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());
    let bus = EventBus::default();

    // Frames from both devices share one controller mailbox (bounded for backpressure)
    let (frame_tx, frame_rx) = mpsc::channel(256);

    // Start serial device tasks
    let (bill_handle, bill_rx) = create_device_channel(Device::BillAcceptor, 64);
    let bill_device = SerialDevice::bill_acceptor(&config, bill_rx, frame_tx.clone(), metrics.clone());
    tokio::spawn(bill_device.run(shutdown_rx.clone()));

    let (coin_handle, coin_rx) = create_device_channel(Device::CoinChanger, 64);
    let coin_device = SerialDevice::coin_changer(&config, coin_rx, frame_tx, metrics.clone());
    tokio::spawn(coin_device.run(shutdown_rx.clone()));

    // Start HTTP server (payment API, /metrics, /health)
    let (controller_handle, request_rx) = create_controller_channel(32);
    let addr: SocketAddr = format!("{}:{}", config.http_bind_address(), config.http_port()).parse()?;
    let http_state = Arc::new(HttpState::new(&config, controller_handle, bus.clone(), metrics.clone()));
    let http_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = start_http_server(addr, http_state, http_shutdown).await {
            tracing::error!(error = %e, "http_server_error");
        }
    });

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Run controller - owns the payment session until shutdown
    let controller = CashController::new(
        ControllerSettings::from_config(&config),
        Arc::new(bill_handle),
        Arc::new(coin_handle),
        bus,
        metrics,
    );
    controller.run(frame_rx, request_rx, shutdown_rx).await;

    info!("cash-gateway shutdown complete");
    Ok(())
}
