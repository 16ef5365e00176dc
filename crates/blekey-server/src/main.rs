//! # blekey-server
//!
//! HTTP server for the blekey BLE access-credential manager.
//!
//! This binary provides:
//! - The credential manager task driving the Bluetooth radio
//! - REST API for credentials, scan bursts and detections
//! - OpenAPI specification at `/api/openapi.json`
//! - Structured logging to file and stdout
//!
//! ## Environment
//!
//! - `BLEKEY_CONFIG` - Path to a TOML configuration file
//! - `BLEKEY_ENV=production` - File + journald logging
//! - `BLEKEY_BIND` - Listen address (default `0.0.0.0:3000`)
//! - `BLEKEY_LOG_LEVEL` - Log filter when `RUST_LOG` is unset
//! - `BLEKEY_*` - Overrides for individual configuration fields
//!
//! ## Running
//!
//! ```bash
//! # Development (simulated radio)
//! cargo run --package blekey-server
//!
//! # Production (BlueZ)
//! cargo build --release --package blekey-server --features bluetooth
//! BLEKEY_ENV=production ./blekey-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use blekey_core::{
    event_queue, spawn, DetectionEvent, JsonFilePersistence, KeyManager, KeyManagerConfig, Radio,
    RadioEventSender,
};
use blekey_server::{api, logging, state::AppState};
use tokio::net::TcpListener;
use tokio::time::Instant;
use tracing::{info, warn};

const DEFAULT_BIND: &str = "0.0.0.0:3000";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let is_production = std::env::var("BLEKEY_ENV").is_ok_and(|env| env == "production");
    logging::init(is_production)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        production = is_production,
        "Starting blekey-server"
    );

    let config_path = std::env::var_os("BLEKEY_CONFIG").map(PathBuf::from);
    let config = KeyManagerConfig::load(config_path.as_deref())
        .context("Failed to load configuration")?;

    let storage_path = config.storage_path();
    info!(path = %storage_path.display(), "Using credential file");
    let persistence = JsonFilePersistence::new(storage_path);

    let (radio_events, radio_rx) = event_queue(config.event_queue_capacity);
    let (radio, radio_backend) = create_radio(radio_events.clone()).await?;

    let mut manager = KeyManager::new(
        config.clone(),
        Box::new(persistence),
        radio,
        Instant::now(),
    );
    manager.on_detection(Box::new(|event: &DetectionEvent| {
        info!(
            address = %event.address,
            name = %event.name,
            session = event.session,
            confirmed = event.confirmed,
            "Credential detected"
        );
        Ok(())
    }));
    let handle = spawn(manager, radio_rx, config.tick_interval());

    let app = api::create_router(AppState::new(handle.clone(), radio_events, radio_backend));

    let addr: SocketAddr = std::env::var("BLEKEY_BIND")
        .unwrap_or_else(|_| DEFAULT_BIND.to_string())
        .parse()
        .context("Invalid BLEKEY_BIND address")?;
    let listener = TcpListener::bind(addr).await?;

    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    match handle.shutdown().await {
        Ok(manager) => info!(credentials = manager.count(), "Credential manager stopped"),
        Err(e) => warn!(error = %e, "Credential manager already stopped"),
    }

    Ok(())
}

#[cfg(feature = "bluetooth")]
async fn create_radio(events: RadioEventSender) -> anyhow::Result<(Box<dyn Radio>, &'static str)> {
    let radio = blekey_core::BluerRadio::new(events)
        .await
        .context("Failed to initialize Bluetooth adapter")?;
    Ok((Box::new(radio), "bluez"))
}

#[cfg(not(feature = "bluetooth"))]
#[allow(clippy::unused_async)]
async fn create_radio(events: RadioEventSender) -> anyhow::Result<(Box<dyn Radio>, &'static str)> {
    warn!("Built without Bluetooth support, using the simulated radio");
    Ok((Box::new(blekey_core::SimulatedRadio::new(events)), "simulated"))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
