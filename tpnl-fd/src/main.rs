//! tpnl-fd - Truck Parking NL Facility Directory
//!
//! Reconciles truck-parking facility records from the OSM snapshot, the
//! DATEX-II static and dynamic feeds, and the pan-European research table
//! into one canonical facility set, and serves viewport queries to the map
//! client. Refresh runs per source on independent cadences; a failing source
//! degrades to stale-but-available data, never to an empty result set.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use tpnl_common::events::EventBus;
use tpnl_fd::config::FdConfig;
use tpnl_fd::store::FacilityStore;
use tpnl_fd::{build_router, AppState};

#[derive(Debug, Parser)]
#[command(name = "tpnl-fd", about = "TPNL facility directory service")]
struct Args {
    /// Path to the TOML config file (default: platform config location)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen port override
    #[arg(long, env = "TPNL_FD_PORT")]
    port: Option<u16>,

    /// OSM snapshot path override
    #[arg(long, env = "TPNL_FD_OSM_SNAPSHOT")]
    osm_snapshot: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    info!("Starting tpnl-fd (Facility Directory) v{}", env!("CARGO_PKG_VERSION"));

    let mut config = FdConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(path) = args.osm_snapshot {
        config.sources.osm.snapshot_path = path;
    }

    let store = Arc::new(FacilityStore::new(&config.matching));
    let event_bus = EventBus::new(256);
    let cancel = CancellationToken::new();

    // Per-source refresh tasks + the single merge task
    let scheduler = tpnl_fd::scheduler::spawn(&config, store.clone(), event_bus.clone(), cancel.clone());
    info!("Refresh scheduler started");

    // Reverse-geocoding backfill, if configured
    tpnl_fd::enrich::spawn(
        &config.enrichment,
        store.clone(),
        event_bus.clone(),
        cancel.clone(),
    );

    let state = AppState::new(store, event_bus, scheduler);
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    let shutdown_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
            shutdown_cancel.cancel();
        })
        .await?;

    Ok(())
}
