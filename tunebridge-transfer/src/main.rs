//! tunebridge-transfer - Playlist Transfer Service
//!
//! Moves playlists between music services: fetches the source playlist,
//! matches every track on the target service, and builds the destination
//! playlist in a background job whose progress is persisted per track.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tunebridge_common::config::TransferConfig;

use tunebridge_transfer::services::http_client::run_metrics_monitor;
use tunebridge_transfer::services::transfer_orchestrator::{run_stale_sweeper, sweep_stale_transfers};
use tunebridge_transfer::AppState;

/// Command-line arguments for tunebridge-transfer
#[derive(Parser, Debug)]
#[command(name = "tunebridge-transfer")]
#[command(about = "Cross-service playlist transfer service")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides config and environment)
    #[arg(short, long)]
    bind: Option<String>,

    /// SQLite database path (overrides config and environment)
    #[arg(short, long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = TransferConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(database) = args.database {
        config.database.path = database;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting tunebridge-transfer");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", config.database.path.display());

    let db_pool = tunebridge_transfer::db::init_database_pool(&config.database.path)
        .await
        .context("Failed to open database")?;
    info!("Database connection established");

    // Jobs left running by a previous process will never finish
    let stale_after = chrono::Duration::minutes(config.transfers.stale_after_minutes);
    let swept = sweep_stale_transfers(&db_pool, stale_after)
        .await
        .context("Startup staleness sweep failed")?;
    info!("Startup sweep complete ({} stale transfers failed)", swept);

    let sweep_interval = Duration::from_secs(config.transfers.sweep_interval_seconds);
    let metrics_interval = Duration::from_secs(config.transfers.metrics_log_interval_seconds);
    let bind = config.server.bind.clone();

    let state = AppState::new(db_pool.clone(), config).context("Failed to build HTTP client")?;

    tokio::spawn(run_stale_sweeper(db_pool, sweep_interval, stale_after));
    tokio::spawn(run_metrics_monitor(state.client.metrics().clone(), metrics_interval));

    let app = tunebridge_transfer::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;
    info!("Listening on http://{}", bind);
    info!("Health check: http://{}/health", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
