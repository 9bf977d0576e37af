//! onair-ctl binary
//!
//! Loads the TOML bootstrap config, opens the SQLite database, wires the
//! services and serves the HTTP API until Ctrl+C or SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use onair_common::config::OnAirConfig;
use onair_common::db::init_database;
use onair_ctl::api::{build_router, AppContext};
use onair_ctl::pipeline::{LoggingPipeline, PipelineController};
use onair_ctl::store::SqliteStore;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for onair-ctl
#[derive(Parser, Debug)]
#[command(name = "onair-ctl")]
#[command(about = "On-air priority control plane")]
#[command(version)]
struct Args {
    /// Bootstrap config file (TOML)
    #[arg(short, long, env = "ONAIR_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "ONAIR_PORT")]
    port: Option<u16>,

    /// SQLite database path (overrides the config file)
    #[arg(short, long, env = "ONAIR_DATABASE")]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = OnAirConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(database) = args.database {
        config.database.path = database;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting onair-ctl v{}", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", config.database.path.display());

    let pool = init_database(&config.database.path)
        .await
        .context("Failed to initialize database")?;
    let store = Arc::new(SqliteStore::new(pool));

    let pipeline: Arc<dyn PipelineController> = Arc::new(LoggingPipeline);
    let ctx = AppContext::wire(store, &config, Some(pipeline));

    if ctx.keys.is_open() {
        info!("No API keys configured: authentication disabled");
    }

    let monitor = ctx
        .executor
        .clone()
        .spawn_health_monitor(sweep_period(config.executor.stale_after()));

    let app = build_router(ctx);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    monitor.abort();
    info!("Server shutdown complete");
    Ok(())
}

/// Check for stale executors a few times per staleness window
fn sweep_period(stale_after: Duration) -> Duration {
    (stale_after / 4).max(Duration::from_millis(250))
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
            Ok(mut sig) => {
                sig.recv().await;
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
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
