//! Zapp build server.
//!
//! Tracks build records per repository, scheme and platform, runs them one
//! at a time (or a few, see `ZAPP_MAX_CONCURRENT`) through a shell engine,
//! and reports results over a small HTTP API and GitHub commit statuses.

mod config;
mod engine;
mod error;
mod events;
mod metrics;
mod migration;
mod models;
mod routes;
mod schema;
mod services;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;

use crate::engine::ShellEngine;
use crate::services::executor::Orchestrator;
use crate::store::{BuildStore, MemoryStore, PgStore};

#[derive(Parser)]
#[command(name = "zapp", about = "Zapp continuous build server")]
struct Cli {
    /// Server port
    #[arg(short, long, env = "ZAPP_PORT", default_value = "9090")]
    port: u16,

    /// PostgreSQL connection URL; builds are kept in memory when unset
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    let cli = Cli::parse();
    let config = config::ZappConfig::from_env();

    tracing::info!("Starting Zapp build server...");

    let store: Arc<dyn BuildStore> = match cli.database_url.as_deref() {
        Some(db_url) => {
            let store = PgStore::connect(db_url, config.max_db_connections)?;
            tracing::info!("Running database migration...");
            store.migrate().await?;
            tracing::info!("Database migration completed.");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set -- builds are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let orphaned = services::build_service::fail_orphaned_builds(store.as_ref()).await?;
    if orphaned > 0 {
        tracing::info!(orphaned, "Marked builds left running by a previous run as failed");
    }

    let engine = Arc::new(ShellEngine::from_config(&config));
    let orchestrator = Orchestrator::new(store.clone(), engine, config.clone());
    tokio::spawn(orchestrator.clone().run());

    let app = routes::router(routes::ZappRouterState {
        store,
        orchestrator: orchestrator.clone(),
        config,
    });

    // Initialize metrics
    metrics::init_metrics();

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    tracing::info!("Zapp listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!(
        in_flight = orchestrator.in_flight_count(),
        "Cancelling running builds..."
    );
    orchestrator.cancel_all().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {e}");
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
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
