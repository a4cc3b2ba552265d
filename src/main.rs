//! Tag Cache server
//!
//! Serves the cache facade over HTTP.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tag_cache::api::create_router;
use tag_cache::{spawn_cleanup_task, AppState, Config};

/// Main entry point for the tag cache server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Build the cache on the configured backend and register it as default
/// 4. Start background expiry purge task
/// 5. Create Axum router with all endpoints
/// 6. Start HTTP server on configured port
/// 7. Handle graceful shutdown on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tag_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Tag Cache Server");

    let config = Config::from_env();
    info!(
        "Configuration loaded: backend={}, default_ttl={}s, max_entries={}, port={}, cleanup_interval={}s",
        config.backend,
        config.default_ttl,
        config.max_entries,
        config.server_port,
        config.cleanup_interval
    );

    let state = AppState::from_config(&config)
        .await
        .with_context(|| format!("failed to initialize {} cache backend", config.backend))?;
    state.cache.register_default();
    info!("Cache initialized on {} backend", state.cache.backend_kind());

    let cleanup_handle = spawn_cleanup_task(state.cache.clone(), config.cleanup_interval);
    info!("Background purge task started");

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cleanup_handle))
        .await
        .context("server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
///
/// On shutdown signal, aborts the purge task and allows graceful shutdown.
async fn shutdown_signal(cleanup_handle: tokio::task::JoinHandle<()>) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    cleanup_handle.abort();
    warn!("Purge task aborted");
}
