//! # Patient Identifier Generation
//!
//! A service that issues patient identifiers from configured sources:
//!
//! - **Sequential sources**: a durable counter encoded over a custom alphabet
//!   with prefix, suffix and padding (`MRN-0001`)
//! - **Pool sources**: pre-loaded identifiers handed out by reservation
//! - **Remote sources**: batches fetched from an external issuer and buffered
//!
//! Auto-generation policies map an (identifier type, location) pair to a
//! source. Generated values get an optional check character and are
//! validated against their type's format before they are returned.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                       Identifier Service                            │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌────────────┐  │
//! │  │   API Layer │  │   Service   │  │   Storage   │  │  Domain    │  │
//! │  │  (Axum)     │→ │   Layer     │→ │   Layer     │  │  Models    │  │
//! │  └─────────────┘  └─────────────┘  └─────────────┘  └────────────┘  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod service;
pub mod storage;

use std::net::SocketAddr;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::create_router;
use crate::api::state::AppState;
use crate::config::AppConfig;
use crate::service::PoolSweeper;
use crate::storage::create_storage;

/// Run the identifier generation service.
///
/// This function:
/// 1. Loads configuration from `.env`, files and environment
/// 2. Initializes logging and the metrics recorder
/// 3. Initializes the storage backend
/// 4. Creates all services and starts the pool expiry sweeper
/// 5. Starts the HTTP server
/// 6. Handles graceful shutdown
///
/// # Errors
///
/// Returns an error if:
/// - Configuration cannot be loaded
/// - Storage backend fails to initialize
/// - HTTP server fails to bind
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting patient identifier service"
    );

    let metrics = if config.observability.metrics_enabled {
        Some(PrometheusBuilder::new().install_recorder()?)
    } else {
        None
    };

    // Initialize storage
    let storage = create_storage(&config.storage).await?;
    info!(backend = storage.backend_name(), "Storage initialized");

    // Create application state
    let mut state = AppState::new(Arc::new(config.clone()), storage)?;
    if let Some(handle) = metrics {
        state = state.with_metrics(handle);
    }

    // Background expiry of abandoned pool reservations
    let shutdown = CancellationToken::new();
    let sweeper = PoolSweeper::spawn(
        Arc::clone(&state.pool_manager),
        config.pool.sweep_interval(),
        shutdown.child_token(),
    );

    // Create router
    let app = create_router(state);

    // Bind to address
    let addr = SocketAddr::new(config.server.host, config.server.port);
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    // Start server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        warn!(error = %e, "Pool sweeper terminated abnormally");
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize logging based on configuration.
fn init_logging(config: &AppConfig) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.observability.log_format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown");
        }
        () = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
