//! Metric Store HTTP Server
//!
//! This binary exposes the metric store over a REST API.
//!
//! # Endpoints
//!
//! ## Catalog
//! - `POST /api/v1/metrics/register` - Register a metric
//! - `GET /api/v1/metrics` - List metrics
//! - `GET /api/v1/metrics/:name` - Fetch a metric
//! - `DELETE /api/v1/metrics/:name` - Deregister a metric and purge its data
//!
//! ## Ingestion
//! - `POST /api/v1/metrics/ingest` - Submit samples (202)
//! - `POST /api/v1/ingestion/flush` - Flush the buffer now
//! - `GET /api/v1/ingestion/stats` - Ingestion counters
//!
//! ## Query
//! - `POST /api/v1/metrics/query` - Aggregation query
//!
//! ## Archive
//! - `GET /api/v1/archive/stats` - Archive counters
//! - `GET /api/v1/archive/query` - Archived points of a metric
//! - `POST /api/v1/archive/trigger` - Run an archival cycle now
//!
//! ## Admin
//! - `GET /health`, `GET /actuator/health` - Health check
//! - `GET /api/v1/stats` - Store statistics
//!
//! # CLI Commands
//!
//! - `start` - Start the HTTP server (default if no command specified)
//! - `check-config` - Validate configuration file
//!
//! # Configuration
//!
//! The server reads configuration from:
//! 1. `--config` argument
//! 2. `METRIC_STORE_CONFIG` environment variable (path to TOML file)
//! 3. `./metric-store.toml` in current directory
//! 4. Default configuration

mod config;
mod handlers;
mod types;

use clap::{Parser, Subcommand};

use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use handlers::AppState;
use metric_store::{Config, MetricStore};
use std::{net::SocketAddr, sync::Arc};
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

// =============================================================================
// Router and Server Setup
// =============================================================================

/// Build CORS layer from configuration
fn build_cors_layer(cors_origins: &[String]) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::DELETE, Method::OPTIONS];
    if cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(Any)
    }
}

/// Build the application router
fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        // Catalog
        .route("/metrics", get(handlers::list_metrics))
        .route("/metrics/register", post(handlers::register_metric))
        .route(
            "/metrics/:name",
            get(handlers::get_metric).delete(handlers::delete_metric),
        )
        // Ingestion
        .route("/metrics/ingest", post(handlers::ingest))
        .route("/ingestion/flush", post(handlers::flush))
        .route("/ingestion/stats", get(handlers::ingestion_stats))
        // Query
        .route("/metrics/query", post(handlers::query))
        // Archive
        .route("/archive/stats", get(handlers::archive_stats))
        .route("/archive/query", get(handlers::archive_query))
        .route("/archive/trigger", post(handlers::archive_trigger))
        // Stats
        .route("/stats", get(handlers::get_stats));

    let cors = build_cors_layer(&state.store.config().server.cors_allowed_origins);
    Router::new()
        .route("/health", get(handlers::health))
        .route("/actuator/health", get(handlers::health))
        .nest("/api/v1", api)
        .with_state(state)
        .layer(cors)
}

/// Graceful shutdown signal handler
///
/// A failed signal registration is logged and that signal is ignored.
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {},
            Err(e) => {
                warn!(
                    error = %e,
                    "Ctrl+C handler installation failed - graceful shutdown unavailable"
                );
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                warn!(
                    error = %e,
                    "SIGTERM handler installation failed - SIGTERM shutdown unavailable"
                );
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

// =============================================================================
// CLI Definition
// =============================================================================

/// Metric Store - in-memory metric store with an archive tier
#[derive(Parser)]
#[command(name = "metric-store-server")]
#[command(version)]
#[command(
    about = "Metric store with async ingestion, aggregation queries and archival",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file (overrides METRIC_STORE_CONFIG env var)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Override listen address (e.g., 0.0.0.0:8082)
    #[arg(short, long, global = true)]
    listen: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default)
    Start,

    /// Validate configuration file without starting the server
    CheckConfig,
}

// =============================================================================
// CLI Command Handlers
// =============================================================================

/// Resolve configuration and apply CLI overrides
fn resolve_config(cli: &Cli) -> Config {
    let mut config = config::load_config(cli.config.as_deref());
    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen.clone();
    }
    config
}

/// Validate configuration and print summary
fn cmd_check_config(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = resolve_config(cli);
    config.validate()?;

    println!("Configuration is valid!");
    println!();
    println!("Server Settings:");
    println!("  Listen address: {}", config.server.listen_addr);
    println!("  Shutdown timeout: {}s", config.server.shutdown_timeout_secs);
    println!();
    println!("Ingestion:");
    println!("  Buffer capacity: {} samples", config.ingestion.buffer_capacity);
    println!("  Flush interval: {} ms", config.ingestion.flush_interval_ms);
    println!("  Overflow policy: {}", config.ingestion.overflow_policy);
    println!();
    println!("Archive:");
    println!("  Enabled: {}", config.archive.enabled);
    println!("  Interval: {}s", config.archive.interval_secs);
    println!();
    println!("Monitoring:");
    println!("  Log level: {}", config.monitoring.log_level);

    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::CheckConfig) => return cmd_check_config(&cli),
        Some(Commands::Start) | None => {},
    }

    let config = resolve_config(&cli);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.monitoring.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    info!("Starting Metric Store Server v{}", env!("CARGO_PKG_VERSION"));
    debug!(
        listen_addr = %config.server.listen_addr,
        archive_enabled = config.archive.enabled,
        "Configuration resolved"
    );

    let addr: SocketAddr = config.server.listen_addr.parse()?;

    let store = MetricStore::builder().with_config(config).build()?;
    store.start().await?;
    info!("Background services started");

    let state = Arc::new(AppState { store });
    let app = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stops the flush service, which drains the buffer on its way out
    if let Err(e) = state.store.shutdown().await {
        warn!(error = %e, "Background services did not stop cleanly");
    }

    info!("Server shutdown complete");
    Ok(())
}
