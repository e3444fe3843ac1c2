//! Almacen Server
//!
//! A self-hosted IPFS upload gateway with chunked upload support,
//! content-hash deduplication, and a durable blob index.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use almacen_server::config::Config;
use almacen_server::db;
use almacen_server::routes;
use almacen_server::state::AppState;
use almacen_server::storage::IpfsClient;

/// Slack on top of the object size limit for multipart framing overhead
const BODY_LIMIT_SLACK: usize = 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "almacen_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing::info!("Starting Almacen Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("IPFS API endpoint: {}", config.ipfs.api_url);
    tracing::info!(
        "Max object size: {} MB",
        config.upload.max_object_size / (1024 * 1024)
    );

    // Initialize the IPFS client
    let backend = IpfsClient::new(&config.ipfs)
        .await
        .context("Failed to initialize IPFS client")?;

    // Initialize database
    let db_pool = db::create_pool(&config.database.url)
        .await
        .context("Failed to initialize database")?;
    tracing::info!("Database initialized at {}", config.database.url);

    // Create application state
    let app_state = AppState::new(config.clone(), Arc::new(backend), db_pool);

    // Warm the blob index cache
    match app_state.index().preload_cache(1024).await {
        Ok(count) => tracing::info!("Blob index cache warmed with {} records", count),
        Err(e) => tracing::warn!("Failed to warm blob index cache: {}", e),
    }

    // Start the session reaper
    let reaper = app_state.tracker().start_reaper(
        Duration::from_secs(config.upload.reap_interval_secs),
        Duration::from_secs(config.upload.session_max_age_secs),
    );

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = config.upload.max_object_size as usize + BODY_LIMIT_SLACK;

    // Build router
    let app = routes::app(app_state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server with graceful shutdown
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    tracing::info!("Almacen Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind server address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    reaper.shutdown().await;
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
