//! Herald API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use herald_channels::{ChannelRegistry, ChannelSettings};
use herald_common::config::AppConfig;
use herald_common::db::{create_pool, run_migrations};
use herald_engine::dispatch::DispatchService;
use herald_engine::retry::RetryPolicy;

use herald_api::routes::create_router;
use herald_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("herald_api=debug,herald_engine=debug,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting Herald API server...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Create database connection pool
    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    run_migrations(&pool).await?;

    // Build the dispatch service
    let channels = ChannelRegistry::from_settings(&ChannelSettings::from_config(&config))?;
    let retry = RetryPolicy::from_config(&config)?;
    let service = Arc::new(DispatchService::new(pool, Arc::new(channels), retry));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    let state = AppState::new(service, config);

    // Build router
    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Herald API server stopped.");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Received shutdown signal, stopping gracefully...");
    }
}
