use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use herald_channels::{ChannelRegistry, ChannelSettings};
use herald_common::config::AppConfig;
use herald_common::db;
use herald_engine::dispatch::DispatchService;
use herald_engine::retry::RetryPolicy;
use herald_notifier::worker::{OutboxWorker, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "herald_notifier=info,herald_engine=info,herald_channels=info".into()
            }),
        )
        .json()
        .init();

    tracing::info!("Herald notifier starting...");

    let config = AppConfig::from_env()?;

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;

    let channels = ChannelRegistry::from_settings(&ChannelSettings::from_config(&config))?;
    let retry = RetryPolicy::from_config(&config)?;
    let service = Arc::new(DispatchService::new(pool, Arc::new(channels), retry));
    let worker = OutboxWorker::new(service, WorkerConfig::from_config(&config)?)?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal, finishing current tick...");
        }
        signal.cancel();
    });

    worker.run(shutdown).await;

    tracing::info!("Herald notifier stopped.");
    Ok(())
}
