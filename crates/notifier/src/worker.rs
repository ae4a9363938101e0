//! Outbox worker: a timer-driven loop that claims due outbox rows and hands
//! each one to the dispatch service.
//!
//! Each tick:
//! 1. Returns PROCESSING rows abandoned longer than the processing timeout to PENDING
//! 2. Claims up to `batch_size` due rows, oldest-due first
//! 3. Dispatches the claimed rows with at most `concurrency` in flight
//!
//! Ticks never overlap. Per-item errors are logged and counted, never propagated.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use herald_common::config::AppConfig;
use herald_common::error::AppError;
use herald_engine::dispatch::{DispatchOutcome, DispatchService};
use herald_engine::outbox::OutboxStore;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub interval: Duration,
    pub batch_size: u32,
    pub concurrency: usize,
    pub processing_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            batch_size: 10,
            concurrency: 4,
            processing_timeout: Duration::from_secs(600),
        }
    }
}

impl WorkerConfig {
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let worker = Self {
            interval: Duration::from_millis(config.worker_interval_ms),
            batch_size: config.worker_batch_size,
            concurrency: config.worker_concurrency,
            processing_timeout: Duration::from_secs(config.worker_processing_timeout_secs),
        };
        worker.validate()?;
        Ok(worker)
    }

    /// A zero interval cannot drive a timer and a zero batch or concurrency
    /// never delivers anything.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.interval.is_zero() {
            return Err(AppError::Config(
                "WORKER_INTERVAL_MS must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(AppError::Config(
                "WORKER_BATCH_SIZE must be at least 1".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(AppError::Config(
                "WORKER_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Counters for one tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub released: u64,
    pub claimed: usize,
    pub sent: usize,
    pub retrying: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
}

pub struct OutboxWorker {
    service: Arc<DispatchService>,
    config: WorkerConfig,
}

impl OutboxWorker {
    pub fn new(service: Arc<DispatchService>, config: WorkerConfig) -> Result<Self, AppError> {
        config.validate()?;
        Ok(Self { service, config })
    }

    /// Run until `shutdown` is cancelled. A tick already in progress when the
    /// token fires is allowed to finish; no new tick starts afterwards.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            interval_ms = self.config.interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency,
            "Outbox worker started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(summary) if summary.claimed > 0 || summary.released > 0 => {
                            tracing::info!(
                                released = summary.released,
                                claimed = summary.claimed,
                                sent = summary.sent,
                                retrying = summary.retrying,
                                failed = summary.failed,
                                skipped = summary.skipped,
                                errors = summary.errors,
                                "Outbox tick complete"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "Outbox tick failed");
                        }
                    }
                }
            }
        }

        tracing::info!("Outbox worker stopped");
    }

    /// One release / claim / dispatch cycle.
    pub async fn tick(&self) -> Result<TickSummary, AppError> {
        let mut summary = TickSummary::default();
        let now = Utc::now();
        let pool = self.service.pool();

        let timeout = chrono::Duration::from_std(self.config.processing_timeout)
            .map_err(|e| AppError::Config(format!("processing timeout out of range: {}", e)))?;
        let stale_before = now
            .checked_sub_signed(timeout)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        summary.released = OutboxStore::release_stale(pool, stale_before).await?;
        if summary.released > 0 {
            tracing::warn!(
                released = summary.released,
                "Returned abandoned PROCESSING rows to PENDING"
            );
        }

        let claimed =
            OutboxStore::claim_batch(pool, i64::from(self.config.batch_size), now).await?;
        summary.claimed = claimed.len();
        if claimed.is_empty() {
            return Ok(summary);
        }

        tracing::debug!(claimed = claimed.len(), "Claimed outbox batch");

        let service = &self.service;
        let dispatches: Vec<_> = claimed
            .iter()
            .map(|item| async move { (item.id, service.dispatch_outbox(item).await) })
            .collect();
        let results: Vec<_> = futures::stream::iter(dispatches)
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        for (outbox_id, result) in results {
            match result {
                Ok(DispatchOutcome::Sent) => summary.sent += 1,
                Ok(DispatchOutcome::Retrying { .. }) => summary.retrying += 1,
                Ok(DispatchOutcome::Failed { .. }) => summary.failed += 1,
                Ok(DispatchOutcome::Skipped) => summary.skipped += 1,
                Err(e) => {
                    summary.errors += 1;
                    tracing::error!(outbox_id = %outbox_id, error = %e, "Failed to dispatch outbox item");
                }
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_worker_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.processing_timeout, Duration::from_secs(600));
        assert!(config.validate().is_ok());
    }

    fn app_config() -> AppConfig {
        AppConfig {
            database_url: "postgres://localhost/herald".to_string(),
            db_max_connections: 5,
            jwt_secret: "secret".to_string(),
            api_port: 3000,
            worker_interval_ms: 250,
            worker_batch_size: 20,
            worker_concurrency: 8,
            worker_processing_timeout_secs: 120,
            outbox_max_attempts: 3,
            retry_backoff: "fixed".to_string(),
            retry_backoff_secs: 60,
            retry_backoff_max_secs: 3600,
            resend_api_key: None,
            email_from: None,
            sms_gateway_url: None,
            push_gateway_url: None,
            channel_http_timeout_secs: 10,
        }
    }

    #[test]
    fn test_worker_config_from_app_config() {
        let config = WorkerConfig::from_config(&app_config()).unwrap();
        assert_eq!(config.interval, Duration::from_millis(250));
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.processing_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = AppConfig {
            worker_interval_ms: 0,
            ..app_config()
        };
        let err = WorkerConfig::from_config(&config).unwrap_err();
        assert!(matches!(err, AppError::Config(ref msg) if msg.contains("WORKER_INTERVAL_MS")));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = AppConfig {
            worker_batch_size: 0,
            ..app_config()
        };
        let err = WorkerConfig::from_config(&config).unwrap_err();
        assert!(matches!(err, AppError::Config(ref msg) if msg.contains("WORKER_BATCH_SIZE")));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = WorkerConfig {
            concurrency: 0,
            ..WorkerConfig::default()
        };
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_hand_built_zero_interval_rejected() {
        let config = WorkerConfig {
            interval: Duration::ZERO,
            ..WorkerConfig::default()
        };
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }
}
