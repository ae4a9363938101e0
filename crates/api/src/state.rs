//! Shared application state for the Axum API server.

use std::sync::Arc;

use herald_common::config::AppConfig;
use herald_engine::dispatch::DispatchService;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DispatchService>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(service: Arc<DispatchService>, config: AppConfig) -> Self {
        Self { service, config }
    }
}
