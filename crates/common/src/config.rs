use std::str::FromStr;

use serde::Deserialize;

/// Global application configuration loaded from environment variables.
///
/// Only the binaries call [`AppConfig::from_env`]; library crates receive the
/// pieces they need as explicit settings structs.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// JWT secret for API authentication
    pub jwt_secret: String,

    /// Port the API server binds to (default: 3000)
    pub api_port: u16,

    /// Outbox worker tick interval in milliseconds (default: 30000)
    pub worker_interval_ms: u64,

    /// Maximum number of outbox rows claimed per tick (default: 10)
    pub worker_batch_size: u32,

    /// Maximum number of claimed rows dispatched concurrently (default: 4)
    pub worker_concurrency: usize,

    /// PROCESSING rows untouched for this long are handed back to PENDING (default: 600)
    pub worker_processing_timeout_secs: u64,

    /// Delivery attempts per outbox row before it is marked FAILED (default: 3)
    pub outbox_max_attempts: i32,

    /// Retry backoff strategy: `fixed` or `exponential` (default: fixed)
    pub retry_backoff: String,

    /// Base retry delay in seconds (default: 60)
    pub retry_backoff_secs: u64,

    /// Upper bound for exponential backoff in seconds (default: 3600)
    pub retry_backoff_max_secs: u64,

    /// Resend API key for email delivery
    pub resend_api_key: Option<String>,

    /// Email sender address
    pub email_from: Option<String>,

    /// SMS gateway endpoint
    pub sms_gateway_url: Option<String>,

    /// Push gateway endpoint
    pub push_gateway_url: Option<String>,

    /// Timeout for outbound channel HTTP calls in seconds (default: 10)
    pub channel_http_timeout_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 20)?,
            jwt_secret: std::env::var("JWT_SECRET")
                .map_err(|_| anyhow::anyhow!("JWT_SECRET environment variable is required"))?,
            api_port: parse_var("API_PORT", 3000)?,
            worker_interval_ms: parse_var("WORKER_INTERVAL_MS", 30_000)?,
            worker_batch_size: parse_var("WORKER_BATCH_SIZE", 10)?,
            worker_concurrency: parse_var("WORKER_CONCURRENCY", 4)?,
            worker_processing_timeout_secs: parse_var("WORKER_PROCESSING_TIMEOUT_SECS", 600)?,
            outbox_max_attempts: parse_var("OUTBOX_MAX_ATTEMPTS", 3)?,
            retry_backoff: std::env::var("RETRY_BACKOFF").unwrap_or_else(|_| "fixed".to_string()),
            retry_backoff_secs: parse_var("RETRY_BACKOFF_SECS", 60)?,
            retry_backoff_max_secs: parse_var("RETRY_BACKOFF_MAX_SECS", 3600)?,
            resend_api_key: std::env::var("RESEND_API_KEY").ok(),
            email_from: std::env::var("EMAIL_FROM").ok(),
            sms_gateway_url: std::env::var("SMS_GATEWAY_URL").ok(),
            push_gateway_url: std::env::var("PUSH_GATEWAY_URL").ok(),
            channel_http_timeout_secs: parse_var("CHANNEL_HTTP_TIMEOUT_SECS", 10)?,
        })
    }
}

/// Read an optional numeric variable, falling back to `default` when unset.
fn parse_var<T: FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| {
            anyhow::anyhow!(
                "{} must be a valid {}",
                name,
                std::any::type_name::<T>()
            )
        }),
        Err(_) => Ok(default),
    }
}
