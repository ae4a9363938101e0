use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Common error types used across the application.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid channel name: {0}")]
    InvalidChannel(String),

    #[error("Invalid metadata for channel {channel}: {reason}")]
    InvalidMetadata { channel: String, reason: String },

    #[error("Notification already exists")]
    DuplicateNotification,

    #[error("Notification {0} not found")]
    NotificationNotFound(Uuid),

    #[error("Channel {0} not found")]
    ChannelNotFound(String),

    #[error("Failed to update notification: {0}")]
    FailedToUpdateNotification(sqlx::Error),

    #[error("Failed to update outbox: {0}")]
    FailedToUpdateOutbox(sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// HTTP status this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidChannel(_)
            | AppError::InvalidMetadata { .. }
            | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::DuplicateNotification => StatusCode::CONFLICT,
            AppError::NotificationNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Database(_)
            | AppError::Serialization(_)
            | AppError::ChannelNotFound(_)
            | AppError::FailedToUpdateNotification(_)
            | AppError::FailedToUpdateOutbox(_)
            | AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Server-side failures keep their detail in the logs only.
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
