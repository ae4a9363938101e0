//! Notification routes.
//!
//! Every route except the schema listing requires a bearer token. A
//! notification owned by another user is reported as not found.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{Meta, Notification};
use herald_engine::dispatch::{NotificationRequest, UpdateNotificationRequest};
use herald_engine::notifications::ListNotificationsParams;

use crate::middleware::auth::AuthUser;
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: i64 = 50;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/notifications",
            get(list_notifications).post(create_notification),
        )
        .route("/notifications/channels/schemas", get(channel_schemas))
        .route(
            "/notifications/{id}",
            get(get_notification)
                .patch(update_notification)
                .delete(delete_notification),
        )
}

#[derive(Debug, Deserialize)]
pub struct CreateNotificationBody {
    pub title: String,
    pub content: String,
    pub channel_name: String,
    #[serde(default)]
    pub meta: serde_json::Map<String, Value>,
    /// RFC 3339 timestamp; absent means "send now".
    pub scheduled_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateNotificationBody {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub meta: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    pub scheduled_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Flatten request metadata to strings. Non-string values keep their JSON
/// text, so `{"badge": 3}` becomes `"3"` and objects stay parseable.
pub fn normalize_meta(raw: serde_json::Map<String, Value>) -> Meta {
    raw.into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect()
}

fn parse_scheduled_at(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, AppError> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| {
                AppError::Validation(
                    "Invalid scheduled_at format. Use RFC3339 (e.g., 2025-10-27T10:00:00Z)"
                        .to_string(),
                )
            })
    })
    .transpose()
}

/// Load a live notification and check it belongs to the caller.
async fn owned_notification(
    state: &AppState,
    auth: &AuthUser,
    id: Uuid,
) -> Result<Notification, AppError> {
    let notification = state.service.get_notification(id).await?;
    if notification.user_id != auth.user_id {
        return Err(AppError::NotificationNotFound(id));
    }
    Ok(notification)
}

/// POST /notifications: create and enqueue a notification.
async fn create_notification(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateNotificationBody>,
) -> Result<impl IntoResponse, AppError> {
    let scheduled_at = parse_scheduled_at(body.scheduled_at.as_deref())?;

    let request = NotificationRequest {
        user_id: auth.user_id,
        title: body.title,
        content: body.content,
        channel_name: body.channel_name,
        meta: normalize_meta(body.meta),
        scheduled_at,
    };

    let notification = state.service.create_and_enqueue(&request).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "Notification created and enqueued",
            "id": notification.id,
        })),
    ))
}

/// GET /notifications: the caller's notifications, newest first.
async fn list_notifications(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Notification>>, AppError> {
    let params = ListNotificationsParams {
        user_id: Some(auth.user_id),
        limit: Some(query.limit.unwrap_or(DEFAULT_PAGE_SIZE)),
        offset: query.offset,
    };
    let notifications = state.service.list_notifications(&params).await?;
    Ok(Json(notifications))
}

/// GET /notifications/{id}
async fn get_notification(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Notification>, AppError> {
    let notification = owned_notification(&state, &auth, id).await?;
    Ok(Json(notification))
}

/// PATCH /notifications/{id}: update title, content, meta or schedule.
async fn update_notification(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateNotificationBody>,
) -> Result<StatusCode, AppError> {
    owned_notification(&state, &auth, id).await?;

    let patch = UpdateNotificationRequest {
        title: body.title,
        content: body.content,
        meta: body.meta.map(normalize_meta),
        scheduled_at: parse_scheduled_at(body.scheduled_at.as_deref())?,
    };
    state.service.update_notification(id, &patch).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /notifications/{id}: soft delete.
async fn delete_notification(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    owned_notification(&state, &auth, id).await?;
    state.service.delete_notification(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /notifications/channels/schemas: example metadata per channel.
async fn channel_schemas(State(state): State<AppState>) -> Json<BTreeMap<String, Value>> {
    Json(state.service.channels().schemas())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_meta_keeps_strings_and_encodes_the_rest() {
        let raw = json!({
            "to": "a@b.com",
            "badge": 3,
            "silent": true,
            "data": { "message_id": "123" },
        });
        let Value::Object(map) = raw else {
            unreachable!()
        };

        let meta = normalize_meta(map);
        assert_eq!(meta["to"], "a@b.com");
        assert_eq!(meta["badge"], "3");
        assert_eq!(meta["silent"], "true");
        assert_eq!(meta["data"], r#"{"message_id":"123"}"#);
    }

    #[test]
    fn test_parse_scheduled_at() {
        assert_eq!(parse_scheduled_at(None).unwrap(), None);

        let parsed = parse_scheduled_at(Some("2025-10-27T10:00:00+02:00"))
            .unwrap()
            .unwrap();
        assert_eq!(parsed.to_rfc3339(), "2025-10-27T08:00:00+00:00");

        assert!(matches!(
            parse_scheduled_at(Some("27/10/2025")),
            Err(AppError::Validation(_))
        ));
    }
}
