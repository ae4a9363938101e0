//! Dispatch service: idempotent create-and-enqueue, single-item dispatch and
//! notification mutation.
//!
//! Flow for a new notification:
//! 1. Fingerprint the request (see [`crate::idempotency`])
//! 2. Resolve and validate against the named channel (nothing written on failure)
//! 3. Insert the notification and its PENDING outbox row in one transaction
//!
//! The worker later hands claimed rows to [`DispatchService::dispatch_outbox`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use herald_channels::ChannelRegistry;
use herald_common::error::AppError;
use herald_common::types::{Message, Meta, Notification, OutboxItem, OutboxStatus};

use crate::idempotency::idempotency_key;
use crate::notifications::{ListNotificationsParams, NewNotification, NotificationStore};
use crate::outbox::{NewOutboxItem, OutboxStore};
use crate::retry::{FailureTransition, RetryPolicy};

/// A request to create and enqueue a notification on behalf of `user_id`.
#[derive(Debug, Clone)]
pub struct NotificationRequest {
    pub user_id: Uuid,
    pub title: String,
    pub content: String,
    pub channel_name: String,
    pub meta: Meta,
    /// First attempt is not made before this instant. `None` means now.
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Partial update. Absent or empty title/content keep the current value.
#[derive(Debug, Clone, Default)]
pub struct UpdateNotificationRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub meta: Option<Meta>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Result of dispatching one claimed outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    /// Attempt failed; the row is PENDING again.
    Retrying {
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
    },
    /// Attempt failed and the row is now FAILED.
    Failed { attempts: i32 },
    /// The row was not (or no longer) PROCESSING; nothing was done to it.
    Skipped,
}

pub struct DispatchService {
    pool: PgPool,
    channels: Arc<ChannelRegistry>,
    retry: RetryPolicy,
}

impl DispatchService {
    pub fn new(pool: PgPool, channels: Arc<ChannelRegistry>, retry: RetryPolicy) -> Self {
        Self {
            pool,
            channels,
            retry,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    /// Validate a request and persist it as a notification plus one PENDING
    /// outbox row. Either both rows are written or neither is.
    pub async fn create_and_enqueue(
        &self,
        request: &NotificationRequest,
    ) -> Result<Notification, AppError> {
        let key = idempotency_key(
            request.user_id,
            &request.channel_name,
            &request.title,
            &request.content,
            &request.meta,
        )?;

        let channel = self
            .channels
            .get(&request.channel_name)
            .ok_or_else(|| AppError::InvalidChannel(request.channel_name.clone()))?;

        channel
            .validate(&request.meta)
            .map_err(|e| AppError::InvalidMetadata {
                channel: request.channel_name.clone(),
                reason: e.to_string(),
            })?;

        let payload = serde_json::to_value(Message::new(
            request.title.as_str(),
            request.content.as_str(),
            request.meta.clone(),
        ))?;

        let mut tx = self.pool.begin().await?;

        let notification = NotificationStore::insert(
            &mut *tx,
            &NewNotification {
                user_id: request.user_id,
                title: &request.title,
                content: &request.content,
                channel_name: &request.channel_name,
                idempotency_key: &key,
            },
        )
        .await?;

        let item = OutboxStore::insert(
            &mut *tx,
            &NewOutboxItem {
                notification_id: notification.id,
                channel_name: &request.channel_name,
                payload: &payload,
                max_attempts: self.retry.max_attempts,
                next_attempt_at: request.scheduled_at.unwrap_or_else(Utc::now),
            },
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            notification_id = %notification.id,
            outbox_id = %item.id,
            user_id = %request.user_id,
            channel = %request.channel_name,
            "Notification enqueued"
        );

        Ok(notification)
    }

    /// Deliver one claimed outbox row and record the result on it.
    ///
    /// Send and prepare failures are never returned as errors; they become a
    /// retry or a terminal FAILED on the row. An undecodable payload or an
    /// unregistered channel is also recorded as a failed attempt, then
    /// returned as an error.
    pub async fn dispatch_outbox(&self, item: &OutboxItem) -> Result<DispatchOutcome, AppError> {
        if item.status != OutboxStatus::Processing {
            tracing::debug!(
                outbox_id = %item.id,
                status = %item.status,
                "Skipping outbox item that is not PROCESSING"
            );
            return Ok(DispatchOutcome::Skipped);
        }

        let mut message: Message = match serde_json::from_value(item.payload.clone()) {
            Ok(message) => message,
            Err(e) => {
                self.record_failure(item, &format!("invalid payload: {}", e))
                    .await?;
                return Err(e.into());
            }
        };

        let Some(channel) = self.channels.get(&item.channel_name) else {
            self.record_failure(item, &format!("channel {} not registered", item.channel_name))
                .await?;
            return Err(AppError::ChannelNotFound(item.channel_name.clone()));
        };

        let attempt = match channel.prepare(&mut message) {
            Ok(()) => channel.send(&message).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match attempt {
            Ok(()) => {
                if OutboxStore::mark_sent(&self.pool, item.id).await? {
                    tracing::info!(
                        outbox_id = %item.id,
                        notification_id = %item.notification_id,
                        channel = %item.channel_name,
                        "Notification sent"
                    );
                    Ok(DispatchOutcome::Sent)
                } else {
                    tracing::warn!(
                        outbox_id = %item.id,
                        "Outbox item left PROCESSING before it could be marked sent"
                    );
                    Ok(DispatchOutcome::Skipped)
                }
            }
            Err(reason) => self.record_failure(item, &reason).await,
        }
    }

    async fn record_failure(
        &self,
        item: &OutboxItem,
        reason: &str,
    ) -> Result<DispatchOutcome, AppError> {
        let transition = self
            .retry
            .on_failure(item.attempts, item.max_attempts, Utc::now());

        if !OutboxStore::record_failure(&self.pool, item.id, &transition, reason).await? {
            tracing::warn!(
                outbox_id = %item.id,
                "Outbox item left PROCESSING before its failure could be recorded"
            );
            return Ok(DispatchOutcome::Skipped);
        }

        let outcome = match transition {
            FailureTransition::Retry {
                attempts,
                next_attempt_at,
            } => {
                tracing::warn!(
                    outbox_id = %item.id,
                    channel = %item.channel_name,
                    attempts,
                    max_attempts = item.max_attempts,
                    next_attempt_at = %next_attempt_at,
                    error = %reason,
                    "Delivery failed, retry scheduled"
                );
                DispatchOutcome::Retrying {
                    attempts,
                    next_attempt_at,
                }
            }
            FailureTransition::Exhausted { attempts } => {
                tracing::error!(
                    outbox_id = %item.id,
                    channel = %item.channel_name,
                    attempts,
                    error = %reason,
                    "Delivery failed permanently"
                );
                DispatchOutcome::Failed { attempts }
            }
        };

        Ok(outcome)
    }

    pub async fn get_notification(&self, id: Uuid) -> Result<Notification, AppError> {
        NotificationStore::find_live(&self.pool, id)
            .await?
            .ok_or(AppError::NotificationNotFound(id))
    }

    /// Newest first. Absent or zero filter values mean "no filter" / "no bound".
    pub async fn list_notifications(
        &self,
        params: &ListNotificationsParams,
    ) -> Result<Vec<Notification>, AppError> {
        NotificationStore::list(&self.pool, params).await
    }

    /// Apply a partial update.
    ///
    /// The notification row is locked for the whole update, so overlapping
    /// patches apply one after the other. A supplied `meta` is validated
    /// against the notification's channel first; on rejection nothing is
    /// changed. With `meta`, every PENDING outbox row gets a fresh payload
    /// and starts its attempts over. With only `scheduled_at`, PENDING rows
    /// are just moved. Rows in any other status are left alone.
    pub async fn update_notification(
        &self,
        id: Uuid,
        patch: &UpdateNotificationRequest,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        let notification = NotificationStore::lock_live(&mut *tx, id)
            .await?
            .ok_or(AppError::NotificationNotFound(id))?;

        if let Some(meta) = &patch.meta {
            let channel = self
                .channels
                .get(&notification.channel_name)
                .ok_or_else(|| AppError::ChannelNotFound(notification.channel_name.clone()))?;
            channel
                .validate(meta)
                .map_err(|e| AppError::InvalidMetadata {
                    channel: notification.channel_name.clone(),
                    reason: e.to_string(),
                })?;
        }

        let title = merge_field(patch.title.as_deref(), &notification.title);
        let content = merge_field(patch.content.as_deref(), &notification.content);

        if title != notification.title || content != notification.content {
            let updated = NotificationStore::update_content(&mut *tx, id, title, content)
                .await
                .map_err(AppError::FailedToUpdateNotification)?;
            if updated == 0 {
                return Err(AppError::NotificationNotFound(id));
            }
        }

        let mut rearmed = 0;
        if let Some(meta) = &patch.meta {
            let payload = serde_json::to_value(Message::new(title, content, meta.clone()))?;
            let next_attempt_at = patch.scheduled_at.unwrap_or_else(Utc::now);
            rearmed = OutboxStore::rearm_pending(&mut *tx, id, &payload, next_attempt_at)
                .await
                .map_err(AppError::FailedToUpdateOutbox)?;
        } else if let Some(scheduled_at) = patch.scheduled_at {
            rearmed = OutboxStore::reschedule_pending(&mut *tx, id, scheduled_at)
                .await
                .map_err(AppError::FailedToUpdateOutbox)?;
        }

        tx.commit().await?;

        tracing::info!(
            notification_id = %id,
            pending_rows_updated = rearmed,
            "Notification updated"
        );

        Ok(())
    }

    /// Soft delete. Outbox rows are left as they are and stay dispatchable.
    pub async fn delete_notification(&self, id: Uuid) -> Result<(), AppError> {
        if !NotificationStore::soft_delete(&self.pool, id).await? {
            return Err(AppError::NotificationNotFound(id));
        }

        tracing::info!(notification_id = %id, "Notification deleted");
        Ok(())
    }
}

/// Empty string counts as "not supplied": a patch cannot clear a field.
fn merge_field<'a>(patched: Option<&'a str>, current: &'a str) -> &'a str {
    match patched {
        Some(value) if !value.is_empty() => value,
        _ => current,
    }
}
