//! Notification record store.
//!
//! Every read filters out soft-deleted rows; a notification with `deleted_at`
//! set no longer exists as far as callers are concerned.

use chrono::Utc;
use sqlx::PgExecutor;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::Notification;

/// Fields for a new notification row.
#[derive(Debug, Clone)]
pub struct NewNotification<'a> {
    pub user_id: Uuid,
    pub title: &'a str,
    pub content: &'a str,
    pub channel_name: &'a str,
    pub idempotency_key: &'a str,
}

/// Optional owner filter and pagination. `None` (or zero) means unbounded.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ListNotificationsParams {
    pub user_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub struct NotificationStore;

impl NotificationStore {
    /// Insert a notification. A live row with the same idempotency key turns
    /// into [`AppError::DuplicateNotification`].
    pub async fn insert<'e, E>(
        executor: E,
        new: &NewNotification<'_>,
    ) -> Result<Notification, AppError>
    where
        E: PgExecutor<'e>,
    {
        let now = Utc::now();
        let result = sqlx::query_as::<_, Notification>(
            r#"
            INSERT INTO notifications (id, user_id, title, content, channel_name, idempotency_key, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.user_id)
        .bind(new.title)
        .bind(new.content)
        .bind(new.channel_name)
        .bind(new.idempotency_key)
        .bind(now)
        .fetch_one(executor)
        .await;

        match result {
            Ok(notification) => Ok(notification),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(AppError::DuplicateNotification)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch a live notification by id.
    pub async fn find_live<'e, E>(executor: E, id: Uuid) -> Result<Option<Notification>, AppError>
    where
        E: PgExecutor<'e>,
    {
        let notification = sqlx::query_as::<_, Notification>(
            "SELECT * FROM notifications WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(notification)
    }

    /// Fetch a live notification and lock it until the surrounding
    /// transaction ends.
    pub async fn lock_live<'e, E>(executor: E, id: Uuid) -> Result<Option<Notification>, AppError>
    where
        E: PgExecutor<'e>,
    {
        let notification = sqlx::query_as::<_, Notification>(
            "SELECT * FROM notifications WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(notification)
    }

    /// List live notifications, newest first.
    pub async fn list<'e, E>(
        executor: E,
        params: &ListNotificationsParams,
    ) -> Result<Vec<Notification>, AppError>
    where
        E: PgExecutor<'e>,
    {
        // LIMIT NULL is LIMIT ALL and OFFSET NULL is OFFSET 0 in Postgres.
        let limit = params.limit.filter(|l| *l > 0);
        let offset = params.offset.filter(|o| *o > 0);

        let notifications = sqlx::query_as::<_, Notification>(
            r#"
            SELECT * FROM notifications
            WHERE deleted_at IS NULL
              AND ($1::uuid IS NULL OR user_id = $1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(params.user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(executor)
        .await?;

        Ok(notifications)
    }

    /// Overwrite title and content. Returns the number of rows touched.
    pub async fn update_content<'e, E>(
        executor: E,
        id: Uuid,
        title: &str,
        content: &str,
    ) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET title = $1, content = $2, updated_at = NOW()
            WHERE id = $3 AND deleted_at IS NULL
            "#,
        )
        .bind(title)
        .bind(content)
        .bind(id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    /// Stamp `deleted_at`. Returns true if a live row was marked.
    pub async fn soft_delete<'e, E>(executor: E, id: Uuid) -> Result<bool, AppError>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET deleted_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
