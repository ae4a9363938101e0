//! Outbox record store.
//!
//! Status changes are conditional updates guarded on the status the caller
//! expects the row to be in. A guard that matches nothing means another worker
//! (or a patch) got there first, and the caller must treat the row as gone.

use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use herald_common::types::OutboxItem;

use crate::retry::FailureTransition;

/// Fields for a new outbox row. Status is always PENDING with zero attempts.
#[derive(Debug, Clone)]
pub struct NewOutboxItem<'a> {
    pub notification_id: Uuid,
    pub channel_name: &'a str,
    pub payload: &'a serde_json::Value,
    pub max_attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
}

pub struct OutboxStore;

impl OutboxStore {
    pub async fn insert<'e, E>(executor: E, new: &NewOutboxItem<'_>) -> Result<OutboxItem, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let now = Utc::now();
        sqlx::query_as::<_, OutboxItem>(
            r#"
            INSERT INTO outbox (id, notification_id, channel_name, payload, status, attempts, max_attempts, next_attempt_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'PENDING', 0, $5, $6, $7, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.notification_id)
        .bind(new.channel_name)
        .bind(new.payload)
        .bind(new.max_attempts)
        .bind(new.next_attempt_at)
        .bind(now)
        .fetch_one(executor)
        .await
    }

    /// Claim up to `limit` due PENDING rows, oldest-due first.
    ///
    /// Candidates are selected, then moved to PROCESSING by an update that
    /// re-checks `status = 'PENDING'`. Only the ids that update actually
    /// returned are re-read, so a row another claimer took between the select
    /// and the update never shows up in this batch.
    pub async fn claim_batch(
        pool: &PgPool,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxItem>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let candidates: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM outbox
            WHERE status = 'PENDING' AND next_attempt_at <= $1
            ORDER BY next_attempt_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        if candidates.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        let claimed: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE outbox
            SET status = 'PROCESSING', updated_at = NOW()
            WHERE id = ANY($1) AND status = 'PENDING'
            RETURNING id
            "#,
        )
        .bind(&candidates)
        .fetch_all(&mut *tx)
        .await?;

        if claimed.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, OutboxItem>(
            "SELECT * FROM outbox WHERE id = ANY($1) ORDER BY next_attempt_at ASC",
        )
        .bind(&claimed)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(rows)
    }

    /// PROCESSING → SENT. Returns false if the row was no longer PROCESSING.
    pub async fn mark_sent<'e, E>(executor: E, id: Uuid) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET status = 'SENT', updated_at = NOW()
            WHERE id = $1 AND status = 'PROCESSING'
            "#,
        )
        .bind(id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Apply a failed attempt: back to PENDING for a retry, or FAILED once
    /// exhausted. Returns false if the row was no longer PROCESSING.
    pub async fn record_failure<'e, E>(
        executor: E,
        id: Uuid,
        transition: &FailureTransition,
        last_error: &str,
    ) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = match *transition {
            FailureTransition::Retry {
                attempts,
                next_attempt_at,
            } => {
                sqlx::query(
                    r#"
                    UPDATE outbox
                    SET status = 'PENDING', attempts = $1, last_error = $2,
                        next_attempt_at = $3, updated_at = NOW()
                    WHERE id = $4 AND status = 'PROCESSING'
                    "#,
                )
                .bind(attempts)
                .bind(last_error)
                .bind(next_attempt_at)
                .bind(id)
                .execute(executor)
                .await?
            }
            FailureTransition::Exhausted { attempts } => {
                sqlx::query(
                    r#"
                    UPDATE outbox
                    SET status = 'FAILED', attempts = $1, last_error = $2, updated_at = NOW()
                    WHERE id = $3 AND status = 'PROCESSING'
                    "#,
                )
                .bind(attempts)
                .bind(last_error)
                .bind(id)
                .execute(executor)
                .await?
            }
        };

        Ok(result.rows_affected() > 0)
    }

    /// Replace the payload of every still-PENDING row of a notification and
    /// start its attempts over. Returns the number of rows re-armed.
    pub async fn rearm_pending<'e, E>(
        executor: E,
        notification_id: Uuid,
        payload: &serde_json::Value,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET payload = $1, attempts = 0, last_error = NULL,
                next_attempt_at = $2, updated_at = NOW()
            WHERE notification_id = $3 AND status = 'PENDING'
            "#,
        )
        .bind(payload)
        .bind(next_attempt_at)
        .bind(notification_id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    /// Move the next attempt of every still-PENDING row of a notification.
    pub async fn reschedule_pending<'e, E>(
        executor: E,
        notification_id: Uuid,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET next_attempt_at = $1, updated_at = NOW()
            WHERE notification_id = $2 AND status = 'PENDING'
            "#,
        )
        .bind(next_attempt_at)
        .bind(notification_id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    /// Hand PROCESSING rows last touched before `stale_before` back to PENDING.
    /// Attempts are left as they are.
    pub async fn release_stale<'e, E>(
        executor: E,
        stale_before: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET status = 'PENDING', next_attempt_at = NOW(), updated_at = NOW()
            WHERE status = 'PROCESSING' AND updated_at < $1
            "#,
        )
        .bind(stale_before)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn find<'e, E>(executor: E, id: Uuid) -> Result<Option<OutboxItem>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, OutboxItem>("SELECT * FROM outbox WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn list_by_notification<'e, E>(
        executor: E,
        notification_id: Uuid,
    ) -> Result<Vec<OutboxItem>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, OutboxItem>(
            "SELECT * FROM outbox WHERE notification_id = $1 ORDER BY created_at ASC",
        )
        .bind(notification_id)
        .fetch_all(executor)
        .await
    }
}
