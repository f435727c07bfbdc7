//! PostgreSQL implementation of EventOutbox.
//!
//! Records live in `outbox_messages`; see `migrations/` for the schema.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::domain::boxes::{
    OutboxRecord, OutboxStatus, OutgoingEventInfo, RetryPolicy, TYPE_NOT_FOUND_REASON,
};
use crate::domain::foundation::{DomainError, Timestamp};
use crate::ports::EventOutbox;

use super::rows::{optional_timestamp, retry_count_from_db};

/// PostgreSQL implementation of EventOutbox.
#[derive(Clone)]
pub struct PostgresEventOutbox {
    pool: PgPool,
}

impl PostgresEventOutbox {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventOutbox for PostgresEventOutbox {
    async fn add(&self, event: OutgoingEventInfo) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO outbox_messages (
                id, event_name, event_data, created_at, correlation_id, status, retry_count
            ) VALUES ($1, $2, $3, $4, $5, $6, 0)
            "#,
        )
        .bind(event.id)
        .bind(&event.event_name)
        .bind(&event.event_data)
        .bind(event.created_at.as_datetime())
        .bind(&event.correlation_id)
        .bind(OutboxStatus::Pending.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::storage("Failed to insert outbox record", e))?;

        Ok(())
    }

    async fn get_pending(&self, batch_size: usize) -> Result<Vec<OutboxRecord>, DomainError> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_name, event_data, created_at, correlation_id,
                   status, error, retry_count, sent_at, failed_at
            FROM outbox_messages
            WHERE status = $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(OutboxStatus::Pending.as_str())
        .bind(batch_size as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::storage("Failed to fetch pending outbox records", e))?;

        rows.iter().map(row_to_record).collect()
    }

    async fn mark_sent(&self, id: Uuid) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            UPDATE outbox_messages SET
                status = $2,
                sent_at = $3
            WHERE id = $1 AND status <> $2
            "#,
        )
        .bind(id)
        .bind(OutboxStatus::Sent.as_str())
        .bind(Timestamp::now().as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::storage("Failed to mark outbox record sent", e))?;

        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            UPDATE outbox_messages SET
                status = $2,
                error = $3,
                retry_count = retry_count + 1,
                failed_at = $4
            WHERE id = $1 AND status <> $5
            "#,
        )
        .bind(id)
        .bind(OutboxStatus::Failed.as_str())
        .bind(reason)
        .bind(Timestamp::now().as_datetime())
        .bind(OutboxStatus::Sent.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::storage("Failed to mark outbox record failed", e))?;

        Ok(())
    }

    async fn requeue_failed(&self, policy: &RetryPolicy) -> Result<u64, DomainError> {
        if !policy.is_enabled() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            UPDATE outbox_messages SET
                status = $1
            WHERE status = $2
              AND retry_count < $3
              AND error IS DISTINCT FROM $5
              AND failed_at <= now() - make_interval(
                    secs => $4 * power(2, GREATEST(retry_count - 1, 0))
                  )
            "#,
        )
        .bind(OutboxStatus::Pending.as_str())
        .bind(OutboxStatus::Failed.as_str())
        .bind(policy.max_retry_count as i32)
        .bind(policy.base_delay.as_secs_f64())
        .bind(TYPE_NOT_FOUND_REASON)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::storage("Failed to requeue failed outbox records", e))?;

        Ok(result.rows_affected())
    }

    async fn delete_completed_before(&self, threshold: Timestamp) -> Result<u64, DomainError> {
        let result = sqlx::query(
            r#"
            DELETE FROM outbox_messages
            WHERE status <> $1
              AND COALESCE(sent_at, failed_at) < $2
            "#,
        )
        .bind(OutboxStatus::Pending.as_str())
        .bind(threshold.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::storage("Failed to delete completed outbox records", e))?;

        Ok(result.rows_affected())
    }
}

fn row_to_record(row: &PgRow) -> Result<OutboxRecord, DomainError> {
    let read = |e: sqlx::Error| DomainError::storage("Failed to read outbox row", e);

    let status: String = row.try_get("status").map_err(read)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(read)?;
    let retry_count: i32 = row.try_get("retry_count").map_err(read)?;

    let event = OutgoingEventInfo {
        id: row.try_get("id").map_err(read)?,
        event_name: row.try_get("event_name").map_err(read)?,
        event_data: row.try_get("event_data").map_err(read)?,
        created_at: Timestamp::from_datetime(created_at),
        correlation_id: row.try_get("correlation_id").map_err(read)?,
    };

    Ok(OutboxRecord {
        event,
        status: status.parse()?,
        error: row.try_get("error").map_err(read)?,
        retry_count: retry_count_from_db(retry_count),
        sent_at: optional_timestamp(row.try_get("sent_at").map_err(read)?),
        failed_at: optional_timestamp(row.try_get("failed_at").map_err(read)?),
    })
}
