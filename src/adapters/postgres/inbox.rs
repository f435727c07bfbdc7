//! PostgreSQL implementation of EventInbox.
//!
//! `inbox_messages.message_id` is unique, so a redelivered broker message
//! collapses onto the existing row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::domain::boxes::{
    InboxRecord, InboxStatus, IncomingEventInfo, RetryPolicy, TYPE_NOT_FOUND_REASON,
};
use crate::domain::foundation::{DomainError, Timestamp};
use crate::ports::EventInbox;

use super::rows::{optional_timestamp, retry_count_from_db};

/// PostgreSQL implementation of EventInbox.
#[derive(Clone)]
pub struct PostgresEventInbox {
    pool: PgPool,
}

impl PostgresEventInbox {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventInbox for PostgresEventInbox {
    async fn add(&self, event: IncomingEventInfo) -> Result<bool, DomainError> {
        let result = sqlx::query(
            r#"
            INSERT INTO inbox_messages (
                id, message_id, event_name, event_data, received_at,
                correlation_id, status, retry_count
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, 0)
            ON CONFLICT (message_id) DO NOTHING
            "#,
        )
        .bind(event.id)
        .bind(&event.message_id)
        .bind(&event.event_name)
        .bind(&event.event_data)
        .bind(event.received_at.as_datetime())
        .bind(&event.correlation_id)
        .bind(InboxStatus::Pending.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::storage("Failed to insert inbox record", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_pending(&self, batch_size: usize) -> Result<Vec<InboxRecord>, DomainError> {
        let rows = sqlx::query(
            r#"
            SELECT id, message_id, event_name, event_data, received_at, correlation_id,
                   status, error, retry_count, processed_at, failed_at
            FROM inbox_messages
            WHERE status = $1
            ORDER BY received_at ASC
            LIMIT $2
            "#,
        )
        .bind(InboxStatus::Pending.as_str())
        .bind(batch_size as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::storage("Failed to fetch pending inbox records", e))?;

        rows.iter().map(row_to_record).collect()
    }

    async fn mark_processed(&self, id: Uuid) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            UPDATE inbox_messages SET
                status = $2,
                processed_at = $3
            WHERE id = $1 AND status <> $2
            "#,
        )
        .bind(id)
        .bind(InboxStatus::Processed.as_str())
        .bind(Timestamp::now().as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::storage("Failed to mark inbox record processed", e))?;

        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            UPDATE inbox_messages SET
                status = $2,
                error = $3,
                retry_count = retry_count + 1,
                failed_at = $4
            WHERE id = $1 AND status <> $5
            "#,
        )
        .bind(id)
        .bind(InboxStatus::Failed.as_str())
        .bind(reason)
        .bind(Timestamp::now().as_datetime())
        .bind(InboxStatus::Processed.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::storage("Failed to mark inbox record failed", e))?;

        Ok(())
    }

    async fn requeue_failed(&self, policy: &RetryPolicy) -> Result<u64, DomainError> {
        if !policy.is_enabled() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            UPDATE inbox_messages SET
                status = $1
            WHERE status = $2
              AND retry_count < $3
              AND error IS DISTINCT FROM $5
              AND failed_at <= now() - make_interval(
                    secs => $4 * power(2, GREATEST(retry_count - 1, 0))
                  )
            "#,
        )
        .bind(InboxStatus::Pending.as_str())
        .bind(InboxStatus::Failed.as_str())
        .bind(policy.max_retry_count as i32)
        .bind(policy.base_delay.as_secs_f64())
        .bind(TYPE_NOT_FOUND_REASON)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::storage("Failed to requeue failed inbox records", e))?;

        Ok(result.rows_affected())
    }

    async fn delete_completed_before(&self, threshold: Timestamp) -> Result<u64, DomainError> {
        let result = sqlx::query(
            r#"
            DELETE FROM inbox_messages
            WHERE status <> $1
              AND COALESCE(processed_at, failed_at) < $2
            "#,
        )
        .bind(InboxStatus::Pending.as_str())
        .bind(threshold.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::storage("Failed to delete completed inbox records", e))?;

        Ok(result.rows_affected())
    }
}

fn row_to_record(row: &PgRow) -> Result<InboxRecord, DomainError> {
    let read = |e: sqlx::Error| DomainError::storage("Failed to read inbox row", e);

    let status: String = row.try_get("status").map_err(read)?;
    let received_at: DateTime<Utc> = row.try_get("received_at").map_err(read)?;
    let retry_count: i32 = row.try_get("retry_count").map_err(read)?;

    let event = IncomingEventInfo {
        id: row.try_get("id").map_err(read)?,
        message_id: row.try_get("message_id").map_err(read)?,
        event_name: row.try_get("event_name").map_err(read)?,
        event_data: row.try_get("event_data").map_err(read)?,
        received_at: Timestamp::from_datetime(received_at),
        correlation_id: row.try_get("correlation_id").map_err(read)?,
    };

    Ok(InboxRecord {
        event,
        status: status.parse()?,
        error: row.try_get("error").map_err(read)?,
        retry_count: retry_count_from_db(retry_count),
        processed_at: optional_timestamp(row.try_get("processed_at").map_err(read)?),
        failed_at: optional_timestamp(row.try_get("failed_at").map_err(read)?),
    })
}
