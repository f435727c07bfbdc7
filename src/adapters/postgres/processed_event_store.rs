//! PostgreSQL implementation of ProcessedEventStore.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::foundation::{DomainError, Timestamp};
use crate::ports::ProcessedEventStore;

#[derive(Clone)]
pub struct PostgresProcessedEventStore {
    pool: PgPool,
}

impl PostgresProcessedEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcessedEventStore for PostgresProcessedEventStore {
    async fn contains(&self, message_id: &str, handler_name: &str) -> Result<bool, DomainError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM processed_events
                WHERE message_id = $1 AND handler_name = $2
            )
            "#,
        )
        .bind(message_id)
        .bind(handler_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DomainError::storage("Failed to check processed event", e))?;

        Ok(exists)
    }

    async fn mark_processed(
        &self,
        message_id: &str,
        handler_name: &str,
    ) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO processed_events (message_id, handler_name, processed_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (message_id, handler_name) DO NOTHING
            "#,
        )
        .bind(message_id)
        .bind(handler_name)
        .bind(Timestamp::now().as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::storage("Failed to mark event processed", e))?;

        Ok(())
    }

    async fn delete_before(&self, timestamp: Timestamp) -> Result<u64, DomainError> {
        let result = sqlx::query("DELETE FROM processed_events WHERE processed_at < $1")
            .bind(timestamp.as_datetime())
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::storage("Failed to delete processed events", e))?;

        Ok(result.rows_affected())
    }
}
