//! PostgreSQL adapters - sqlx-backed event boxes.
//!
//! - `PostgresEventOutbox` - `outbox_messages`
//! - `PostgresEventInbox` - `inbox_messages`, deduplicated on `message_id`
//! - `PostgresProcessedEventStore` - `processed_events`
//!
//! The schema ships in `migrations/` and is embedded with `sqlx::migrate!`.

mod inbox;
mod outbox;
mod processed_event_store;
mod rows;

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::DatabaseConfig;
use crate::domain::foundation::DomainError;

pub use inbox::PostgresEventInbox;
pub use outbox::PostgresEventOutbox;
pub use processed_event_store::PostgresProcessedEventStore;

/// Opens a pool and, if configured, applies the embedded migrations.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, DomainError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout())
        .connect(&config.url)
        .await
        .map_err(|e| DomainError::storage("Failed to connect to database", e))?;

    if config.run_migrations {
        migrate(&pool).await?;
    }

    tracing::info!(
        max_connections = config.max_connections,
        migrations = config.run_migrations,
        "Database pool ready"
    );
    Ok(pool)
}

/// Applies the embedded schema migrations.
pub async fn migrate(pool: &PgPool) -> Result<(), DomainError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| DomainError::storage("Failed to run migrations", e))
}
