//! ProcessedEventStore port - Interface for tracking processed messages.
//!
//! This port enables idempotent event handling by tracking which messages
//! have been processed by which handlers. Delivery is at-least-once, so the
//! same message may arrive again after:
//! - Outbox sender restarts between dispatch and marking
//! - Broker redelivery after a lock expired
//! - Inbox records requeued by the retry policy
//!
//! Messages are keyed by `EventContext::message_id`.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, Timestamp};

/// Port for tracking which messages have been processed by which handlers.
///
/// Each handler has its own processing record, allowing different handlers
/// to process the same message independently while maintaining idempotency
/// within each handler.
///
/// # Example
///
/// ```ignore
/// if store.contains(message_id, "ReceiptMailer").await? {
///     return Ok(()); // Skip duplicate
/// }
///
/// // Process event...
///
/// store.mark_processed(message_id, "ReceiptMailer").await?;
/// ```
#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    /// Check if a message has been processed by a specific handler.
    async fn contains(&self, message_id: &str, handler_name: &str) -> Result<bool, DomainError>;

    /// Mark a message as processed by a specific handler.
    ///
    /// Called AFTER successful handling so a failure is retried.
    async fn mark_processed(&self, message_id: &str, handler_name: &str)
        -> Result<(), DomainError>;

    /// Delete entries recorded before `timestamp`.
    ///
    /// Returns the number of entries deleted.
    async fn delete_before(&self, timestamp: Timestamp) -> Result<u64, DomainError>;
}
