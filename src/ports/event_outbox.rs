//! EventOutbox port - Durable staging for outgoing events.
//!
//! Producers that publish durably persist an envelope here and return.
//! An outbox sender later drains pending records through the bus and
//! marks each one sent or failed.
//!
//! ## Lifecycle
//!
//! 1. `add` stores a Pending record
//! 2. `get_pending` returns Pending records, oldest first
//! 3. `mark_sent` / `mark_failed` record the outcome
//! 4. `requeue_failed` returns due Failed records to Pending
//! 5. `delete_completed_before` purges terminal records past retention

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::boxes::{BoxConfig, BoxConfigs, OutboxRecord, OutgoingEventInfo, RetryPolicy};
use crate::domain::foundation::{DomainError, Timestamp};

/// Configuration of one named outbox.
pub type OutboxConfig = BoxConfig<dyn EventOutbox>;

/// All configured outboxes.
pub type OutboxConfigs = BoxConfigs<dyn EventOutbox>;

/// Port for the outbox store.
///
/// A single poller per configured outbox is assumed; implementations need
/// not hand out disjoint batches to concurrent pollers.
#[async_trait]
pub trait EventOutbox: Send + Sync {
    /// Persist a new Pending record for the envelope.
    async fn add(&self, event: OutgoingEventInfo) -> Result<(), DomainError>;

    /// Pending records ordered by creation time, at most `batch_size`.
    ///
    /// Never returns a record whose status is not Pending.
    async fn get_pending(&self, batch_size: usize) -> Result<Vec<OutboxRecord>, DomainError>;

    /// Mark a record sent. Marking an already sent record is a no-op.
    async fn mark_sent(&self, id: Uuid) -> Result<(), DomainError>;

    /// Mark a record failed with a reason and count the attempt.
    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<(), DomainError>;

    /// Return Failed records that the policy allows to Pending.
    ///
    /// Returns the number of records requeued.
    async fn requeue_failed(&self, policy: &RetryPolicy) -> Result<u64, DomainError>;

    /// Delete Sent and Failed records that completed before `threshold`.
    ///
    /// Returns the number of records deleted.
    async fn delete_completed_before(&self, threshold: Timestamp) -> Result<u64, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time check that the trait is object-safe
    #[allow(dead_code)]
    fn assert_outbox_object_safe(_: &dyn EventOutbox) {}

    #[test]
    fn outbox_config_names_default_box() {
        let configs = OutboxConfigs::new();
        let config = configs.get_or_add(crate::domain::boxes::DEFAULT_BOX_NAME);
        assert_eq!(config.name, "Default");
        assert!(config.factory.is_none());
    }
}
