//! EventInbox port - Durable staging for incoming events.
//!
//! Broker deliveries accepted for durable processing land here, keyed by
//! the broker's message id so a redelivered message is stored once. An
//! inbox processor drains pending records into the local bus.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::boxes::{BoxConfig, BoxConfigs, InboxRecord, IncomingEventInfo, RetryPolicy};
use crate::domain::foundation::{DomainError, Timestamp};

/// Configuration of one named inbox.
pub type InboxConfig = BoxConfig<dyn EventInbox>;

/// All configured inboxes.
pub type InboxConfigs = BoxConfigs<dyn EventInbox>;

/// Port for the inbox store.
#[async_trait]
pub trait EventInbox: Send + Sync {
    /// Persist a new Pending record for the envelope.
    ///
    /// Returns `false` without storing anything if a record with the same
    /// `message_id` already exists.
    async fn add(&self, event: IncomingEventInfo) -> Result<bool, DomainError>;

    /// Pending records ordered by receipt time, at most `batch_size`.
    ///
    /// Never returns a record whose status is not Pending.
    async fn get_pending(&self, batch_size: usize) -> Result<Vec<InboxRecord>, DomainError>;

    /// Mark a record processed. Marking an already processed record is a no-op.
    async fn mark_processed(&self, id: Uuid) -> Result<(), DomainError>;

    /// Mark a record failed with a reason and count the attempt.
    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<(), DomainError>;

    /// Return Failed records that the policy allows to Pending.
    async fn requeue_failed(&self, policy: &RetryPolicy) -> Result<u64, DomainError>;

    /// Delete Processed and Failed records that completed before `threshold`.
    async fn delete_completed_before(&self, threshold: Timestamp) -> Result<u64, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time check that the trait is object-safe
    #[allow(dead_code)]
    fn assert_inbox_object_safe(_: &dyn EventInbox) {}

    #[test]
    fn inbox_configs_start_empty() {
        let configs = InboxConfigs::new();
        assert!(configs.is_empty());
    }
}
