//! In-memory outbox and inbox stores.
//!
//! Useful for tests and single-process deployments that accept losing
//! pending records on restart.

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::boxes::{
    InboxRecord, InboxStatus, IncomingEventInfo, OutboxRecord, OutboxStatus, OutgoingEventInfo,
    RetryPolicy,
};
use crate::domain::foundation::{DomainError, ErrorCode, Timestamp};
use crate::ports::{EventInbox, EventOutbox};

fn record_not_found(kind: &str, id: Uuid) -> DomainError {
    DomainError::new(ErrorCode::NotFound, format!("{} record {} not found", kind, id))
}

/// Outbox kept in a vector, in insertion order.
#[derive(Default)]
pub struct InMemoryEventOutbox {
    records: RwLock<Vec<OutboxRecord>>,
}

impl InMemoryEventOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies of every record.
    pub async fn records(&self) -> Vec<OutboxRecord> {
        self.records.read().await.clone()
    }

    pub async fn get(&self, id: Uuid) -> Option<OutboxRecord> {
        self.records.read().await.iter().find(|r| r.id() == id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn count_with_status(&self, status: OutboxStatus) -> usize {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.status == status)
            .count()
    }
}

#[async_trait]
impl EventOutbox for InMemoryEventOutbox {
    async fn add(&self, event: OutgoingEventInfo) -> Result<(), DomainError> {
        self.records.write().await.push(OutboxRecord::new(event));
        Ok(())
    }

    async fn get_pending(&self, batch_size: usize) -> Result<Vec<OutboxRecord>, DomainError> {
        let records = self.records.read().await;
        let mut pending: Vec<OutboxRecord> =
            records.iter().filter(|r| r.is_pending()).cloned().collect();
        pending.sort_by_key(|r| r.event.created_at);
        pending.truncate(batch_size);
        Ok(pending)
    }

    async fn mark_sent(&self, id: Uuid) -> Result<(), DomainError> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.id() == id)
            .ok_or_else(|| record_not_found("Outbox", id))?;
        record.mark_sent(Timestamp::now());
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<(), DomainError> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.id() == id)
            .ok_or_else(|| record_not_found("Outbox", id))?;
        record.mark_failed(reason, Timestamp::now());
        Ok(())
    }

    async fn requeue_failed(&self, policy: &RetryPolicy) -> Result<u64, DomainError> {
        if !policy.is_enabled() {
            return Ok(0);
        }
        let now = Timestamp::now();
        let mut records = self.records.write().await;
        let requeued = records
            .iter_mut()
            .filter(|r| r.status == OutboxStatus::Failed)
            .map(|r| r.requeue_if_due(policy, now))
            .filter(|requeued| *requeued)
            .count();
        Ok(requeued as u64)
    }

    async fn delete_completed_before(&self, threshold: Timestamp) -> Result<u64, DomainError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| {
            r.completed_at()
                .map_or(true, |completed| !completed.is_before(&threshold))
        });
        Ok((before - records.len()) as u64)
    }
}

/// Inbox kept in a vector, unique by broker message id.
#[derive(Default)]
pub struct InMemoryEventInbox {
    records: RwLock<Vec<InboxRecord>>,
}

impl InMemoryEventInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies of every record.
    pub async fn records(&self) -> Vec<InboxRecord> {
        self.records.read().await.clone()
    }

    pub async fn get(&self, id: Uuid) -> Option<InboxRecord> {
        self.records.read().await.iter().find(|r| r.id() == id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn count_with_status(&self, status: InboxStatus) -> usize {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.status == status)
            .count()
    }
}

#[async_trait]
impl EventInbox for InMemoryEventInbox {
    async fn add(&self, event: IncomingEventInfo) -> Result<bool, DomainError> {
        let mut records = self.records.write().await;
        if records
            .iter()
            .any(|r| r.event.message_id == event.message_id)
        {
            return Ok(false);
        }
        records.push(InboxRecord::new(event));
        Ok(true)
    }

    async fn get_pending(&self, batch_size: usize) -> Result<Vec<InboxRecord>, DomainError> {
        let records = self.records.read().await;
        let mut pending: Vec<InboxRecord> =
            records.iter().filter(|r| r.is_pending()).cloned().collect();
        pending.sort_by_key(|r| r.event.received_at);
        pending.truncate(batch_size);
        Ok(pending)
    }

    async fn mark_processed(&self, id: Uuid) -> Result<(), DomainError> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.id() == id)
            .ok_or_else(|| record_not_found("Inbox", id))?;
        record.mark_processed(Timestamp::now());
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<(), DomainError> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.id() == id)
            .ok_or_else(|| record_not_found("Inbox", id))?;
        record.mark_failed(reason, Timestamp::now());
        Ok(())
    }

    async fn requeue_failed(&self, policy: &RetryPolicy) -> Result<u64, DomainError> {
        if !policy.is_enabled() {
            return Ok(0);
        }
        let now = Timestamp::now();
        let mut records = self.records.write().await;
        let requeued = records
            .iter_mut()
            .filter(|r| r.status == InboxStatus::Failed)
            .map(|r| r.requeue_if_due(policy, now))
            .filter(|requeued| *requeued)
            .count();
        Ok(requeued as u64)
    }

    async fn delete_completed_before(&self, threshold: Timestamp) -> Result<u64, DomainError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| {
            r.completed_at()
                .map_or(true, |completed| !completed.is_before(&threshold))
        });
        Ok((before - records.len()) as u64)
    }
}
