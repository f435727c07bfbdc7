//! CleanupWorker - Deletes completed box records past their retention.
//!
//! Runs once immediately on start, then every `interval`. Pending records
//! are never touched; Sent, Processed and Failed records go once their
//! terminal timestamp is older than `now - retention`.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::foundation::Timestamp;
use crate::ports::{EventInbox, EventOutbox, ProcessedEventStore};

use super::worker::{wait_or_shutdown, WorkerLifecycle, WorkerState};

/// Counts removed by one cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub outbox_deleted: u64,
    pub inbox_deleted: u64,
    pub processed_deleted: u64,
}

pub struct CleanupWorker {
    outboxes: Vec<Arc<dyn EventOutbox>>,
    inboxes: Vec<Arc<dyn EventInbox>>,
    processed_events: Option<Arc<dyn ProcessedEventStore>>,
    retention: Duration,
    interval: Duration,
    lifecycle: WorkerLifecycle,
}

impl CleanupWorker {
    pub fn new(retention: Duration, interval: Duration) -> Self {
        Self {
            outboxes: Vec::new(),
            inboxes: Vec::new(),
            processed_events: None,
            retention,
            interval,
            lifecycle: WorkerLifecycle::new("box-cleanup"),
        }
    }

    pub fn with_outbox(mut self, outbox: Arc<dyn EventOutbox>) -> Self {
        self.outboxes.push(outbox);
        self
    }

    pub fn with_inbox(mut self, inbox: Arc<dyn EventInbox>) -> Self {
        self.inboxes.push(inbox);
        self
    }

    /// Also prunes idempotency markers older than the retention window.
    pub fn with_processed_events(mut self, store: Arc<dyn ProcessedEventStore>) -> Self {
        self.processed_events = Some(store);
        self
    }

    pub fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    /// Runs one cleanup pass. Store failures are logged and skipped.
    pub async fn run_once(&self) -> CleanupReport {
        let threshold = Timestamp::now().minus(self.retention);
        let mut report = CleanupReport::default();

        for outbox in &self.outboxes {
            match outbox.delete_completed_before(threshold).await {
                Ok(deleted) => report.outbox_deleted += deleted,
                Err(e) => tracing::warn!(error = %e, "Outbox cleanup failed"),
            }
        }
        for inbox in &self.inboxes {
            match inbox.delete_completed_before(threshold).await {
                Ok(deleted) => report.inbox_deleted += deleted,
                Err(e) => tracing::warn!(error = %e, "Inbox cleanup failed"),
            }
        }
        if let Some(store) = &self.processed_events {
            match store.delete_before(threshold).await {
                Ok(deleted) => report.processed_deleted = deleted,
                Err(e) => tracing::warn!(error = %e, "Processed event cleanup failed"),
            }
        }

        tracing::info!(
            outbox_deleted = report.outbox_deleted,
            inbox_deleted = report.inbox_deleted,
            processed_deleted = report.processed_deleted,
            "Box cleanup completed"
        );
        report
    }

    pub async fn start(self: &Arc<Self>) -> WorkerState {
        let worker = Arc::clone(self);
        self.lifecycle
            .launch(move |mut shutdown| async move {
                loop {
                    worker.run_once().await;
                    if wait_or_shutdown(&mut shutdown, worker.interval).await {
                        break;
                    }
                }
            })
            .await;
        self.state()
    }

    pub async fn stop(&self) {
        self.lifecycle.shutdown().await;
    }
}
