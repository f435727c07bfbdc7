//! PollingInboxProcessor - Background worker that drains one inbox.
//!
//! Mirrors the outbox sender: requeue what the retry policy allows, fetch
//! a batch of Pending records in receipt order, dispatch each one through
//! the bus's inbox path and mark it Processed or Failed.

use std::sync::Arc;

use crate::domain::boxes::{InboxRecord, RetryPolicy, TYPE_NOT_FOUND_REASON};
use crate::domain::foundation::DomainError;
use crate::ports::{EventInbox, EventSerializer, InboxConfig, SupportsEventBoxes};

use super::outbox_sender::BatchReport;
use super::store_resolver::StoreResolver;
use super::worker::{wait_or_shutdown, WorkerLifecycle, WorkerState};

/// Background worker for one configured inbox.
pub struct PollingInboxProcessor {
    bus: Arc<dyn SupportsEventBoxes>,
    serializer: Arc<dyn EventSerializer>,
    stores: Arc<StoreResolver<dyn EventInbox>>,
    retry_policy: RetryPolicy,
    lifecycle: WorkerLifecycle,
}

impl PollingInboxProcessor {
    pub fn new(
        bus: Arc<dyn SupportsEventBoxes>,
        serializer: Arc<dyn EventSerializer>,
        stores: Arc<StoreResolver<dyn EventInbox>>,
    ) -> Self {
        Self {
            bus,
            serializer,
            stores,
            retry_policy: RetryPolicy::default(),
            lifecycle: WorkerLifecycle::new("inbox-processor"),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    /// Starts polling the inbox described by `config`.
    ///
    /// Stays idle with a warning when the store cannot be resolved.
    pub async fn start(self: &Arc<Self>, config: Arc<InboxConfig>) -> WorkerState {
        let store = match self.stores.resolve(&config) {
            Ok(store) => store,
            Err(e) => {
                tracing::warn!(inbox = %config.name, error = %e, "Inbox store could not be resolved; processor stays idle");
                return self.state();
            }
        };

        let processor = Arc::clone(self);
        self.lifecycle
            .launch(move |mut shutdown| async move {
                tracing::info!(inbox = %config.name, batch_size = config.batch_size, "Inbox processor polling");
                loop {
                    if let Err(e) = processor.process_batch(store.as_ref(), &config).await {
                        tracing::warn!(inbox = %config.name, error = %e, "Inbox polling failure");
                    }
                    if wait_or_shutdown(&mut shutdown, config.poll_interval).await {
                        break;
                    }
                }
            })
            .await;
        self.state()
    }

    /// Stops the loop and waits for the current batch. Idempotent.
    pub async fn stop(&self) {
        self.lifecycle.shutdown().await;
    }

    /// Runs one poll cycle against `config`'s store.
    pub async fn poll_once(&self, config: &InboxConfig) -> Result<BatchReport, DomainError> {
        let store = self.stores.resolve(config)?;
        self.process_batch(store.as_ref(), config).await
    }

    async fn process_batch(
        &self,
        store: &dyn EventInbox,
        config: &InboxConfig,
    ) -> Result<BatchReport, DomainError> {
        let mut report = BatchReport::default();
        if self.retry_policy.is_enabled() {
            report.requeued = store.requeue_failed(&self.retry_policy).await?;
        }

        let records = store.get_pending(config.batch_size).await?;
        report.fetched = records.len();

        for record in records {
            let outcome = match self.process(&record, config).await {
                Ok(()) => store.mark_processed(record.id()).await.map(|_| true),
                Err(reason) => {
                    tracing::warn!(inbox = %config.name, record_id = %record.id(), message_id = %record.event.message_id, reason = %reason, "Inbox record failed");
                    store.mark_failed(record.id(), &reason).await.map(|_| false)
                }
            };
            match outcome {
                Ok(true) => report.succeeded += 1,
                Ok(false) => report.failed += 1,
                Err(e) => {
                    tracing::warn!(inbox = %config.name, record_id = %record.id(), error = %e, "Failed to mark inbox record")
                }
            }
        }

        if report.fetched > 0 {
            tracing::debug!(
                inbox = %config.name,
                fetched = report.fetched,
                succeeded = report.succeeded,
                failed = report.failed,
                "Inbox batch processed"
            );
        }
        Ok(report)
    }

    async fn process(&self, record: &InboxRecord, config: &InboxConfig) -> Result<(), String> {
        if self.serializer.resolve_type(&record.event.event_name).is_none() {
            return Err(TYPE_NOT_FOUND_REASON.to_string());
        }
        self.bus
            .process_from_inbox(&record.event, config)
            .await
            .map_err(|e| e.message)
    }
}
