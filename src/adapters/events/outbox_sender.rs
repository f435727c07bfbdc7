//! PollingOutboxSender - Background worker that drains one outbox.
//!
//! ## Poll cycle
//!
//! 1. Requeue Failed records the retry policy allows
//! 2. Fetch up to `batch_size` Pending records, oldest first
//! 3. For each record: resolve its type, hand it to the bus, mark it
//!    Sent, or mark it Failed with the reason
//! 4. Wait `poll_interval` (cancellable) and repeat
//!
//! Store errors are logged and retried next cycle; they never end the loop.
//!
//! ## Graceful Shutdown
//!
//! `stop` signals the loop and waits for the current batch to finish, so
//! no record is left without its mark.

use std::sync::Arc;

use crate::domain::boxes::{OutboxRecord, RetryPolicy, TYPE_NOT_FOUND_REASON};
use crate::domain::foundation::DomainError;
use crate::ports::{EventOutbox, EventSerializer, OutboxConfig, SupportsEventBoxes};

use super::store_resolver::StoreResolver;
use super::worker::{wait_or_shutdown, WorkerLifecycle, WorkerState};

/// Outcome of one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub fetched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub requeued: u64,
}

/// Background worker for one configured outbox.
pub struct PollingOutboxSender {
    bus: Arc<dyn SupportsEventBoxes>,
    serializer: Arc<dyn EventSerializer>,
    stores: Arc<StoreResolver<dyn EventOutbox>>,
    retry_policy: RetryPolicy,
    lifecycle: WorkerLifecycle,
}

impl PollingOutboxSender {
    pub fn new(
        bus: Arc<dyn SupportsEventBoxes>,
        serializer: Arc<dyn EventSerializer>,
        stores: Arc<StoreResolver<dyn EventOutbox>>,
    ) -> Self {
        Self {
            bus,
            serializer,
            stores,
            retry_policy: RetryPolicy::default(),
            lifecycle: WorkerLifecycle::new("outbox-sender"),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    /// Starts polling the outbox described by `config`.
    ///
    /// If the store cannot be resolved the sender stays idle and logs a
    /// warning; this never fails the host.
    pub async fn start(self: &Arc<Self>, config: Arc<OutboxConfig>) -> WorkerState {
        let store = match self.stores.resolve(&config) {
            Ok(store) => store,
            Err(e) => {
                tracing::warn!(outbox = %config.name, error = %e, "Outbox store could not be resolved; sender stays idle");
                return self.state();
            }
        };

        let sender = Arc::clone(self);
        self.lifecycle
            .launch(move |mut shutdown| async move {
                tracing::info!(outbox = %config.name, batch_size = config.batch_size, "Outbox sender polling");
                loop {
                    if let Err(e) = sender.process_batch(store.as_ref(), &config).await {
                        tracing::warn!(outbox = %config.name, error = %e, "Outbox polling failure");
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
    pub async fn poll_once(&self, config: &OutboxConfig) -> Result<BatchReport, DomainError> {
        let store = self.stores.resolve(config)?;
        self.process_batch(store.as_ref(), config).await
    }

    async fn process_batch(
        &self,
        store: &dyn EventOutbox,
        config: &OutboxConfig,
    ) -> Result<BatchReport, DomainError> {
        let mut report = BatchReport::default();
        if self.retry_policy.is_enabled() {
            report.requeued = store.requeue_failed(&self.retry_policy).await?;
        }

        let records = store.get_pending(config.batch_size).await?;
        report.fetched = records.len();

        for record in records {
            match self.send(&record, config).await {
                Ok(()) => {
                    if let Err(e) = store.mark_sent(record.id()).await {
                        tracing::warn!(outbox = %config.name, record_id = %record.id(), error = %e, "Failed to mark record sent");
                        continue;
                    }
                    report.succeeded += 1;
                }
                Err(reason) => {
                    tracing::warn!(outbox = %config.name, record_id = %record.id(), event = %record.event.event_name, reason = %reason, "Outbox record failed");
                    if let Err(e) = store.mark_failed(record.id(), &reason).await {
                        tracing::warn!(outbox = %config.name, record_id = %record.id(), error = %e, "Failed to mark record failed");
                        continue;
                    }
                    report.failed += 1;
                }
            }
        }

        if report.fetched > 0 {
            tracing::debug!(
                outbox = %config.name,
                fetched = report.fetched,
                succeeded = report.succeeded,
                failed = report.failed,
                "Outbox batch processed"
            );
        }
        Ok(report)
    }

    /// Returns the failure reason to record, if any.
    async fn send(&self, record: &OutboxRecord, config: &OutboxConfig) -> Result<(), String> {
        if self.serializer.resolve_type(&record.event.event_name).is_none() {
            return Err(TYPE_NOT_FOUND_REASON.to_string());
        }
        self.bus
            .publish_from_outbox(&record.event, config)
            .await
            .map_err(|e| e.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::events::{JsonEventSerializer, LocalEventBus};
    use crate::adapters::memory::InMemoryEventOutbox;
    use crate::domain::boxes::{OutboxStatus, OutgoingEventInfo, DEFAULT_BOX_NAME};
    use crate::domain::foundation::{EventTypeRegistry, ErrorCode};
    use crate::ports::{EventBusExt, OutboxConfigs};
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct ReportGenerated {
        report_id: String,
    }
    crate::distributed_event!(ReportGenerated, name = "reports.report_generated");

    struct Fixture {
        bus: Arc<LocalEventBus>,
        outbox: Arc<InMemoryEventOutbox>,
        sender: Arc<PollingOutboxSender>,
        config: Arc<OutboxConfig>,
        calls: Arc<AtomicUsize>,
        fail: Arc<AtomicBool>,
    }

    async fn fixture(batch_size: usize) -> (Fixture, crate::ports::Subscription) {
        let registry = Arc::new(EventTypeRegistry::new());
        registry.register::<ReportGenerated>();
        let serializer: Arc<dyn EventSerializer> =
            Arc::new(JsonEventSerializer::new(registry.clone()));
        let outbox = Arc::new(InMemoryEventOutbox::new());
        let stores = Arc::new(StoreResolver::<dyn EventOutbox>::new().with_binding("memory", outbox.clone()));
        let configs = Arc::new(OutboxConfigs::new());
        let config = configs.configure(DEFAULT_BOX_NAME, |c| {
            c.with_batch_size(batch_size)
                .with_poll_interval(Duration::from_millis(10))
        });
        let bus = Arc::new(
            LocalEventBus::new(registry, serializer.clone()).with_outboxes(configs, stores.clone()),
        );

        let calls = Arc::new(AtomicUsize::new(0));
        let fail = Arc::new(AtomicBool::new(false));
        let (counter, failing) = (calls.clone(), fail.clone());
        let subscription = bus
            .subscribe_fn::<ReportGenerated, _, _>("ReportCounter", move |_event| {
                let counter = counter.clone();
                let failing = failing.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if failing.load(Ordering::SeqCst) {
                        return Err(DomainError::new(ErrorCode::InternalError, "renderer offline"));
                    }
                    Ok(())
                }
            })
            .await
            .unwrap();

        let sender = Arc::new(
            PollingOutboxSender::new(bus.clone(), serializer, stores)
                .with_retry_policy(RetryPolicy::disabled()),
        );
        (
            Fixture {
                bus,
                outbox,
                sender,
                config,
                calls,
                fail,
            },
            subscription,
        )
    }

    fn report(id: &str) -> ReportGenerated {
        ReportGenerated {
            report_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn poll_once_sends_pending_records() {
        let (f, _s) = fixture(10).await;
        f.bus.publish(report("r-1"), true).await.unwrap();
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);

        let outcome = f.sender.poll_once(&f.config).await.unwrap();

        assert_eq!(outcome.fetched, 1);
        assert_eq!(outcome.succeeded, 1);
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.outbox.count_with_status(OutboxStatus::Sent).await, 1);
    }

    #[tokio::test]
    async fn respects_batch_size() {
        let (f, _s) = fixture(2).await;
        for i in 0..5 {
            f.bus.publish(report(&format!("r-{}", i)), true).await.unwrap();
        }

        assert_eq!(f.sender.poll_once(&f.config).await.unwrap().succeeded, 2);
        assert_eq!(f.sender.poll_once(&f.config).await.unwrap().succeeded, 2);
        assert_eq!(f.sender.poll_once(&f.config).await.unwrap().succeeded, 1);
        assert_eq!(f.outbox.count_with_status(OutboxStatus::Pending).await, 0);
    }

    #[tokio::test]
    async fn unknown_type_is_marked_failed_without_dispatch() {
        let (f, _s) = fixture(10).await;
        let orphan = OutgoingEventInfo::new("reports.retired_event:v1", b"{}".to_vec());
        f.outbox.add(orphan.clone()).await.unwrap();

        let outcome = f.sender.poll_once(&f.config).await.unwrap();

        let record = f.outbox.get(orphan.id).await.unwrap();
        assert_eq!(outcome.failed, 1);
        assert_eq!(record.status, OutboxStatus::Failed);
        assert_eq!(record.error.as_deref(), Some(TYPE_NOT_FOUND_REASON));
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_failure_marks_record_failed_with_message() {
        let (f, _s) = fixture(10).await;
        f.fail.store(true, Ordering::SeqCst);
        f.bus.publish(report("r-9"), true).await.unwrap();

        f.sender.poll_once(&f.config).await.unwrap();

        let record = f.outbox.records().await.remove(0);
        assert_eq!(record.status, OutboxStatus::Failed);
        assert_eq!(record.retry_count, 1);
        assert!(record.error.unwrap().contains("renderer offline"));
    }

    #[tokio::test]
    async fn retry_policy_requeues_failed_records() {
        let (f, _s) = fixture(10).await;
        let sender = Arc::new(
            PollingOutboxSender::new(
                f.bus.clone(),
                f.bus.serializer().clone(),
                f.bus.outbox_stores().clone(),
            )
            .with_retry_policy(RetryPolicy::new(3, Duration::ZERO)),
        );
        f.fail.store(true, Ordering::SeqCst);
        f.bus.publish(report("r-10"), true).await.unwrap();
        sender.poll_once(&f.config).await.unwrap();

        f.fail.store(false, Ordering::SeqCst);
        let outcome = sender.poll_once(&f.config).await.unwrap();

        assert_eq!(outcome.requeued, 1);
        assert_eq!(outcome.succeeded, 1);
        let record = f.outbox.records().await.remove(0);
        assert_eq!(record.status, OutboxStatus::Sent);
        assert_eq!(record.retry_count, 1);
    }

    #[tokio::test]
    async fn unknown_type_is_not_retried() {
        let (f, _s) = fixture(10).await;
        let sender = PollingOutboxSender::new(
            f.bus.clone(),
            f.bus.serializer().clone(),
            f.bus.outbox_stores().clone(),
        )
        .with_retry_policy(RetryPolicy::new(5, Duration::ZERO));
        let orphan = OutgoingEventInfo::new("gone.type:v1", b"{}".to_vec());
        f.outbox.add(orphan.clone()).await.unwrap();

        let mut fetched = 0;
        for _ in 0..6 {
            let outcome = sender.poll_once(&f.config).await.unwrap();
            assert_eq!(outcome.requeued, 0);
            fetched += outcome.fetched;
        }

        let record = f.outbox.get(orphan.id).await.unwrap();
        assert_eq!(fetched, 1);
        assert_eq!(record.status, OutboxStatus::Failed);
        assert_eq!(record.retry_count, 1);
    }

    #[tokio::test]
    async fn background_loop_drains_and_stops() {
        let (f, _s) = fixture(10).await;
        f.bus.publish(report("r-11"), true).await.unwrap();

        assert_eq!(f.sender.start(f.config.clone()).await, WorkerState::Running);
        tokio::time::sleep(Duration::from_millis(60)).await;
        f.sender.stop().await;
        f.sender.stop().await;

        assert_eq!(f.sender.state(), WorkerState::Stopped);
        assert_eq!(f.outbox.count_with_status(OutboxStatus::Sent).await, 1);
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unresolvable_store_leaves_sender_idle() {
        let (f, _s) = fixture(10).await;
        let orphan_config = Arc::new(OutboxConfig::new("orphan").with_implementation("missing"));

        assert_eq!(f.sender.start(orphan_config).await, WorkerState::Idle);
    }
}
