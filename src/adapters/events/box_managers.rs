//! Managers that run one polling worker per enabled box.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::domain::boxes::RetryPolicy;
use crate::ports::{
    EventInbox, EventOutbox, EventSerializer, InboxConfigs, OutboxConfigs, SupportsEventBoxes,
};

use super::inbox_processor::PollingInboxProcessor;
use super::outbox_sender::PollingOutboxSender;
use super::store_resolver::StoreResolver;
use super::worker::WorkerState;

/// Shared settings for the workers a manager starts.
#[derive(Debug, Clone, Default)]
pub struct BoxWorkerOptions {
    pub retry_policy: RetryPolicy,
    /// Accepted for configuration compatibility; delivery stays at-least-once.
    pub enable_exactly_once_delivery: bool,
}

fn warn_if_exactly_once(options: &BoxWorkerOptions) {
    if options.enable_exactly_once_delivery {
        tracing::warn!("Exactly-once delivery is not enforced; handlers must tolerate redelivery");
    }
}

/// Starts and stops an outbox sender for every enabled outbox.
pub struct OutboxSenderManager {
    bus: Arc<dyn SupportsEventBoxes>,
    serializer: Arc<dyn EventSerializer>,
    stores: Arc<StoreResolver<dyn EventOutbox>>,
    configs: Arc<OutboxConfigs>,
    options: BoxWorkerOptions,
    senders: Mutex<Vec<Arc<PollingOutboxSender>>>,
}

impl OutboxSenderManager {
    pub fn new(
        bus: Arc<dyn SupportsEventBoxes>,
        serializer: Arc<dyn EventSerializer>,
        stores: Arc<StoreResolver<dyn EventOutbox>>,
        configs: Arc<OutboxConfigs>,
        options: BoxWorkerOptions,
    ) -> Self {
        Self {
            bus,
            serializer,
            stores,
            configs,
            options,
            senders: Mutex::new(Vec::new()),
        }
    }

    /// Starts one sender per enabled outbox. Returns how many are running.
    ///
    /// Calling `start` again without `stop` is a no-op.
    pub async fn start(&self) -> usize {
        let mut senders = self.senders.lock().await;
        if !senders.is_empty() {
            return running_count(senders.iter().map(|s| s.state()));
        }
        warn_if_exactly_once(&self.options);

        for config in self.configs.enabled() {
            let sender = Arc::new(
                PollingOutboxSender::new(
                    self.bus.clone(),
                    self.serializer.clone(),
                    self.stores.clone(),
                )
                .with_retry_policy(self.options.retry_policy),
            );
            sender.start(config).await;
            senders.push(sender);
        }
        running_count(senders.iter().map(|s| s.state()))
    }

    /// Stops every sender and waits for their loops to exit.
    pub async fn stop(&self) {
        let senders = std::mem::take(&mut *self.senders.lock().await);
        futures::future::join_all(senders.iter().map(|s| s.stop())).await;
    }

    pub async fn states(&self) -> Vec<WorkerState> {
        self.senders.lock().await.iter().map(|s| s.state()).collect()
    }
}

/// Starts and stops an inbox processor for every enabled inbox.
pub struct InboxProcessManager {
    bus: Arc<dyn SupportsEventBoxes>,
    serializer: Arc<dyn EventSerializer>,
    stores: Arc<StoreResolver<dyn EventInbox>>,
    configs: Arc<InboxConfigs>,
    options: BoxWorkerOptions,
    processors: Mutex<Vec<Arc<PollingInboxProcessor>>>,
}

impl InboxProcessManager {
    pub fn new(
        bus: Arc<dyn SupportsEventBoxes>,
        serializer: Arc<dyn EventSerializer>,
        stores: Arc<StoreResolver<dyn EventInbox>>,
        configs: Arc<InboxConfigs>,
        options: BoxWorkerOptions,
    ) -> Self {
        Self {
            bus,
            serializer,
            stores,
            configs,
            options,
            processors: Mutex::new(Vec::new()),
        }
    }

    /// Starts one processor per enabled inbox. Returns how many are running.
    pub async fn start(&self) -> usize {
        let mut processors = self.processors.lock().await;
        if !processors.is_empty() {
            return running_count(processors.iter().map(|p| p.state()));
        }
        warn_if_exactly_once(&self.options);

        for config in self.configs.enabled() {
            let processor = Arc::new(
                PollingInboxProcessor::new(
                    self.bus.clone(),
                    self.serializer.clone(),
                    self.stores.clone(),
                )
                .with_retry_policy(self.options.retry_policy),
            );
            processor.start(config).await;
            processors.push(processor);
        }
        running_count(processors.iter().map(|p| p.state()))
    }

    pub async fn stop(&self) {
        let processors = std::mem::take(&mut *self.processors.lock().await);
        futures::future::join_all(processors.iter().map(|p| p.stop())).await;
    }

    pub async fn states(&self) -> Vec<WorkerState> {
        self.processors.lock().await.iter().map(|p| p.state()).collect()
    }
}

fn running_count(states: impl Iterator<Item = WorkerState>) -> usize {
    states.filter(|s| *s == WorkerState::Running).count()
}
