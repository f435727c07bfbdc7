//! Event bus adapters.
//!
//! - `LocalEventBus` - In-process bus with polymorphic dispatch and outbox routing
//! - `JsonEventSerializer` - Registry-backed JSON payloads
//! - `PollingOutboxSender` / `PollingInboxProcessor` - Background box workers
//! - `OutboxSenderManager` / `InboxProcessManager` - One worker per enabled box
//! - `CleanupWorker` - Retention for completed box records
//! - `IdempotentHandler` - Wrapper for at-most-once processing per message

mod box_managers;
mod cleanup_worker;
mod idempotent_handler;
mod inbox_processor;
mod json_serializer;
mod local_bus;
mod outbox_sender;
mod store_resolver;
pub(crate) mod subscriptions;
mod worker;

pub use box_managers::{BoxWorkerOptions, InboxProcessManager, OutboxSenderManager};
pub use cleanup_worker::{CleanupReport, CleanupWorker};
pub use idempotent_handler::IdempotentHandler;
pub use inbox_processor::PollingInboxProcessor;
pub use json_serializer::JsonEventSerializer;
pub use local_bus::LocalEventBus;
pub use outbox_sender::{BatchReport, PollingOutboxSender};
pub use store_resolver::StoreResolver;
pub use worker::WorkerState;

pub(crate) use worker::{wait_or_shutdown, WorkerLifecycle};
