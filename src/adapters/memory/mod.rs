//! In-memory adapters for tests and single-process deployments.

mod broker;
mod event_boxes;
mod processed_event_store;

pub use broker::{InMemoryBroker, DEFAULT_MAX_DELIVERY_COUNT};
pub use event_boxes::{InMemoryEventInbox, InMemoryEventOutbox};
pub use processed_event_store::InMemoryProcessedEventStore;
