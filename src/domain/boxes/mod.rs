//! Outbox/inbox model.
//!
//! Envelopes, records with their lifecycle, retry policy and the named
//! configuration that decides which events route through which box.

mod config;
mod envelope;
mod record;

pub use config::{
    BoxConfig, BoxConfigs, EventSelector, StoreFactory, DEFAULT_BATCH_SIZE, DEFAULT_BOX_NAME,
    DEFAULT_POLL_INTERVAL,
};
pub use envelope::{IncomingEventInfo, OutgoingEventInfo};
pub use record::{
    InboxRecord, InboxStatus, OutboxRecord, OutboxStatus, RetryPolicy, TYPE_NOT_FOUND_REASON,
};
