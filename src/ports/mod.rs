//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the delivery core and the outside world. Adapters implement these ports.
//!
//! ## Bus Ports
//!
//! - `DistributedEventBus` / `EventBusExt` - Publish and subscribe
//! - `SupportsEventBoxes` - Entry points for outbox senders and inbox processors
//! - `EventHandler` / `DistributedEventHandler` - Code that reacts to events
//! - `EventSerializer` - Payload encoding and type identification
//!
//! ## Storage Ports
//!
//! - `EventOutbox` - Durable staging for outgoing events
//! - `EventInbox` - Durable staging for incoming events
//! - `ProcessedEventStore` - Idempotency tracking for event handlers
//!
//! ## Transport Ports
//!
//! - `BrokerClient` - Topic/subscription broker send, receive and rule admin

mod broker_client;
mod event_bus;
mod event_handler;
mod event_inbox;
mod event_outbox;
mod event_serializer;
mod processed_event_store;

pub use broker_client::{
    BrokerClient, BrokerError, OutgoingMessage, ReceivedMessage, RuleDescription, RuleFilter,
    DEFAULT_RULE_NAME, EVENT_TYPE_PROPERTY,
};
pub use event_bus::{
    DistributedEventBus, EventBusExt, HandlerTable, Subscription, SupportsEventBoxes, Unsubscribe,
};
pub use event_handler::{handler_fn, DistributedEventHandler, EventHandler, FnHandler, TypedHandler};
pub use event_inbox::{EventInbox, InboxConfig, InboxConfigs};
pub use event_outbox::{EventOutbox, OutboxConfig, OutboxConfigs};
pub use event_serializer::EventSerializer;
pub use processed_event_store::ProcessedEventStore;
