//! Foundation module - Shared domain primitives.
//!
//! Contains the event model, the type registry, timestamps and error types
//! that form the vocabulary of the event delivery layer.

mod errors;
mod event_type;
mod events;
mod timestamp;

pub use errors::{DomainError, ErrorCode};
pub use event_type::{type_identifier, Ancestor, EventType, EventTypeInfo, EventTypeRegistry};
pub use events::{AnyEvent, Event, EventContext, EventSource};
pub use timestamp::Timestamp;
