//! Domain layer containing the event model and delivery bookkeeping types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared primitives (events, type registry, timestamps, errors)
//! - `boxes` - Outbox/inbox envelopes, records, retry policy and configuration

pub mod boxes;
pub mod foundation;
