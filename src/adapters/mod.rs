//! Adapters - Implementations of port interfaces.
//!
//! - `events` - Local bus, polling workers, cleanup and idempotency
//! - `broker` - Bus over a topic/subscription broker
//! - `memory` - In-memory stores and broker
//! - `postgres` - sqlx-backed stores

pub mod broker;
pub mod events;
pub mod memory;
pub mod postgres;
