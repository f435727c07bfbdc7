//! Relay Bus - Reliable distributed event delivery
//!
//! An in-process publish/subscribe bus with polymorphic dispatch, fronted by
//! a durable outbox/inbox and bridged to a topic/subscription broker.
//!
//! - `domain` - Event model, type registry and box records
//! - `ports` - Contracts for stores, serializers, handlers and the broker
//! - `adapters` - Local bus, polling workers, in-memory and Postgres stores,
//!   broker transport
//! - `config` / `telemetry` - Environment configuration and tracing setup

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod telemetry;
