//! Broker transport adapter.
//!
//! `BrokerEventBus` implements the bus contract over any `BrokerClient`,
//! provisioning per-type subscription rules and running one receive loop
//! per subscription.

mod event_bus;
mod processor;
mod routing;

pub use event_bus::BrokerEventBus;
pub use routing::{type_rule, type_rule_name, TYPE_RULE_PREFIX};
