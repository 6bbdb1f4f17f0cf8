//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the outbox pipeline and the outside world. Adapters implement them.
//!
//! - `OutboxStore` - Claim/resolve protocol over the durable outbox table
//! - `BrokerPublisher` - Durable, acknowledged publish to the message broker

mod broker_publisher;
mod outbox_store;

pub use broker_publisher::{BrokerMessage, BrokerPublisher, MessageHeaders};
pub use outbox_store::OutboxStore;
