//! Aequatio Outbox - Transactional outbox pipeline.
//!
//! Guarantees that domain events are recorded in the same database
//! transaction as the state change they describe, then delivered
//! at-least-once to RabbitMQ by a polling dispatcher that is safe to
//! run in multiple replicas.

pub mod adapters;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod ports;

pub use dispatcher::{CycleStats, DispatcherConfig, OutboxDispatcher};
pub use domain::{NewOutboxEvent, OutboxRecord};
