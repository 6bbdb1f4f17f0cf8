//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the outbox pipeline to external systems:
//! - `postgres` - Transactional enqueue and the claiming outbox store
//! - `amqp` - RabbitMQ publisher with confirms
//! - `memory` - In-memory doubles for tests

pub mod amqp;
pub mod memory;
pub mod postgres;

pub use amqp::AmqpPublisher;
pub use memory::{InMemoryOutboxStore, RecordingBroker};
pub use postgres::{enqueue, PgOutboxStore};
