//! AMQP (RabbitMQ) adapter for the broker publisher port.

mod publisher;

pub use publisher::{AmqpPublisher, DEFAULT_EXCHANGE};
