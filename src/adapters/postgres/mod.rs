//! PostgreSQL adapters for the outbox table.

mod outbox_store;

pub use outbox_store::{enqueue, PgOutboxStore};
