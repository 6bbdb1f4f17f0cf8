//! Domain layer for the outbox pipeline.
//!
//! # Module Organization
//!
//! - `outbox` - The `OutboxRecord` entity and enqueue parameters
//! - `errors` - Typed errors per failure boundary

pub mod errors;
pub mod outbox;

pub use errors::{EnqueueError, PublishError, StoreError};
pub use outbox::{NewOutboxEvent, OutboxRecord};
