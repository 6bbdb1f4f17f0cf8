//! Error types for the outbox pipeline, one enum per failure boundary.

use thiserror::Error;

/// Errors raised while staging an event on the caller's transaction.
///
/// These propagate to the business-transaction caller; rolling back the
/// transaction removes the event together with the aggregate change.
#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("failed to stage outbox event: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors from the outbox store (claiming or resolving records).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors from publishing a record to the message broker.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("broker connection failed: {0}")]
    Connection(String),

    /// The broker refused the message or negatively acknowledged it.
    #[error("broker rejected message: {0}")]
    Rejected(String),

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
