//! Outbox record entity - the unit of the transactional outbox.
//!
//! An `OutboxRecord` is written in the same database transaction as the
//! aggregate change it describes, then relayed to the message broker by
//! the dispatcher. A record with `published_at` set is terminal and is
//! never selected or mutated again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// A row of the `events_outbox` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxRecord {
    /// Unique identifier, assigned at creation. Consumers deduplicate on it.
    pub id: Uuid,

    /// Kind of the owning aggregate (e.g., "User").
    pub aggregate_type: String,

    /// Identifier of the specific aggregate instance.
    pub aggregate_id: String,

    /// Dotted event kind (e.g., "user.registered").
    pub event_type: String,

    /// Schema version of the payload, starting at 1.
    pub event_version: i32,

    /// JSON event body. Together with `event_type` and `event_version`
    /// it carries the full business meaning of the event.
    pub payload: JsonValue,

    /// When the business event happened (may predate persistence).
    pub occurred_at: DateTime<Utc>,

    /// When the row was durably written (server-assigned).
    pub created_at: DateTime<Utc>,

    /// Set exactly once by the dispatcher on confirmed publish.
    /// `None` means the record is still pending.
    pub published_at: Option<DateTime<Utc>>,

    /// Publish attempts made so far, including the successful one.
    pub attempt_count: i32,

    /// Most recent publish failure, cleared on success.
    pub last_error: Option<String>,
}

impl OutboxRecord {
    /// Broker routing key: `{aggregate_type}.{event_type}`.
    ///
    /// Gives consumers a stable topic-style address, e.g.
    /// `User.user.registered`.
    pub fn routing_key(&self) -> String {
        format!("{}.{}", self.aggregate_type, self.event_type)
    }

    /// Whether the record has reached its terminal state.
    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }
}

/// Parameters for enqueueing a new outbox event.
///
/// Defaults match the original enqueue contract: events not tied to a
/// specific aggregate use `aggregate_type = "DomainEvent"` and
/// `aggregate_id = "0"`, schema version starts at 1, and `occurred_at`
/// falls back to the current time at insert.
#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub event_type: String,
    pub payload: JsonValue,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_version: i32,
    pub occurred_at: Option<DateTime<Utc>>,
}

impl NewOutboxEvent {
    /// Creates an event with default aggregate context.
    pub fn new(event_type: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            aggregate_type: "DomainEvent".to_string(),
            aggregate_id: "0".to_string(),
            event_version: 1,
            occurred_at: None,
        }
    }

    /// Sets the owning aggregate.
    pub fn with_aggregate(
        mut self,
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
    ) -> Self {
        self.aggregate_type = aggregate_type.into();
        self.aggregate_id = aggregate_id.into();
        self
    }

    /// Sets the payload schema version.
    pub fn with_version(mut self, version: i32) -> Self {
        self.event_version = version;
        self
    }

    /// Sets an explicit occurrence time.
    pub fn with_occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(occurred_at);
        self
    }

    /// Materializes a pending record from these parameters.
    ///
    /// `created_at` is provisional here; the Postgres writer lets the
    /// server assign it at insert.
    pub fn into_record(self) -> OutboxRecord {
        let now = Utc::now();
        OutboxRecord {
            id: Uuid::new_v4(),
            aggregate_type: self.aggregate_type,
            aggregate_id: self.aggregate_id,
            event_type: self.event_type,
            event_version: self.event_version,
            payload: self.payload,
            occurred_at: self.occurred_at.unwrap_or(now),
            created_at: now,
            published_at: None,
            attempt_count: 0,
            last_error: None,
        }
    }
}
