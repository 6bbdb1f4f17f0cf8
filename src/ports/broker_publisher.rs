//! BrokerPublisher port - durable, acknowledged publish to the broker.

use async_trait::async_trait;

use crate::domain::{OutboxRecord, PublishError};

/// A wire-ready outbox message.
///
/// Headers duplicate the record's identity so consumers can deduplicate
/// and route without deserializing the body.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMessage {
    /// Topic-style address: `{aggregate_type}.{event_type}`.
    pub routing_key: String,
    pub headers: MessageHeaders,
    /// JSON-encoded payload.
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageHeaders {
    pub event_id: String,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_version: String,
}

impl BrokerMessage {
    /// Builds the message for a record: routing key, dedup headers,
    /// serialized payload.
    pub fn from_record(record: &OutboxRecord) -> Result<Self, PublishError> {
        let body = serde_json::to_vec(&record.payload)?;
        Ok(Self {
            routing_key: record.routing_key(),
            headers: MessageHeaders {
                event_id: record.id.to_string(),
                event_type: record.event_type.clone(),
                aggregate_type: record.aggregate_type.clone(),
                aggregate_id: record.aggregate_id.clone(),
                event_version: record.event_version.to_string(),
            },
            body,
        })
    }
}

/// Port for the message broker.
///
/// `publish` must not return `Ok` until the broker has durably accepted
/// the message (persistent delivery plus a blocking acknowledgment).
/// Delivery downstream is at-least-once; consumers deduplicate on the
/// `event_id` header.
#[async_trait]
pub trait BrokerPublisher: Send + Sync {
    async fn publish(&self, message: BrokerMessage) -> Result<(), PublishError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NewOutboxEvent;
    use serde_json::json;

    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn BrokerPublisher) {}

    #[test]
    fn message_carries_identity_headers() {
        let record = NewOutboxEvent::new("user.registered", json!({"user_id": "abc"}))
            .with_aggregate("User", "abc")
            .with_version(2)
            .into_record();

        let message = BrokerMessage::from_record(&record).unwrap();

        assert_eq!(message.routing_key, "User.user.registered");
        assert_eq!(message.headers.event_id, record.id.to_string());
        assert_eq!(message.headers.event_type, "user.registered");
        assert_eq!(message.headers.aggregate_type, "User");
        assert_eq!(message.headers.aggregate_id, "abc");
        assert_eq!(message.headers.event_version, "2");
    }

    #[test]
    fn body_is_json_encoded_payload() {
        let record =
            NewOutboxEvent::new("expense.created", json!({"amount_cents": 1250})).into_record();

        let message = BrokerMessage::from_record(&record).unwrap();
        let decoded: serde_json::Value = serde_json::from_slice(&message.body).unwrap();

        assert_eq!(decoded["amount_cents"], 1250);
    }
}
