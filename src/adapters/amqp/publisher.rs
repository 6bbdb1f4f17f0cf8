//! AMQP (RabbitMQ) implementation of `BrokerPublisher`.
//!
//! Publishes to a durable topic exchange with publisher confirms, so a
//! successful `publish` means the broker has accepted the message for
//! persistent delivery.

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::domain::PublishError;
use crate::ports::{BrokerMessage, BrokerPublisher};

/// Default exchange for domain events, matching the consumer bindings.
pub const DEFAULT_EXCHANGE: &str = "domain.events";

/// Persistent delivery, per the AMQP spec.
const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// A live connection and the publishing channel opened on it.
///
/// The connection handle is kept so the TCP link can be closed cleanly
/// when the link is replaced, instead of lingering until heartbeat
/// timeout.
struct BrokerLink {
    connection: Connection,
    channel: Channel,
}

impl BrokerLink {
    fn is_healthy(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    async fn close(self) {
        // Closing a broken link can itself fail; nothing to do then.
        let _ = self.connection.close(0, "replaced").await;
    }
}

/// True for errors that poison the link and require a reconnect; a
/// broker nack is an application-level answer on a healthy channel.
fn is_link_fatal(error: &PublishError) -> bool {
    matches!(error, PublishError::Connection(_))
}

/// RabbitMQ publisher used by the dispatcher.
///
/// The link is established lazily and re-established after
/// connection-level failures; the dispatcher's retry-on-next-cycle loop
/// absorbs the intervening errors.
pub struct AmqpPublisher {
    url: String,
    exchange: String,
    link: Mutex<Option<BrokerLink>>,
}

impl AmqpPublisher {
    pub fn new(url: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            exchange: exchange.into(),
            link: Mutex::new(None),
        }
    }

    /// Connects, enables publisher confirms, and declares the durable
    /// topic exchange.
    async fn connect(&self) -> Result<BrokerLink, PublishError> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| PublishError::Connection(format!("failed to connect: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| PublishError::Connection(format!("failed to create channel: {e}")))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| PublishError::Connection(format!("failed to enable confirms: {e}")))?;

        channel
            .exchange_declare(
                &self.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| PublishError::Connection(format!("failed to declare exchange: {e}")))?;

        info!(exchange = %self.exchange, "Connected to AMQP broker");
        Ok(BrokerLink {
            connection,
            channel,
        })
    }

    async fn publish_on(&self, channel: &Channel, message: &BrokerMessage) -> Result<(), PublishError> {
        let mut headers = FieldTable::default();
        headers.insert(
            "event_id".into(),
            AMQPValue::LongString(message.headers.event_id.clone().into()),
        );
        headers.insert(
            "event_type".into(),
            AMQPValue::LongString(message.headers.event_type.clone().into()),
        );
        headers.insert(
            "aggregate_type".into(),
            AMQPValue::LongString(message.headers.aggregate_type.clone().into()),
        );
        headers.insert(
            "aggregate_id".into(),
            AMQPValue::LongString(message.headers.aggregate_id.clone().into()),
        );
        headers.insert(
            "event_version".into(),
            AMQPValue::LongString(message.headers.event_version.clone().into()),
        );

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(DELIVERY_MODE_PERSISTENT)
            .with_headers(headers);

        let confirm = channel
            .basic_publish(
                &self.exchange,
                &message.routing_key,
                BasicPublishOptions::default(),
                &message.body,
                properties,
            )
            .await
            .map_err(|e| PublishError::Connection(format!("publish failed: {e}")))?
            .await
            .map_err(|e| PublishError::Connection(format!("confirm failed: {e}")))?;

        if confirm.is_ack() {
            debug!(routing_key = %message.routing_key, "Broker acknowledged message");
            Ok(())
        } else {
            Err(PublishError::Rejected(format!(
                "broker nacked message with routing key {}",
                message.routing_key
            )))
        }
    }
}

#[async_trait]
impl BrokerPublisher for AmqpPublisher {
    async fn publish(&self, message: BrokerMessage) -> Result<(), PublishError> {
        let mut cached = self.link.lock().await;

        let link = match cached.take() {
            Some(link) if link.is_healthy() => link,
            Some(stale) => {
                stale.close().await;
                self.connect().await?
            }
            None => self.connect().await?,
        };

        match self.publish_on(&link.channel, &message).await {
            Err(e) if is_link_fatal(&e) => {
                link.close().await;
                Err(e)
            }
            result => {
                // Nacks come back over a healthy channel; keep it.
                *cached = Some(link);
                result
            }
        }
    }
}
