//! OutboxDispatcher - background relay from the outbox table to the broker.
//!
//! Second half of the Transactional Outbox Pattern:
//! 1. Business code stages events via `enqueue` (same transaction as the
//!    aggregate change)
//! 2. **The dispatcher claims pending records, publishes each to the
//!    broker, and marks it published** <- this module
//!
//! Delivery is at-least-once: a crash between broker-ack and the status
//! commit re-publishes the record on a later cycle, so consumers must
//! deduplicate on the `event_id` header.
//!
//! ## Configuration
//!
//! | Setting | Default | Description |
//! |---------|---------|-------------|
//! | `poll_interval` | 2s | How often to poll for pending records |
//! | `batch_size` | 50 | Max records claimed per cycle |
//!
//! ## Graceful Shutdown
//!
//! The shutdown signal is checked at cycle boundaries only; an
//! in-progress record always finishes its publish and status update
//! before the loop exits.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::domain::{OutboxRecord, StoreError};
use crate::ports::{BrokerMessage, BrokerPublisher, OutboxStore};

/// Configuration for the dispatcher loop.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// How often to poll for pending records.
    pub poll_interval: Duration,

    /// Maximum records to claim per cycle.
    pub batch_size: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            batch_size: 50,
        }
    }
}

impl DispatcherConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, size: u32) -> Self {
        self.batch_size = size;
        self
    }
}

/// Outcome of one record's publish attempt, consumed by the cycle loop.
#[derive(Debug)]
enum DispatchOutcome {
    Published,
    Failed(String),
}

/// Counters for one dispatch cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    /// Records claimed this cycle.
    pub claimed: usize,
    /// Records confirmed by the broker and marked published.
    pub published: usize,
    /// Records that failed and stay pending for retry.
    pub failed: usize,
}

/// Polling relay that drains pending outbox records to the broker.
///
/// A single sequential loop; run several dispatcher processes for
/// throughput - the store's non-blocking claim keeps them from
/// publishing the same record concurrently.
pub struct OutboxDispatcher {
    store: Arc<dyn OutboxStore>,
    broker: Arc<dyn BrokerPublisher>,
    config: DispatcherConfig,
}

impl OutboxDispatcher {
    /// Creates a dispatcher with default configuration.
    pub fn new(store: Arc<dyn OutboxStore>, broker: Arc<dyn BrokerPublisher>) -> Self {
        Self {
            store,
            broker,
            config: DispatcherConfig::default(),
        }
    }

    /// Creates a dispatcher with custom configuration.
    pub fn with_config(
        store: Arc<dyn OutboxStore>,
        broker: Arc<dyn BrokerPublisher>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            broker,
            config,
        }
    }

    /// Runs the dispatch loop until the shutdown signal flips to `true`.
    ///
    /// There is no fatal error path in steady state: claim failures and
    /// any other cycle-level error are logged and the loop backs off for
    /// one poll interval. Returns after a final drain cycle on shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Outbox dispatcher started"
        );

        let mut interval = time::interval(self.config.poll_interval);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender counts as a stop request.
                    if changed.is_err() || *shutdown.borrow() {
                        // Drain what is already pending, then stop.
                        self.try_cycle().await;
                        break;
                    }
                }

                _ = interval.tick() => {
                    self.try_cycle().await;
                }
            }
        }

        info!("Outbox dispatcher stopped");
    }

    /// Runs one cycle, absorbing cycle-level errors.
    async fn try_cycle(&self) {
        if let Err(e) = self.run_cycle().await {
            error!(error = %e, "Dispatch cycle aborted, will retry after poll interval");
        }
    }

    /// One dispatch cycle: claim a batch, publish each record
    /// sequentially, release the claim.
    ///
    /// Only errors that make claiming or releasing itself impossible
    /// surface here; per-record failures are recorded on the row and
    /// retried on a later cycle.
    pub async fn run_cycle(&self) -> Result<CycleStats, StoreError> {
        let records = self.store.claim_batch(self.config.batch_size).await?;
        if records.is_empty() {
            return Ok(CycleStats::default());
        }

        let mut stats = CycleStats {
            claimed: records.len(),
            ..CycleStats::default()
        };

        for record in &records {
            match self.dispatch_record(record).await {
                DispatchOutcome::Published => {
                    stats.published += 1;
                    if let Err(e) = self.store.mark_published(record.id).await {
                        // The publish itself succeeded; losing the mark
                        // means a duplicate delivery later, not a loss.
                        error!(event_id = %record.id, error = %e, "Failed to mark record published");
                    }
                }
                DispatchOutcome::Failed(reason) => {
                    stats.failed += 1;
                    warn!(
                        event_id = %record.id,
                        routing_key = %record.routing_key(),
                        attempt = record.attempt_count + 1,
                        error = %reason,
                        "Publish failed, record stays pending"
                    );
                    if let Err(e) = self.store.mark_failed(record.id, &reason).await {
                        error!(event_id = %record.id, error = %e, "Failed to record publish failure");
                    }
                }
            }
        }

        self.store.release_claim().await?;

        debug!(
            claimed = stats.claimed,
            published = stats.published,
            failed = stats.failed,
            "Dispatch cycle complete"
        );
        Ok(stats)
    }

    async fn dispatch_record(&self, record: &OutboxRecord) -> DispatchOutcome {
        let message = match BrokerMessage::from_record(record) {
            Ok(message) => message,
            Err(e) => return DispatchOutcome::Failed(e.to_string()),
        };

        match self.broker.publish(message).await {
            Ok(()) => {
                info!(
                    event_id = %record.id,
                    routing_key = %record.routing_key(),
                    "Published outbox record"
                );
                DispatchOutcome::Published
            }
            Err(e) => DispatchOutcome::Failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryOutboxStore, RecordingBroker};
    use crate::domain::NewOutboxEvent;
    use serde_json::json;

    fn dispatcher(
        store: &InMemoryOutboxStore,
        broker: &Arc<RecordingBroker>,
        config: DispatcherConfig,
    ) -> OutboxDispatcher {
        OutboxDispatcher::with_config(
            Arc::new(store.clone()),
            Arc::clone(broker) as Arc<dyn BrokerPublisher>,
            config,
        )
    }

    #[tokio::test]
    async fn cycle_publishes_pending_records() {
        let store = InMemoryOutboxStore::new();
        let broker = Arc::new(RecordingBroker::new());
        store.insert(NewOutboxEvent::new("user.registered", json!({"user_id": "1"})));
        store.insert(NewOutboxEvent::new("user.registered", json!({"user_id": "2"})));

        let dispatcher = dispatcher(&store, &broker, DispatcherConfig::default());
        let stats = dispatcher.run_cycle().await.unwrap();

        assert_eq!(stats.claimed, 2);
        assert_eq!(stats.published, 2);
        assert_eq!(stats.failed, 0);
        assert_eq!(broker.message_count(), 2);
        assert_eq!(store.pending_count(), 0);
        assert_eq!(store.published_count(), 2);
    }

    #[tokio::test]
    async fn empty_outbox_yields_empty_cycle() {
        let store = InMemoryOutboxStore::new();
        let broker = Arc::new(RecordingBroker::new());

        let dispatcher = dispatcher(&store, &broker, DispatcherConfig::default());
        let stats = dispatcher.run_cycle().await.unwrap();

        assert_eq!(stats, CycleStats::default());
        assert_eq!(broker.message_count(), 0);
    }

    #[tokio::test]
    async fn cycle_respects_batch_size() {
        let store = InMemoryOutboxStore::new();
        let broker = Arc::new(RecordingBroker::new());
        for i in 0..5 {
            store.insert(NewOutboxEvent::new("test.event", json!({ "n": i })));
        }

        let config = DispatcherConfig::default().with_batch_size(2);
        let dispatcher = dispatcher(&store, &broker, config);

        assert_eq!(dispatcher.run_cycle().await.unwrap().published, 2);
        assert_eq!(dispatcher.run_cycle().await.unwrap().published, 2);
        assert_eq!(dispatcher.run_cycle().await.unwrap().published, 1);
        assert_eq!(store.pending_count(), 0);
    }

    #[tokio::test]
    async fn failed_publish_keeps_record_pending_with_error() {
        let store = InMemoryOutboxStore::new();
        let broker = Arc::new(RecordingBroker::new());
        broker.reject_next(1);
        let record = store.insert(NewOutboxEvent::new("test.event", json!({})));

        let dispatcher = dispatcher(&store, &broker, DispatcherConfig::default());
        let stats = dispatcher.run_cycle().await.unwrap();

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.published, 0);

        let stored = store.get(record.id).unwrap();
        assert!(!stored.is_published());
        assert_eq!(stored.attempt_count, 1);
        assert!(stored
            .last_error
            .as_deref()
            .unwrap()
            .contains("simulated broker rejection"));
    }

    #[tokio::test]
    async fn one_failure_does_not_block_the_rest_of_the_batch() {
        let store = InMemoryOutboxStore::new();
        let broker = Arc::new(RecordingBroker::new());
        // First record in creation order hits the rejection.
        broker.reject_next(1);
        let failing = store.insert(NewOutboxEvent::new("test.first", json!({})));
        let passing = store.insert(NewOutboxEvent::new("test.second", json!({})));

        let dispatcher = dispatcher(&store, &broker, DispatcherConfig::default());
        let stats = dispatcher.run_cycle().await.unwrap();

        assert_eq!(stats.claimed, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.published, 1);
        assert!(!store.get(failing.id).unwrap().is_published());
        assert!(store.get(passing.id).unwrap().is_published());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal_after_draining() {
        let store = InMemoryOutboxStore::new();
        let broker = Arc::new(RecordingBroker::new());
        store.insert(NewOutboxEvent::new("test.event", json!({})));

        let config = DispatcherConfig::default().with_poll_interval(Duration::from_millis(10));
        let dispatcher = dispatcher(&store, &broker, config);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { dispatcher.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();

        handle.await.unwrap();
        assert_eq!(store.published_count(), 1);
    }
}
