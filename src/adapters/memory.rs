//! In-memory outbox store and broker stub for testing.
//!
//! Deterministic, dependency-free implementations of the pipeline's two
//! ports. The store models the claim window with a claimed-id set, so
//! concurrent dispatcher instances sharing one store claim disjoint
//! batches just like they would against the Postgres claim stamp, and
//! every `mark_*` takes effect immediately, mirroring the per-record
//! commit units of the real store.
//!
//! # Security Note
//!
//! These adapters are for **testing only**. They use `.expect()` on lock
//! operations and will panic if a lock is poisoned.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{NewOutboxEvent, OutboxRecord, PublishError, StoreError};
use crate::ports::{BrokerMessage, BrokerPublisher, OutboxStore};

#[derive(Default)]
struct StoreInner {
    records: Vec<OutboxRecord>,
    claimed: HashSet<Uuid>,
}

/// In-memory implementation of `OutboxStore`.
///
/// Clones share the backing table but hold independent claim windows,
/// mirroring several dispatcher processes over one database.
pub struct InMemoryOutboxStore {
    inner: Arc<Mutex<StoreInner>>,
    current_claim: Mutex<Vec<Uuid>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner::default())),
            current_claim: Mutex::new(Vec::new()),
        }
    }

    // === Test Helpers ===

    /// Inserts a pending record, as a committed enqueue would.
    pub fn insert(&self, event: NewOutboxEvent) -> OutboxRecord {
        let record = event.into_record();
        self.inner
            .lock()
            .expect("InMemoryOutboxStore: lock poisoned")
            .records
            .push(record.clone());
        record
    }

    /// Inserts a pending record with an explicit `created_at`, for
    /// ordering tests.
    pub fn insert_created_at(
        &self,
        event: NewOutboxEvent,
        created_at: DateTime<Utc>,
    ) -> OutboxRecord {
        let mut record = event.into_record();
        record.created_at = created_at;
        self.inner
            .lock()
            .expect("InMemoryOutboxStore: lock poisoned")
            .records
            .push(record.clone());
        record
    }

    /// Returns a snapshot of a record by id.
    pub fn get(&self, id: Uuid) -> Option<OutboxRecord> {
        self.inner
            .lock()
            .expect("InMemoryOutboxStore: lock poisoned")
            .records
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    /// Number of records not yet published.
    pub fn pending_count(&self) -> usize {
        self.inner
            .lock()
            .expect("InMemoryOutboxStore: lock poisoned")
            .records
            .iter()
            .filter(|r| !r.is_published())
            .count()
    }

    /// Number of records in the terminal published state.
    pub fn published_count(&self) -> usize {
        self.inner
            .lock()
            .expect("InMemoryOutboxStore: lock poisoned")
            .records
            .iter()
            .filter(|r| r.is_published())
            .count()
    }

    /// Drops every claim without resolving, as if the claimant died
    /// mid-batch and its claims expired.
    pub fn abandon_claims(&self) {
        self.inner
            .lock()
            .expect("InMemoryOutboxStore: lock poisoned")
            .claimed
            .clear();
        self.current_claim
            .lock()
            .expect("InMemoryOutboxStore: claim lock poisoned")
            .clear();
    }
}

impl Default for InMemoryOutboxStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for InMemoryOutboxStore {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            current_claim: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn claim_batch(&self, limit: u32) -> Result<Vec<OutboxRecord>, StoreError> {
        let mut inner = self.inner.lock().expect("InMemoryOutboxStore: lock poisoned");

        let mut eligible: Vec<OutboxRecord> = inner
            .records
            .iter()
            .filter(|r| !r.is_published() && !inner.claimed.contains(&r.id))
            .cloned()
            .collect();
        eligible.sort_by_key(|r| r.created_at);
        eligible.truncate(limit as usize);

        let mut current = self
            .current_claim
            .lock()
            .expect("InMemoryOutboxStore: claim lock poisoned");
        for record in &eligible {
            inner.claimed.insert(record.id);
            current.push(record.id);
        }

        Ok(eligible)
    }

    async fn mark_published(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("InMemoryOutboxStore: lock poisoned");
        if let Some(record) = inner.records.iter_mut().find(|r| r.id == id) {
            record.published_at = Some(Utc::now());
            record.attempt_count += 1;
            record.last_error = None;
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("InMemoryOutboxStore: lock poisoned");
        if let Some(record) = inner.records.iter_mut().find(|r| r.id == id) {
            record.attempt_count += 1;
            record.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn release_claim(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("InMemoryOutboxStore: lock poisoned");
        let mut current = self
            .current_claim
            .lock()
            .expect("InMemoryOutboxStore: claim lock poisoned");
        for id in current.drain(..) {
            inner.claimed.remove(&id);
        }
        Ok(())
    }
}

/// Broker stub that records every accepted message.
///
/// Can be programmed to reject the next N publishes to exercise the
/// retry bookkeeping.
pub struct RecordingBroker {
    messages: Mutex<Vec<BrokerMessage>>,
    reject_remaining: AtomicUsize,
}

impl RecordingBroker {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            reject_remaining: AtomicUsize::new(0),
        }
    }

    /// Rejects the next `n` publish attempts, then accepts again.
    pub fn reject_next(&self, n: usize) {
        self.reject_remaining.store(n, Ordering::SeqCst);
    }

    /// All messages the broker has accepted, in publish order.
    pub fn published(&self) -> Vec<BrokerMessage> {
        self.messages
            .lock()
            .expect("RecordingBroker: lock poisoned")
            .clone()
    }

    pub fn message_count(&self) -> usize {
        self.messages
            .lock()
            .expect("RecordingBroker: lock poisoned")
            .len()
    }
}

impl Default for RecordingBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerPublisher for RecordingBroker {
    async fn publish(&self, message: BrokerMessage) -> Result<(), PublishError> {
        let remaining = self.reject_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.reject_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(PublishError::Rejected("simulated broker rejection".into()));
        }

        self.messages
            .lock()
            .expect("RecordingBroker: lock poisoned")
            .push(message);
        Ok(())
    }
}
