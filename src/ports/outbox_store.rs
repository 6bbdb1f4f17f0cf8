//! OutboxStore port - claim and resolve pending outbox records.
//!
//! The dispatcher drives the outbox through this trait. The contract is
//! the one a polling relay needs: claim a bounded batch of eligible rows
//! without blocking, exclusively across concurrent claimants, then
//! resolve each row and release the claim window.
//!
//! Implementations may back the claim with a visibility timeout (the
//! Postgres adapter stamps rows selected under `FOR UPDATE SKIP
//! LOCKED`), an in-memory claimed set, or an equivalent scheme, as long
//! as a claimed record is invisible to other claimants until the claim
//! is released. Each `mark_*` call is its own commit unit: one record's
//! bookkeeping is never rolled back because a sibling's failed.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{OutboxRecord, StoreError};

/// Port for the durable outbox table.
///
/// One claim window is in progress per store instance at a time; the
/// dispatcher is a single sequential loop, so calls are never
/// interleaved. Horizontal scale comes from running multiple dispatcher
/// processes, each with its own store instance, racing through the
/// non-blocking claim.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Claim up to `limit` pending records, oldest `created_at` first.
    ///
    /// Returns an empty batch when nothing is eligible. Claimed records
    /// stay excluded from concurrent claimants until `release_claim`.
    async fn claim_batch(&self, limit: u32) -> Result<Vec<OutboxRecord>, StoreError>;

    /// Resolve a claimed record as published: sets `published_at`,
    /// increments `attempt_count`, clears `last_error`. Terminal, and
    /// durable as soon as the call returns.
    async fn mark_published(&self, id: Uuid) -> Result<(), StoreError>;

    /// Record a failed attempt: increments `attempt_count` and stores
    /// the failure description. The record stays pending and will be
    /// re-claimed on a later cycle.
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), StoreError>;

    /// End the current claim window, making any still-unresolved rows
    /// visible to other claimants again.
    async fn release_claim(&self) -> Result<(), StoreError>;
}
