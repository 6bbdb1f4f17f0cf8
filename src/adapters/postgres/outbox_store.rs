//! PostgreSQL outbox adapter: transactional enqueue plus the claiming
//! store used by the dispatcher.
//!
//! The claim is a visibility timestamp: `claim_batch` stamps
//! `claimed_at` on the selected rows in one committed statement (with
//! `FOR UPDATE SKIP LOCKED` guarding the selection against concurrent
//! claimants), and every status update is its own committed statement.
//! A crash therefore loses at most the one in-flight record's status,
//! and its claim expires after the timeout.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{EnqueueError, NewOutboxEvent, OutboxRecord, StoreError};
use crate::ports::OutboxStore;

/// How long a claimed row stays invisible to other claimants before it
/// is considered abandoned.
pub const DEFAULT_CLAIM_TIMEOUT: Duration = Duration::from_secs(30);

/// Stages an outbox event on the caller's transaction.
///
/// The row is inserted but never committed here; the caller commits
/// once, after its own aggregate mutation, making event and state
/// change atomic. Constraint violations propagate unchanged so the
/// caller's rollback covers both.
///
/// # Example
///
/// ```ignore
/// let mut txn = pool.begin().await?;
/// save_user(&mut txn, &user).await?;
/// enqueue(
///     &mut *txn,
///     NewOutboxEvent::new("user.registered", payload).with_aggregate("User", user.id),
/// )
/// .await?;
/// txn.commit().await?;
/// ```
pub async fn enqueue<'e, E>(executor: E, event: NewOutboxEvent) -> Result<OutboxRecord, EnqueueError>
where
    E: sqlx::PgExecutor<'e>,
{
    let id = Uuid::new_v4();
    let occurred_at = event.occurred_at.unwrap_or_else(Utc::now);

    let row = sqlx::query(
        r#"
        INSERT INTO events_outbox
            (id, aggregate_type, aggregate_id, event_type, event_version, payload, occurred_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING created_at
        "#,
    )
    .bind(id)
    .bind(&event.aggregate_type)
    .bind(&event.aggregate_id)
    .bind(&event.event_type)
    .bind(event.event_version)
    .bind(&event.payload)
    .bind(occurred_at)
    .fetch_one(executor)
    .await?;

    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    Ok(OutboxRecord {
        id,
        aggregate_type: event.aggregate_type,
        aggregate_id: event.aggregate_id,
        event_type: event.event_type,
        event_version: event.event_version,
        payload: event.payload,
        occurred_at,
        created_at,
        published_at: None,
        attempt_count: 0,
        last_error: None,
    })
}

/// PostgreSQL implementation of `OutboxStore`.
///
/// Every statement here is its own commit unit: the claim stamp, each
/// `mark_*` update, and the release each commit independently, so one
/// record's bookkeeping is never entangled with a sibling's. A process
/// crash mid-batch keeps the marks already made; the unresolved rows'
/// claims expire after the timeout and the rows are re-claimed - the
/// worst case is one duplicate delivery per crash, never loss.
pub struct PgOutboxStore {
    pool: PgPool,
    claim_timeout: Duration,
    current_claim: Mutex<Vec<Uuid>>,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            claim_timeout: DEFAULT_CLAIM_TIMEOUT,
            current_claim: Mutex::new(Vec::new()),
        }
    }

    /// Overrides how long claimed rows stay invisible to other
    /// claimants. Must exceed the worst-case batch publish time.
    pub fn with_claim_timeout(mut self, timeout: Duration) -> Self {
        self.claim_timeout = timeout;
        self
    }
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn claim_batch(&self, limit: u32) -> Result<Vec<OutboxRecord>, StoreError> {
        // SKIP LOCKED closes the race between concurrent claimants
        // stamping the same rows; the locks last only for this
        // statement, which commits immediately.
        let rows = sqlx::query(
            r#"
            UPDATE events_outbox
            SET claimed_at = now()
            WHERE id IN (
                SELECT id
                FROM events_outbox
                WHERE published_at IS NULL
                  AND (claimed_at IS NULL OR claimed_at < now() - make_interval(secs => $2))
                ORDER BY created_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, aggregate_type, aggregate_id, event_type, event_version,
                      payload, occurred_at, created_at, published_at, attempt_count, last_error
            "#,
        )
        .bind(i64::from(limit))
        .bind(self.claim_timeout.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        let mut records = rows
            .into_iter()
            .map(row_to_record)
            .collect::<Result<Vec<_>, sqlx::Error>>()?;
        // RETURNING does not preserve the subselect's order.
        records.sort_by_key(|r| r.created_at);

        // Stale entries from an aborted cycle simply wait out the
        // timeout; their rows were never resolved.
        let mut current = self.current_claim.lock().await;
        current.clear();
        current.extend(records.iter().map(|r| r.id));

        Ok(records)
    }

    async fn mark_published(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE events_outbox
            SET published_at = now(), attempt_count = attempt_count + 1,
                last_error = NULL, claimed_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE events_outbox
            SET attempt_count = attempt_count + 1, last_error = $2, claimed_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn release_claim(&self) -> Result<(), StoreError> {
        let ids: Vec<Uuid> = {
            let mut current = self.current_claim.lock().await;
            current.drain(..).collect()
        };
        if ids.is_empty() {
            return Ok(());
        }

        // Resolved rows already cleared their stamp; this frees any the
        // cycle left unresolved.
        sqlx::query("UPDATE events_outbox SET claimed_at = NULL WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn row_to_record(row: PgRow) -> Result<OutboxRecord, sqlx::Error> {
    Ok(OutboxRecord {
        id: row.try_get("id")?,
        aggregate_type: row.try_get("aggregate_type")?,
        aggregate_id: row.try_get("aggregate_id")?,
        event_type: row.try_get("event_type")?,
        event_version: row.try_get("event_version")?,
        payload: row.try_get("payload")?,
        occurred_at: row.try_get("occurred_at")?,
        created_at: row.try_get("created_at")?,
        published_at: row.try_get("published_at")?,
        attempt_count: row.try_get("attempt_count")?,
        last_error: row.try_get("last_error")?,
    })
}
