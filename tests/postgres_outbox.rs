//! Postgres-backed tests for the enqueue writer and the claiming store.
//!
//! These need a reachable Postgres (`DATABASE_URL`); the sqlx test
//! harness gives each test its own migrated database. Ignored by
//! default, run with `cargo test -- --ignored`.

use std::time::Duration;

use serde_json::json;
use sqlx::{PgPool, Row};

use aequatio_outbox::adapters::{enqueue, PgOutboxStore};
use aequatio_outbox::domain::NewOutboxEvent;
use aequatio_outbox::ports::OutboxStore;
use uuid::Uuid;

async fn fetch_status(pool: &PgPool, id: Uuid) -> sqlx::Result<(Option<bool>, i32)> {
    let row = sqlx::query(
        "SELECT published_at IS NOT NULL AS published, attempt_count \
         FROM events_outbox WHERE id = $1",
    )
    .bind(id)
    .fetch_one(pool)
    .await?;
    Ok((row.try_get("published")?, row.try_get("attempt_count")?))
}

/// An enqueued event becomes visible exactly when the caller's
/// transaction commits, pending and unattempted.
#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn enqueue_is_visible_after_commit(pool: PgPool) -> sqlx::Result<()> {
    let mut txn = pool.begin().await?;
    let record = enqueue(
        &mut *txn,
        NewOutboxEvent::new("user.registered", json!({"user_id": "abc"}))
            .with_aggregate("User", "abc"),
    )
    .await
    .unwrap();

    // Not visible from outside the open transaction.
    let before = sqlx::query("SELECT 1 FROM events_outbox WHERE id = $1")
        .bind(record.id)
        .fetch_optional(&pool)
        .await?;
    assert!(before.is_none());

    txn.commit().await?;

    let (published, attempts) = fetch_status(&pool, record.id).await?;
    assert_eq!(published, Some(false));
    assert_eq!(attempts, 0);
    Ok(())
}

/// Rolling back the caller's transaction removes the event with it.
#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn enqueue_rolls_back_with_the_caller(pool: PgPool) -> sqlx::Result<()> {
    let mut txn = pool.begin().await?;
    let record = enqueue(
        &mut *txn,
        NewOutboxEvent::new("user.registered", json!({"user_id": "abc"})),
    )
    .await
    .unwrap();
    txn.rollback().await?;

    let gone = sqlx::query("SELECT 1 FROM events_outbox WHERE id = $1")
        .bind(record.id)
        .fetch_optional(&pool)
        .await?;
    assert!(gone.is_none());
    Ok(())
}

/// Each status update is its own commit unit: marks made before a
/// claimant dies survive, and only the unresolved rows come back.
#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn marks_survive_a_crash_before_release(pool: PgPool) -> sqlx::Result<()> {
    let first = enqueue(&pool, NewOutboxEvent::new("a.first", json!({}))).await.unwrap();
    let second = enqueue(&pool, NewOutboxEvent::new("a.second", json!({}))).await.unwrap();

    let store = PgOutboxStore::new(pool.clone());
    let claimed = store.claim_batch(10).await.unwrap();
    assert_eq!(claimed.len(), 2);

    store.mark_published(first.id).await.unwrap();
    store.mark_failed(second.id, "broker nacked").await.unwrap();

    // Claimant dies without releasing.
    drop(store);

    let (published, attempts) = fetch_status(&pool, first.id).await?;
    assert_eq!(published, Some(true));
    assert_eq!(attempts, 1);

    let (published, attempts) = fetch_status(&pool, second.id).await?;
    assert_eq!(published, Some(false));
    assert_eq!(attempts, 1);

    // A fresh claimant picks up only the unresolved record.
    let restarted = PgOutboxStore::new(pool.clone());
    let reclaimed = restarted.claim_batch(10).await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, second.id);
    assert_eq!(reclaimed[0].last_error.as_deref(), Some("broker nacked"));
    restarted.release_claim().await.unwrap();
    Ok(())
}

/// A claimed row is invisible to concurrent claimants until released
/// (or until the claim times out, for an abandoned claimant).
#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn claimed_rows_are_invisible_until_released(pool: PgPool) -> sqlx::Result<()> {
    let record = enqueue(&pool, NewOutboxEvent::new("a.first", json!({}))).await.unwrap();

    let holder = PgOutboxStore::new(pool.clone());
    assert_eq!(holder.claim_batch(10).await.unwrap().len(), 1);

    let rival = PgOutboxStore::new(pool.clone());
    assert!(rival.claim_batch(10).await.unwrap().is_empty());

    // An expired claim is fair game again.
    let scavenger =
        PgOutboxStore::new(pool.clone()).with_claim_timeout(Duration::from_secs(0));
    let reclaimed = scavenger.claim_batch(10).await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, record.id);
    scavenger.release_claim().await.unwrap();

    holder.release_claim().await.unwrap();
    assert_eq!(rival.claim_batch(10).await.unwrap().len(), 1);
    Ok(())
}
