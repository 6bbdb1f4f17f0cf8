//! Standalone outbox dispatcher process.
//!
//! Polls the `events_outbox` table and relays pending records to
//! RabbitMQ until it receives Ctrl-C. Safe to run in multiple replicas
//! against the same database.

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use aequatio_outbox::adapters::{AmqpPublisher, PgOutboxStore};
use aequatio_outbox::config::AppConfig;
use aequatio_outbox::{DispatcherConfig, OutboxDispatcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    let pool = PgPoolOptions::new()
        .min_connections(config.database.min_connections)
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.database.acquire_timeout())
        .connect(&config.database.url)
        .await
        .context("failed to connect to database")?;

    if config.database.run_migrations {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run migrations")?;
    }

    let store = Arc::new(PgOutboxStore::new(pool));
    let broker = Arc::new(AmqpPublisher::new(
        config.broker.url.clone(),
        config.broker.exchange.clone(),
    ));

    let dispatcher_config = DispatcherConfig::default()
        .with_batch_size(config.dispatcher.batch_size)
        .with_poll_interval(config.dispatcher.poll_interval());
    let dispatcher = OutboxDispatcher::with_config(store, broker, dispatcher_config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    dispatcher.run(shutdown_rx).await;
    Ok(())
}
