//! Coordinator binary: Postgres saga log, outbox relay, Redpanda consumers.

use anyhow::Context;
use partnerflow_coordinator::{CoordinatorConfig, CoordinatorService, consumers};
use partnerflow_core::bus::MessageBus;
use partnerflow_core::clock::SystemClock;
use partnerflow_core::config::{self, BusSettings};
use partnerflow_core::topics;
use partnerflow_postgres::{
    DeadLetterArchiver, DeadLetterStore, OutboxRelay, PostgresOutbox, PostgresSagaLog,
    ensure_schema,
};
use partnerflow_redpanda::RedpandaMessageBus;
use partnerflow_runtime::shutdown::Shutdown;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = BusSettings::from_env();
    let database_url = config::database_url().context("coordinator requires a saga log store")?;

    let pool = sqlx::PgPool::connect(&database_url)
        .await
        .context("failed to connect to the saga log database")?;
    ensure_schema(&pool)
        .await
        .context("failed to ensure database schema")?;

    let bus: Arc<dyn MessageBus> = Arc::new(
        RedpandaMessageBus::new(&settings.brokers).context("failed to create message bus")?,
    );

    // Commands go through the outbox; the relay drains them to the bus.
    let service = CoordinatorService::new(
        Arc::new(PostgresSagaLog::new(pool.clone())),
        Arc::new(PostgresOutbox::new(pool.clone())),
        Arc::new(SystemClock),
        CoordinatorConfig::default(),
    );

    let shutdown = Shutdown::new();
    let relay = OutboxRelay::new(pool.clone(), Arc::clone(&bus));
    let relay_task = tokio::spawn(relay.run(shutdown.signal()));

    // Sideline channels drain into the database for offline inspection.
    let dead_letters = Arc::new(DeadLetterStore::new(pool));
    let mut subscriptions =
        DeadLetterArchiver::subscribe_sources(&bus, dead_letters, &topics::ALL)
            .await
            .context("failed to install the dead-letter archiver")?;

    // Resume sagas interrupted by the previous shutdown before taking new
    // deliveries.
    let recovered = service.recover_all().await.context("saga recovery failed")?;
    tracing::info!(recovered, "startup recovery finished");

    subscriptions.extend(
        consumers::subscribe_all(Arc::clone(&service), bus)
            .await
            .context("failed to install coordinator subscriptions")?,
    );

    tracing::info!(brokers = %settings.brokers, "saga coordinator running");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tracing::info!("shutting down");
    for subscription in subscriptions {
        subscription.close().await;
    }
    shutdown.trigger();
    let _ = relay_task.await;
    Ok(())
}
