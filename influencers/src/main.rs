//! Influencers service binary: wires the Redpanda bus to the worker.

use anyhow::Context;
use partnerflow_core::clock::SystemClock;
use partnerflow_core::config::BusSettings;
use partnerflow_influencers::{InMemoryInfluencerStore, InfluencerWorker};
use partnerflow_redpanda::RedpandaMessageBus;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = BusSettings::from_env();
    let bus = Arc::new(
        RedpandaMessageBus::new(&settings.brokers).context("failed to create message bus")?,
    );

    let worker = Arc::new(InfluencerWorker::new(
        Arc::new(InMemoryInfluencerStore::new()),
        bus,
        Arc::new(SystemClock),
    ));
    let subscription = worker
        .subscribe()
        .await
        .context("failed to subscribe to command topic")?;

    tracing::info!(brokers = %settings.brokers, "influencers service running");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tracing::info!("shutting down");
    subscription.close().await;
    Ok(())
}
