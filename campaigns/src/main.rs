//! Campaigns service binary: wires the Redpanda bus to the worker.

use anyhow::Context;
use partnerflow_campaigns::{CampaignWorker, InMemoryCampaignStore};
use partnerflow_core::clock::SystemClock;
use partnerflow_core::config::BusSettings;
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

    let worker = Arc::new(CampaignWorker::new(
        Arc::new(InMemoryCampaignStore::new()),
        bus,
        Arc::new(SystemClock),
    ));
    let subscriptions = worker
        .subscribe()
        .await
        .context("failed to install subscriptions")?;

    tracing::info!(brokers = %settings.brokers, "campaigns service running");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tracing::info!("shutting down");
    for subscription in subscriptions {
        subscription.close().await;
    }
    Ok(())
}
