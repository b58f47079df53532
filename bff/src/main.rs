//! BFF binary: axum server over the Redpanda bus.

use anyhow::Context;
use partnerflow_bff::{AppState, ContractTailHandler, StreamHub, router};
use partnerflow_core::bus::MessageBus;
use partnerflow_core::clock::SystemClock;
use partnerflow_core::config::{self, BusSettings};
use partnerflow_redpanda::RedpandaMessageBus;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = BusSettings::from_env();
    let bus: Arc<dyn MessageBus> = Arc::new(
        RedpandaMessageBus::new(&settings.brokers).context("failed to create message bus")?,
    );

    let hub = Arc::new(StreamHub::new());
    let tail = ContractTailHandler::subscribe(&bus, Arc::clone(&hub))
        .await
        .context("failed to install the contract tail subscription")?;

    let state = AppState::new(bus, Arc::new(SystemClock), hub);
    let addr = config::bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(addr = %addr, brokers = %settings.brokers, "bff running");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")?;

    tracing::info!("shutting down");
    tail.close().await;
    Ok(())
}
