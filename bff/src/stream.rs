//! Live tail of contract creations.
//!
//! A private bus subscription (unique consumer group per BFF instance, so
//! every instance sees every event) feeds a [`StreamHub`]: the last-known
//! contract snapshot plus a broadcast channel for connected clients. The
//! `/stream` handler replays the snapshot and then forwards live events as
//! newline-delimited JSON.

use partnerflow_core::bus::{
    BusError, DeliveryHandler, Disposition, MessageBus, SubscriptionHandle, SubscriptionSpec,
};
use partnerflow_core::envelope::Envelope;
use partnerflow_core::events::ContractCreated;
use partnerflow_core::topics::{self, ContractsEvent};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

/// Fan-out point between the bus subscription and connected clients.
pub struct StreamHub {
    last: RwLock<Option<ContractCreated>>,
    tx: broadcast::Sender<ContractCreated>,
}

impl StreamHub {
    /// Create a hub with a bounded client buffer.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            last: RwLock::new(None),
            tx,
        }
    }

    /// Record an event: update the snapshot and fan out to clients.
    pub async fn record(&self, event: ContractCreated) {
        *self.last.write().await = Some(event.clone());
        // Send fails only when no client is connected, which is fine.
        let _ = self.tx.send(event);
    }

    /// The last-known contract creation, if any.
    pub async fn last(&self) -> Option<ContractCreated> {
        self.last.read().await.clone()
    }

    /// Subscribe a client to live events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ContractCreated> {
        self.tx.subscribe()
    }
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Bus handler feeding the hub from the contract event topic.
pub struct ContractTailHandler {
    hub: Arc<StreamHub>,
}

impl ContractTailHandler {
    /// Install the tail subscription with a private group unique to this
    /// instance.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] when the consumer cannot be
    /// installed.
    pub async fn subscribe(
        bus: &Arc<dyn MessageBus>,
        hub: Arc<StreamHub>,
    ) -> Result<SubscriptionHandle, BusError> {
        let group = format!("bff-contracts-stream-{}", Uuid::new_v4());
        bus.subscribe(
            SubscriptionSpec::new(topics::CONTRACT_EVENTS, group),
            Arc::new(Self { hub }),
        )
        .await
    }
}

impl DeliveryHandler for ContractTailHandler {
    fn handle(
        &self,
        envelope: Envelope,
    ) -> Pin<Box<dyn Future<Output = Disposition> + Send + '_>> {
        Box::pin(async move {
            match ContractsEvent::from_envelope(&envelope) {
                Ok(ContractsEvent::Created(event)) => {
                    tracing::debug!(contract_id = %event.contract_id, "tail updated");
                    self.hub.record(event).await;
                    Disposition::Ack
                },
                Err(e) => {
                    tracing::warn!(error = %e, "undecodable contract event on tail");
                    Disposition::NackDead
                },
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use chrono::Utc;
    use partnerflow_core::money::{ContractKind, Money};

    fn event(n: u32) -> ContractCreated {
        ContractCreated {
            contract_id: Uuid::new_v4(),
            influencer_id: format!("inf-{n}"),
            campaign_id: Uuid::new_v4(),
            total_amount: Money::new("100".parse().unwrap(), "USD").unwrap(),
            contract_kind: ContractKind::OneOff,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn snapshot_tracks_latest_event() {
        let hub = StreamHub::new();
        assert!(hub.last().await.is_none());

        hub.record(event(1)).await;
        hub.record(event(2)).await;
        assert_eq!(hub.last().await.unwrap().influencer_id, "inf-2");
    }

    #[tokio::test]
    async fn subscribers_receive_live_events() {
        let hub = StreamHub::new();
        let mut rx = hub.subscribe();

        hub.record(event(7)).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.influencer_id, "inf-7");
    }
}
