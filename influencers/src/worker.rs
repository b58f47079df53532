//! Command consumer for the Influencers service.
//!
//! Single command application pipeline:
//! `Received → Decoded → Validated → Applied (+event emitted) → Acked`,
//! with decode failures dead-lettered and everything else converted into an
//! explicit outcome. The worker is idempotent: a redelivered command whose
//! `message_id` was already fully processed acks without emitting anything.

use crate::domain::Influencer;
use crate::store::{InfluencerStore, InsertOutcome};
use crate::{COMMAND_GROUP, SERVICE_NAME};
use partnerflow_core::bus::{
    BusError, DeliveryHandler, Disposition, MessageBus, SubscriptionHandle, SubscriptionSpec,
};
use partnerflow_core::clock::Clock;
use partnerflow_core::envelope::Envelope;
use partnerflow_core::events::InfluencerRegistered;
use partnerflow_core::topics::{self, InfluencersCommand};
use partnerflow_runtime::retry::{RetryPolicy, retry_while};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Influencers service worker.
pub struct InfluencerWorker {
    store: Arc<dyn InfluencerStore>,
    bus: Arc<dyn MessageBus>,
    clock: Arc<dyn Clock>,
    publish_retry: RetryPolicy,
}

impl InfluencerWorker {
    /// Build a worker over the given store, bus, and clock.
    #[must_use]
    pub fn new(
        store: Arc<dyn InfluencerStore>,
        bus: Arc<dyn MessageBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            bus,
            clock,
            publish_retry: RetryPolicy::default(),
        }
    }

    /// Install the worker's shared subscription on the command topic.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] when the consumer cannot be
    /// installed.
    pub async fn subscribe(self: Arc<Self>) -> Result<SubscriptionHandle, BusError> {
        let bus = Arc::clone(&self.bus);
        bus.subscribe(
            SubscriptionSpec::new(topics::CREATE_INFLUENCER, COMMAND_GROUP),
            self,
        )
        .await
    }

    async fn process(&self, envelope: Envelope) -> Disposition {
        let command = match InfluencersCommand::from_envelope(&envelope) {
            Ok(InfluencersCommand::Create(command)) => command,
            Err(e) => {
                tracing::warn!(error = %e, envelope = %envelope, "undecodable command, dead-lettering");
                return Disposition::NackDead;
            },
        };

        match self.store.was_processed(envelope.message_id).await {
            Ok(true) => {
                tracing::debug!(
                    message_id = %envelope.message_id,
                    "duplicate command delivery, already processed"
                );
                return Disposition::Ack;
            },
            Ok(false) => {},
            Err(e) => {
                tracing::warn!(error = %e, "store unavailable during dedup check");
                return Disposition::NackRetry;
            },
        }

        let influencer = match Influencer::register(&command, self.clock.now()) {
            Ok(influencer) => influencer,
            Err(e) => {
                // Admission already validated; a command failing here is a
                // schema-compatible but semantically broken payload. There
                // is no influencer error channel, so record and ack.
                tracing::error!(
                    influencer_id = %command.influencer_id,
                    error = %e,
                    "registration command failed validation, dropping"
                );
                return Disposition::Ack;
            },
        };

        let registered = InfluencerRegistered {
            influencer_id: influencer.id.clone(),
            name: influencer.name.clone(),
            email: influencer.email.clone(),
            categories: influencer.categories.clone(),
            registered_at: influencer.registered_at,
        };

        match self.store.insert(influencer).await {
            Ok(InsertOutcome::Inserted) => {},
            Ok(InsertOutcome::AlreadyExists) => {
                // Same entity resent under a fresh message id: nothing new
                // to persist, but the announcement may have been lost on a
                // previous attempt, so fall through and (re)publish. The
                // coordinator dedupes by saga log triple.
                tracing::info!(
                    influencer_id = %registered.influencer_id,
                    "influencer already exists, re-announcing"
                );
            },
            Err(e) => {
                tracing::warn!(error = %e, "store unavailable during insert");
                return Disposition::NackRetry;
            },
        }

        let outbound = match Envelope::enclose(
            &registered,
            envelope.correlation_id,
            SERVICE_NAME,
            self.clock.now(),
        ) {
            Ok(outbound) => outbound,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode registration event");
                return Disposition::NackDead;
            },
        };

        let published = retry_while(
            &self.publish_retry,
            || self.bus.publish(topics::INFLUENCER_EVENTS, &outbound),
            BusError::is_transient,
        )
        .await;

        if let Err(e) = published {
            tracing::warn!(error = %e, "event publish failed, requesting redelivery");
            return Disposition::NackRetry;
        }

        if let Err(e) = self.store.mark_processed(envelope.message_id).await {
            // The event is out; a redelivery will re-announce and the
            // coordinator dedupes. Prefer that over losing the marker.
            tracing::warn!(error = %e, "failed to record processed marker");
        }

        tracing::info!(
            influencer_id = %registered.influencer_id,
            correlation_id = %envelope.correlation_id,
            "influencer registered"
        );
        Disposition::Ack
    }
}

impl DeliveryHandler for InfluencerWorker {
    fn handle(
        &self,
        envelope: Envelope,
    ) -> Pin<Box<dyn Future<Output = Disposition> + Send + '_>> {
        Box::pin(self.process(envelope))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::store::InMemoryInfluencerStore;
    use chrono::Utc;
    use partnerflow_core::commands::CreateInfluencer;
    use partnerflow_core::envelope::CorrelationId;

    fn create_command() -> CreateInfluencer {
        CreateInfluencer {
            influencer_id: "inf-1".to_string(),
            name: "Ana".to_string(),
            email: "ana@x.io".to_string(),
            categories: vec!["moda".to_string()],
            platforms: vec![],
            description: None,
            biography: None,
            website: None,
            phone: None,
        }
    }

    struct NullBus;

    impl MessageBus for NullBus {
        fn publish(
            &self,
            _topic: &str,
            _envelope: &Envelope,
        ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }

        fn subscribe(
            &self,
            spec: SubscriptionSpec,
            _handler: Arc<dyn DeliveryHandler>,
        ) -> Pin<Box<dyn Future<Output = Result<SubscriptionHandle, BusError>> + Send + '_>>
        {
            Box::pin(async move {
                Err(BusError::SubscriptionFailed {
                    topic: spec.topic,
                    reason: "null bus".to_string(),
                })
            })
        }
    }

    struct SystemClockForTests;

    impl Clock for SystemClockForTests {
        fn now(&self) -> chrono::DateTime<Utc> {
            Utc::now()
        }
    }

    fn worker_with(store: Arc<InMemoryInfluencerStore>) -> InfluencerWorker {
        InfluencerWorker::new(store, Arc::new(NullBus), Arc::new(SystemClockForTests))
    }

    #[tokio::test]
    async fn applies_command_and_acks() {
        let store = Arc::new(InMemoryInfluencerStore::new());
        let worker = worker_with(Arc::clone(&store));

        let envelope = Envelope::enclose(
            &create_command(),
            CorrelationId::new(),
            "bff",
            Utc::now(),
        )
        .unwrap();

        assert_eq!(worker.process(envelope).await, Disposition::Ack);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_message_id_is_a_noop() {
        let store = Arc::new(InMemoryInfluencerStore::new());
        let worker = worker_with(Arc::clone(&store));

        let envelope = Envelope::enclose(
            &create_command(),
            CorrelationId::new(),
            "bff",
            Utc::now(),
        )
        .unwrap();

        assert_eq!(worker.process(envelope.clone()).await, Disposition::Ack);
        // Exact same message id redelivered.
        assert_eq!(worker.process(envelope).await, Disposition::Ack);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn undecodable_command_is_dead_lettered() {
        let store = Arc::new(InMemoryInfluencerStore::new());
        let worker = worker_with(store);

        // An event kind arriving on the command path is outside the catalog.
        let stray = InfluencerRegistered {
            influencer_id: "inf-1".to_string(),
            name: "Ana".to_string(),
            email: "ana@x.io".to_string(),
            categories: vec![],
            registered_at: Utc::now(),
        };
        let envelope =
            Envelope::enclose(&stray, CorrelationId::new(), "tests", Utc::now()).unwrap();

        assert_eq!(worker.process(envelope).await, Disposition::NackDead);
    }

    #[tokio::test]
    async fn invalid_payload_is_dropped_with_ack() {
        let store = Arc::new(InMemoryInfluencerStore::new());
        let worker = worker_with(Arc::clone(&store));

        let mut command = create_command();
        command.email = "not-an-email".to_string();
        let envelope =
            Envelope::enclose(&command, CorrelationId::new(), "bff", Utc::now()).unwrap();

        assert_eq!(worker.process(envelope).await, Disposition::Ack);
        assert!(store.is_empty());
    }
}
