//! Command and compensation consumers for the Campaigns service.
//!
//! Two subscriptions share one worker: the command topic (`RegisterCampaign`)
//! and the compensation channel (`DeleteCampaign` requests). Business-rule
//! violations become explicit `CampaignRejected` events and the command is
//! acked — internal faults are first-class saga signals, never silent nacks.

use crate::domain::Campaign;
use crate::store::{CampaignStore, DeleteOutcome, InsertOutcome};
use crate::{COMMAND_GROUP, DELETION_GROUP, SERVICE_NAME};
use partnerflow_core::bus::{
    BusError, DeliveryHandler, Disposition, MessageBus, SubscriptionHandle, SubscriptionSpec,
};
use partnerflow_core::clock::Clock;
use partnerflow_core::commands::{DeleteCampaign, RegisterCampaign};
use partnerflow_core::envelope::{Envelope, Message};
use partnerflow_core::events::{CampaignCreated, CampaignDeleted, CampaignRejected};
use partnerflow_core::topics::{self, CampaignDeletionMessage, CampaignsCommand};
use partnerflow_runtime::retry::{RetryPolicy, retry_while};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Campaigns service worker.
pub struct CampaignWorker {
    store: Arc<dyn CampaignStore>,
    bus: Arc<dyn MessageBus>,
    clock: Arc<dyn Clock>,
    publish_retry: RetryPolicy,
}

struct CommandHandler(Arc<CampaignWorker>);
struct DeletionHandler(Arc<CampaignWorker>);

impl CampaignWorker {
    /// Build a worker over the given store, bus, and clock.
    #[must_use]
    pub fn new(
        store: Arc<dyn CampaignStore>,
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

    /// Install both subscriptions: commands and the compensation channel.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] when either consumer cannot
    /// be installed.
    pub async fn subscribe(self: Arc<Self>) -> Result<Vec<SubscriptionHandle>, BusError> {
        let commands = self
            .bus
            .subscribe(
                SubscriptionSpec::new(topics::CAMPAIGN_COMMANDS, COMMAND_GROUP),
                Arc::new(CommandHandler(Arc::clone(&self))),
            )
            .await?;
        let deletions = self
            .bus
            .subscribe(
                SubscriptionSpec::new(topics::CAMPAIGN_DELETION, DELETION_GROUP),
                Arc::new(DeletionHandler(Arc::clone(&self))),
            )
            .await?;
        Ok(vec![commands, deletions])
    }

    async fn publish<M: Message + Serialize + Sync>(
        &self,
        topic: &str,
        message: &M,
        inbound: &Envelope,
    ) -> Result<(), BusError> {
        let outbound = Envelope::enclose(
            message,
            inbound.correlation_id,
            SERVICE_NAME,
            self.clock.now(),
        )
        .map_err(|e| BusError::Schema(e.to_string()))?;

        retry_while(
            &self.publish_retry,
            || self.bus.publish(topic, &outbound),
            BusError::is_transient,
        )
        .await
    }

    async fn process_command(&self, envelope: Envelope) -> Disposition {
        let command = match CampaignsCommand::from_envelope(&envelope) {
            Ok(CampaignsCommand::Register(command)) => command,
            Err(e) => {
                tracing::warn!(error = %e, envelope = %envelope, "undecodable command, dead-lettering");
                return Disposition::NackDead;
            },
        };

        match self.store.was_processed(envelope.message_id).await {
            Ok(true) => return Disposition::Ack,
            Ok(false) => {},
            Err(e) => {
                tracing::warn!(error = %e, "store unavailable during dedup check");
                return Disposition::NackRetry;
            },
        }

        let campaign = match Campaign::create(&command, self.clock.now()) {
            Ok(campaign) => campaign,
            Err(e) => {
                return self
                    .reject(&command, e.to_string(), &envelope)
                    .await;
            },
        };

        match self.store.insert(campaign.clone()).await {
            Ok(InsertOutcome::Inserted) => {},
            Ok(InsertOutcome::NameConflict) => {
                return self
                    .reject(
                        &command,
                        format!("campaign name already in use: {}", command.name),
                        &envelope,
                    )
                    .await;
            },
            Ok(InsertOutcome::AlreadyExists) => {
                tracing::info!(campaign_id = %campaign.id, "campaign already exists, re-announcing");
            },
            Err(e) => {
                tracing::warn!(error = %e, "store unavailable during insert");
                return Disposition::NackRetry;
            },
        }

        let created = CampaignCreated {
            campaign_id: campaign.id,
            name: campaign.name.clone(),
            commission: campaign.commission.clone(),
            period: campaign.period.clone(),
            target_categories: campaign.target_categories.clone(),
            origin_influencer: campaign.origin_influencer.clone(),
        };

        if let Err(e) = self
            .publish(topics::CAMPAIGN_EVENTS, &created, &envelope)
            .await
        {
            tracing::warn!(error = %e, "event publish failed, requesting redelivery");
            return Disposition::NackRetry;
        }

        if let Err(e) = self.store.mark_processed(envelope.message_id).await {
            tracing::warn!(error = %e, "failed to record processed marker");
        }

        tracing::info!(
            campaign_id = %campaign.id,
            correlation_id = %envelope.correlation_id,
            "campaign created"
        );
        Disposition::Ack
    }

    async fn reject(
        &self,
        command: &RegisterCampaign,
        reason: String,
        envelope: &Envelope,
    ) -> Disposition {
        tracing::warn!(
            campaign_id = %command.campaign_id,
            name = %command.name,
            reason = %reason,
            "campaign command rejected"
        );

        let rejected = CampaignRejected {
            campaign_id: command.campaign_id,
            name: command.name.clone(),
            reason,
        };

        if let Err(e) = self
            .publish(topics::CAMPAIGN_EVENTS, &rejected, envelope)
            .await
        {
            tracing::warn!(error = %e, "rejection publish failed, requesting redelivery");
            return Disposition::NackRetry;
        }
        if let Err(e) = self.store.mark_processed(envelope.message_id).await {
            tracing::warn!(error = %e, "failed to record processed marker");
        }
        Disposition::Ack
    }

    async fn process_deletion(&self, envelope: Envelope) -> Disposition {
        let request: DeleteCampaign = match CampaignDeletionMessage::from_envelope(&envelope) {
            Ok(CampaignDeletionMessage::Requested(request)) => request,
            // Confirmations on this channel are for the coordinator.
            Ok(CampaignDeletionMessage::Deleted(_)) => return Disposition::Ack,
            Err(e) => {
                tracing::warn!(error = %e, envelope = %envelope, "undecodable deletion message");
                return Disposition::NackDead;
            },
        };

        match self.store.was_processed(envelope.message_id).await {
            Ok(true) => return Disposition::Ack,
            Ok(false) => {},
            Err(e) => {
                tracing::warn!(error = %e, "store unavailable during dedup check");
                return Disposition::NackRetry;
            },
        }

        match self.store.delete(request.campaign_id).await {
            Ok(DeleteOutcome::Deleted) => {
                tracing::info!(campaign_id = %request.campaign_id, reason = %request.reason, "campaign deleted");
            },
            Ok(DeleteOutcome::NotFound) => {
                // Compensations are idempotent: confirm even when there is
                // nothing left to delete, so the saga can settle.
                tracing::warn!(campaign_id = %request.campaign_id, "deletion requested for unknown campaign");
            },
            Err(e) => {
                tracing::warn!(error = %e, "store unavailable during delete");
                return Disposition::NackRetry;
            },
        }

        let deleted = CampaignDeleted {
            campaign_id: request.campaign_id,
            influencer_id: request.influencer_id.clone(),
            reason: request.reason.clone(),
            deleted_at: self.clock.now(),
        };

        if let Err(e) = self
            .publish(topics::CAMPAIGN_DELETION, &deleted, &envelope)
            .await
        {
            tracing::warn!(error = %e, "deletion confirmation publish failed");
            return Disposition::NackRetry;
        }
        if let Err(e) = self.store.mark_processed(envelope.message_id).await {
            tracing::warn!(error = %e, "failed to record processed marker");
        }
        Disposition::Ack
    }
}

impl DeliveryHandler for CommandHandler {
    fn handle(
        &self,
        envelope: Envelope,
    ) -> Pin<Box<dyn Future<Output = Disposition> + Send + '_>> {
        Box::pin(self.0.process_command(envelope))
    }
}

impl DeliveryHandler for DeletionHandler {
    fn handle(
        &self,
        envelope: Envelope,
    ) -> Pin<Box<dyn Future<Output = Disposition> + Send + '_>> {
        Box::pin(self.0.process_deletion(envelope))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::store::InMemoryCampaignStore;
    use chrono::Utc;
    use partnerflow_core::envelope::CorrelationId;
    use partnerflow_core::money::{Commission, CommissionKind, Money, Period};
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Bus double that records publishes.
    #[derive(Default)]
    struct RecordingBus {
        published: Mutex<Vec<(String, Envelope)>>,
    }

    impl RecordingBus {
        fn kinds_on(&self, topic: &str) -> Vec<String> {
            self.published
                .lock()
                .unwrap()
                .iter()
                .filter(|(t, _)| t == topic)
                .map(|(_, e)| e.kind.clone())
                .collect()
        }
    }

    impl MessageBus for RecordingBus {
        fn publish(
            &self,
            topic: &str,
            envelope: &Envelope,
        ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
            let topic = topic.to_string();
            let envelope = envelope.clone();
            Box::pin(async move {
                self.published.lock().unwrap().push((topic, envelope));
                Ok(())
            })
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
                    reason: "recording bus".to_string(),
                })
            })
        }
    }

    struct WallClock;

    impl Clock for WallClock {
        fn now(&self) -> chrono::DateTime<Utc> {
            Utc::now()
        }
    }

    fn register_command(name: &str) -> RegisterCampaign {
        RegisterCampaign {
            campaign_id: Uuid::new_v4(),
            name: name.to_string(),
            description: "d".to_string(),
            commission: Commission {
                kind: CommissionKind::Cpa,
                amount: Money::new("100".parse().unwrap(), "USD").unwrap(),
            },
            period: Period::open_from(Utc::now()),
            target_categories: vec!["moda".to_string()],
            origin_influencer: None,
            auto_activate: true,
        }
    }

    fn fixture() -> (Arc<RecordingBus>, Arc<InMemoryCampaignStore>, CampaignWorker) {
        let bus = Arc::new(RecordingBus::default());
        let store = Arc::new(InMemoryCampaignStore::new());
        let worker = CampaignWorker::new(
            Arc::clone(&store) as Arc<dyn CampaignStore>,
            Arc::clone(&bus) as Arc<dyn MessageBus>,
            Arc::new(WallClock),
        );
        (bus, store, worker)
    }

    #[tokio::test]
    async fn creates_campaign_and_announces() {
        let (bus, store, worker) = fixture();
        let envelope = Envelope::enclose(
            &register_command("Spring"),
            CorrelationId::new(),
            "coordinator",
            Utc::now(),
        )
        .unwrap();

        assert_eq!(worker.process_command(envelope).await, Disposition::Ack);
        assert_eq!(store.len(), 1);
        assert_eq!(
            bus.kinds_on(topics::CAMPAIGN_EVENTS),
            vec!["CampaignCreated".to_string()]
        );
    }

    #[tokio::test]
    async fn name_collision_emits_rejection_not_exception() {
        let (bus, store, worker) = fixture();

        for _ in 0..2 {
            let envelope = Envelope::enclose(
                &register_command("Spring"),
                CorrelationId::new(),
                "coordinator",
                Utc::now(),
            )
            .unwrap();
            assert_eq!(worker.process_command(envelope).await, Disposition::Ack);
        }

        assert_eq!(store.len(), 1);
        assert_eq!(
            bus.kinds_on(topics::CAMPAIGN_EVENTS),
            vec!["CampaignCreated".to_string(), "CampaignRejected".to_string()]
        );
    }

    #[tokio::test]
    async fn duplicate_command_message_is_a_noop() {
        let (bus, store, worker) = fixture();
        let envelope = Envelope::enclose(
            &register_command("Spring"),
            CorrelationId::new(),
            "coordinator",
            Utc::now(),
        )
        .unwrap();

        assert_eq!(
            worker.process_command(envelope.clone()).await,
            Disposition::Ack
        );
        assert_eq!(worker.process_command(envelope).await, Disposition::Ack);

        assert_eq!(store.len(), 1);
        assert_eq!(bus.kinds_on(topics::CAMPAIGN_EVENTS).len(), 1);
    }

    #[tokio::test]
    async fn deletion_request_confirms_even_for_unknown_campaign() {
        let (bus, _store, worker) = fixture();
        let request = DeleteCampaign {
            campaign_id: Uuid::new_v4(),
            influencer_id: Some("inf-1".to_string()),
            reason: "compensation".to_string(),
        };
        let envelope =
            Envelope::enclose(&request, CorrelationId::new(), "coordinator", Utc::now()).unwrap();

        assert_eq!(worker.process_deletion(envelope).await, Disposition::Ack);
        assert_eq!(
            bus.kinds_on(topics::CAMPAIGN_DELETION),
            vec!["CampaignDeleted".to_string()]
        );
    }

    #[tokio::test]
    async fn deletion_marks_campaign_deleted() {
        let (bus, store, worker) = fixture();
        let command = register_command("Spring");
        let campaign_id = command.campaign_id;
        let create =
            Envelope::enclose(&command, CorrelationId::new(), "coordinator", Utc::now()).unwrap();
        worker.process_command(create).await;

        let request = DeleteCampaign {
            campaign_id,
            influencer_id: None,
            reason: "compensation".to_string(),
        };
        let envelope =
            Envelope::enclose(&request, CorrelationId::new(), "coordinator", Utc::now()).unwrap();
        assert_eq!(worker.process_deletion(envelope).await, Disposition::Ack);

        let campaign = store.get(campaign_id).await.unwrap().unwrap();
        assert_eq!(campaign.status, crate::domain::CampaignStatus::Deleted);
        assert_eq!(bus.kinds_on(topics::CAMPAIGN_DELETION).len(), 1);

        // A new campaign under the old name is now allowed.
        let reuse =
            Envelope::enclose(&register_command("Spring"), CorrelationId::new(), "coordinator", Utc::now())
                .unwrap();
        assert_eq!(worker.process_command(reuse).await, Disposition::Ack);
        assert_eq!(
            bus.kinds_on(topics::CAMPAIGN_EVENTS),
            vec!["CampaignCreated".to_string(), "CampaignCreated".to_string()]
        );
    }

    #[tokio::test]
    async fn own_confirmations_on_deletion_channel_are_acked() {
        let (bus, _store, worker) = fixture();
        let confirmation = CampaignDeleted {
            campaign_id: Uuid::new_v4(),
            influencer_id: None,
            reason: "compensation".to_string(),
            deleted_at: Utc::now(),
        };
        let envelope =
            Envelope::enclose(&confirmation, CorrelationId::new(), "campaigns", Utc::now())
                .unwrap();

        assert_eq!(worker.process_deletion(envelope).await, Disposition::Ack);
        assert!(bus.published.lock().unwrap().is_empty());
    }
}
