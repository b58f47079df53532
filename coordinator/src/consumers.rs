//! Bus consumers feeding the coordinator.
//!
//! One shared-subscription consumer per topic of interest, all in the
//! `saga-coordinator` group. Each handler decodes through its topic's codec
//! enum and routes with a compile-time-checked match; kinds outside the
//! catalog go to dead-letter.

use crate::CONSUMER_GROUP;
use crate::service::{CoordinatorService, stamp_now};
use partnerflow_core::bus::{
    BusError, DeliveryHandler, Disposition, MessageBus, SubscriptionHandle, SubscriptionSpec,
};
use partnerflow_core::envelope::Envelope;
use partnerflow_core::topics::{
    self, CampaignDeletionMessage, CampaignsEvent, ContractsErrorEvent, ContractsEvent,
    InfluencersEvent,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

struct InfluencerEventsHandler(Arc<CoordinatorService>);
struct CampaignEventsHandler(Arc<CoordinatorService>);
struct DeletionChannelHandler(Arc<CoordinatorService>);
struct ContractEventsHandler(Arc<CoordinatorService>);
struct ContractErrorsHandler(Arc<CoordinatorService>);

/// Install every coordinator subscription on the bus.
///
/// # Errors
///
/// Returns [`BusError::SubscriptionFailed`] when any consumer cannot be
/// installed; already-installed consumers keep running and are returned by
/// their handles on success only.
pub async fn subscribe_all(
    service: Arc<CoordinatorService>,
    bus: Arc<dyn MessageBus>,
) -> Result<Vec<SubscriptionHandle>, BusError> {
    let mut handles = Vec::with_capacity(5);

    handles.push(
        bus.subscribe(
            SubscriptionSpec::new(topics::INFLUENCER_EVENTS, CONSUMER_GROUP),
            Arc::new(InfluencerEventsHandler(Arc::clone(&service))),
        )
        .await?,
    );
    handles.push(
        bus.subscribe(
            SubscriptionSpec::new(topics::CAMPAIGN_EVENTS, CONSUMER_GROUP),
            Arc::new(CampaignEventsHandler(Arc::clone(&service))),
        )
        .await?,
    );
    handles.push(
        bus.subscribe(
            SubscriptionSpec::new(topics::CAMPAIGN_DELETION, CONSUMER_GROUP),
            Arc::new(DeletionChannelHandler(Arc::clone(&service))),
        )
        .await?,
    );
    handles.push(
        bus.subscribe(
            SubscriptionSpec::new(topics::CONTRACT_EVENTS, CONSUMER_GROUP),
            Arc::new(ContractEventsHandler(Arc::clone(&service))),
        )
        .await?,
    );
    handles.push(
        bus.subscribe(
            SubscriptionSpec::new(topics::CONTRACT_ERRORS, CONSUMER_GROUP),
            Arc::new(ContractErrorsHandler(service)),
        )
        .await?,
    );

    Ok(handles)
}

fn disposition_for<E: std::fmt::Display>(result: Result<(), E>) -> Disposition {
    match result {
        Ok(()) => Disposition::Ack,
        Err(e) => {
            tracing::warn!(error = %e, "coordinator handling failed, requesting redelivery");
            Disposition::NackRetry
        },
    }
}

impl DeliveryHandler for InfluencerEventsHandler {
    fn handle(
        &self,
        envelope: Envelope,
    ) -> Pin<Box<dyn Future<Output = Disposition> + Send + '_>> {
        Box::pin(async move {
            let envelope = stamp_now(envelope);
            match InfluencersEvent::from_envelope(&envelope) {
                Ok(InfluencersEvent::Registered(event)) => disposition_for(
                    self.0
                        .handle_influencer_registered(&envelope, event)
                        .await,
                ),
                Err(e) => {
                    tracing::warn!(error = %e, "undecodable influencer event");
                    Disposition::NackDead
                },
            }
        })
    }
}

impl DeliveryHandler for CampaignEventsHandler {
    fn handle(
        &self,
        envelope: Envelope,
    ) -> Pin<Box<dyn Future<Output = Disposition> + Send + '_>> {
        Box::pin(async move {
            let envelope = stamp_now(envelope);
            match CampaignsEvent::from_envelope(&envelope) {
                Ok(CampaignsEvent::Created(event)) => {
                    disposition_for(self.0.handle_campaign_created(&envelope, event).await)
                },
                Ok(CampaignsEvent::Rejected(event)) => {
                    disposition_for(self.0.handle_campaign_rejected(&envelope, event).await)
                },
                Err(e) => {
                    tracing::warn!(error = %e, "undecodable campaign event");
                    Disposition::NackDead
                },
            }
        })
    }
}

impl DeliveryHandler for DeletionChannelHandler {
    fn handle(
        &self,
        envelope: Envelope,
    ) -> Pin<Box<dyn Future<Output = Disposition> + Send + '_>> {
        Box::pin(async move {
            let envelope = stamp_now(envelope);
            match CampaignDeletionMessage::from_envelope(&envelope) {
                Ok(CampaignDeletionMessage::Deleted(event)) => {
                    disposition_for(self.0.handle_campaign_deleted(&envelope, event).await)
                },
                // Requests on this channel are for the campaigns service.
                Ok(CampaignDeletionMessage::Requested(_)) => Disposition::Ack,
                Err(e) => {
                    tracing::warn!(error = %e, "undecodable deletion message");
                    Disposition::NackDead
                },
            }
        })
    }
}

impl DeliveryHandler for ContractEventsHandler {
    fn handle(
        &self,
        envelope: Envelope,
    ) -> Pin<Box<dyn Future<Output = Disposition> + Send + '_>> {
        Box::pin(async move {
            let envelope = stamp_now(envelope);
            match ContractsEvent::from_envelope(&envelope) {
                Ok(ContractsEvent::Created(event)) => {
                    disposition_for(self.0.handle_contract_created(&envelope, event).await)
                },
                Err(e) => {
                    tracing::warn!(error = %e, "undecodable contract event");
                    Disposition::NackDead
                },
            }
        })
    }
}

impl DeliveryHandler for ContractErrorsHandler {
    fn handle(
        &self,
        envelope: Envelope,
    ) -> Pin<Box<dyn Future<Output = Disposition> + Send + '_>> {
        Box::pin(async move {
            let envelope = stamp_now(envelope);
            match ContractsErrorEvent::from_envelope(&envelope) {
                Ok(ContractsErrorEvent::Failed(event)) => {
                    disposition_for(self.0.handle_contract_error(&envelope, event).await)
                },
                Err(e) => {
                    tracing::warn!(error = %e, "undecodable contract error event");
                    Disposition::NackDead
                },
            }
        })
    }
}
