//! Command consumer for the Contracts service.
//!
//! Success goes to the event topic; every failure the coordinator must act
//! on goes to the error topic as a `ContractError`. The originating command
//! is acked in both cases — the error event is the saga signal, not a nack.

use crate::domain::Contract;
use crate::store::{ContractStore, InsertOutcome};
use crate::{COMMAND_GROUP, SERVICE_NAME};
use partnerflow_core::bus::{
    BusError, DeliveryHandler, Disposition, MessageBus, SubscriptionHandle, SubscriptionSpec,
};
use partnerflow_core::clock::Clock;
use partnerflow_core::commands::CreateContract;
use partnerflow_core::envelope::{Envelope, Message};
use partnerflow_core::events::{ContractCreated, ContractError, ContractErrorKind};
use partnerflow_core::topics::{self, ContractsCommand};
use partnerflow_runtime::retry::{RetryPolicy, retry_while};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Contracts service worker.
pub struct ContractWorker {
    store: Arc<dyn ContractStore>,
    bus: Arc<dyn MessageBus>,
    clock: Arc<dyn Clock>,
    publish_retry: RetryPolicy,
}

impl ContractWorker {
    /// Build a worker over the given store, bus, and clock.
    #[must_use]
    pub fn new(
        store: Arc<dyn ContractStore>,
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
            SubscriptionSpec::new(topics::CONTRACT_COMMANDS, COMMAND_GROUP),
            self,
        )
        .await
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

    async fn process(&self, envelope: Envelope) -> Disposition {
        let command = match ContractsCommand::from_envelope(&envelope) {
            Ok(ContractsCommand::Create(command)) => command,
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

        let contract = match Contract::create(&command, self.clock.now()) {
            Ok(contract) => contract,
            Err(e) => {
                return self
                    .fail(
                        &command,
                        ContractErrorKind::Validation,
                        e.to_string(),
                        &envelope,
                    )
                    .await;
            },
        };

        match self.store.insert(contract.clone()).await {
            Ok(InsertOutcome::Inserted) => {},
            Ok(InsertOutcome::DuplicateActive) => {
                return self
                    .fail(
                        &command,
                        ContractErrorKind::DuplicateContract,
                        format!(
                            "active contract already exists for influencer {} and campaign {}",
                            command.influencer.id, command.campaign.id
                        ),
                        &envelope,
                    )
                    .await;
            },
            Ok(InsertOutcome::AlreadyExists) => {
                tracing::info!(contract_id = %contract.id, "contract already exists, re-announcing");
            },
            Err(e) => {
                tracing::warn!(error = %e, "store unavailable during insert");
                return Disposition::NackRetry;
            },
        }

        let created = ContractCreated {
            contract_id: contract.id,
            influencer_id: contract.influencer.id.clone(),
            campaign_id: contract.campaign.id,
            total_amount: contract.total_amount.clone(),
            contract_kind: contract.kind,
            created_at: contract.created_at,
        };

        if let Err(e) = self
            .publish(topics::CONTRACT_EVENTS, &created, &envelope)
            .await
        {
            tracing::warn!(error = %e, "event publish failed, requesting redelivery");
            return Disposition::NackRetry;
        }

        if let Err(e) = self.store.mark_processed(envelope.message_id).await {
            tracing::warn!(error = %e, "failed to record processed marker");
        }

        tracing::info!(
            contract_id = %contract.id,
            correlation_id = %envelope.correlation_id,
            "contract created"
        );
        Disposition::Ack
    }

    async fn fail(
        &self,
        command: &CreateContract,
        error_kind: ContractErrorKind,
        error_detail: String,
        envelope: &Envelope,
    ) -> Disposition {
        tracing::warn!(
            contract_id = %command.contract_id,
            influencer_id = %command.influencer.id,
            campaign_id = %command.campaign.id,
            ?error_kind,
            detail = %error_detail,
            "contract command failed"
        );

        let error = ContractError {
            contract_id: command.contract_id,
            influencer_id: command.influencer.id.clone(),
            campaign_id: command.campaign.id,
            error_kind,
            error_detail,
        };

        if let Err(e) = self.publish(topics::CONTRACT_ERRORS, &error, envelope).await {
            tracing::warn!(error = %e, "error event publish failed, requesting redelivery");
            return Disposition::NackRetry;
        }
        if let Err(e) = self.store.mark_processed(envelope.message_id).await {
            tracing::warn!(error = %e, "failed to record processed marker");
        }
        Disposition::Ack
    }
}

impl DeliveryHandler for ContractWorker {
    fn handle(
        &self,
        envelope: Envelope,
    ) -> Pin<Box<dyn Future<Output = Disposition> + Send + '_>> {
        Box::pin(self.process(envelope))
    }
}
