//! The coordinator service: event handling, dispatch, timeouts, recovery.
//!
//! Every handler follows the same discipline:
//!
//! 1. take the per-correlation lock
//! 2. deduplicate against the saga log triple
//! 3. append the log entry for the observed transition
//! 4. only then dispatch the next command (or settle the saga)
//!
//! Appending before dispatching makes the log the source of truth: after a
//! crash, [`CoordinatorService::recover_all`] folds the log and re-derives
//! whatever command never made it out. Dispatch failures after the entry is
//! appended are therefore not retried through redelivery (the redelivered
//! event would dedupe anyway); the step deadline and recovery are the safety
//! net.

use crate::plan::StepPlan;
use crate::saga::{Saga, SagaContext, SagaStatus};
use crate::SERVICE_NAME;
use chrono::Utc;
use partnerflow_core::clock::Clock;
use partnerflow_core::commands::{
    CreateContract, DeleteCampaign, InfluencerRef, welcome_campaign,
};
use partnerflow_core::dispatcher::{CommandDispatcher, DispatchError};
use partnerflow_core::envelope::{CodecError, CorrelationId, Envelope, Message};
use partnerflow_core::events::{
    CampaignCreated, CampaignDeleted, CampaignRejected, ContractCreated, ContractError,
    InfluencerRegistered,
};
use partnerflow_core::money::{Commission, CommissionKind, Money};
use partnerflow_core::saga_log::{
    AppendOutcome, KIND_COMPENSATION_ISSUED, KIND_END, KIND_START, KIND_STEP_TIMED_OUT,
    NewSagaLogEntry, SagaLogError, SagaLogStore,
};
use partnerflow_core::topics;
use partnerflow_runtime::keyed::KeyedMutex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

/// Coordinator failures surfaced to the consumers.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// The saga log failed.
    #[error(transparent)]
    Log(#[from] SagaLogError),

    /// Outbound command dispatch failed after bounded retries.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// An envelope could not be built.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// An event arrived before its saga reached the step that expects it.
    ///
    /// Cross-topic deliveries carry no ordering guarantee; redelivery gives
    /// the earlier event time to land.
    #[error("event '{kind}' arrived before its saga reached the required step")]
    Premature {
        /// Kind of the early event.
        kind: &'static str,
    },
}

/// Tunables for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Soft deadline per step; on expiry the step is timed out.
    pub step_timeout: Duration,
    /// Bounded compensation dispatch attempts before raising an alert.
    pub max_compensation_attempts: u32,
    /// Commission applied to welcome campaigns derived from registrations.
    pub default_commission: Commission,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(600),
            max_compensation_attempts: 3,
            default_commission: Commission {
                kind: CommissionKind::Cpa,
                amount: Money {
                    amount: Decimal::ONE_HUNDRED,
                    currency: "USD".to_string(),
                },
            },
        }
    }
}

/// The saga coordinator.
///
/// Construct once at startup, wrap in an `Arc`, and register its consumers
/// with [`crate::consumers::subscribe_all`]. There is no global registry;
/// everything the coordinator touches is injected here.
pub struct CoordinatorService {
    log: Arc<dyn SagaLogStore>,
    dispatcher: Arc<dyn CommandDispatcher>,
    clock: Arc<dyn Clock>,
    plan: StepPlan,
    config: CoordinatorConfig,
    sagas: RwLock<HashMap<CorrelationId, Saga>>,
    locks: KeyedMutex<CorrelationId>,
    // Handle to ourselves for deadline tasks; set by `new` via new_cyclic.
    self_ref: Weak<CoordinatorService>,
}

impl CoordinatorService {
    /// Build a coordinator over the given ports.
    #[must_use]
    pub fn new(
        log: Arc<dyn SagaLogStore>,
        dispatcher: Arc<dyn CommandDispatcher>,
        clock: Arc<dyn Clock>,
        config: CoordinatorConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            log,
            dispatcher,
            clock,
            plan: StepPlan::standard(),
            config,
            sagas: RwLock::new(HashMap::new()),
            locks: KeyedMutex::new(),
            self_ref: self_ref.clone(),
        })
    }

    /// Snapshot of a saga's in-memory state, for tests and diagnostics.
    pub async fn saga(&self, correlation_id: CorrelationId) -> Option<Saga> {
        self.sagas.read().await.get(&correlation_id).cloned()
    }

    //
    // ===== Event handlers =====
    //

    /// Trigger event: open a saga and issue the step-1 command.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Log`] when the saga log fails.
    pub async fn handle_influencer_registered(
        &self,
        envelope: &Envelope,
        event: InfluencerRegistered,
    ) -> Result<(), CoordinatorError> {
        let correlation_id = envelope.correlation_id;
        let _guard = self.locks.lock(correlation_id).await;

        // One active saga per trigger: a second Start for the same
        // correlation is dropped.
        if self.log.has_entry(correlation_id, 0, KIND_START).await? {
            tracing::warn!(
                correlation_id = %correlation_id,
                "duplicate trigger for existing saga, dropping"
            );
            return Ok(());
        }

        self.append(correlation_id, 0, KIND_START, &event).await?;

        let saga = Saga::open(correlation_id, &event);
        let campaign_id = saga.campaign_id();
        let influencer = InfluencerRef {
            id: event.influencer_id.clone(),
            name: event.name.clone(),
            email: event.email.clone(),
        };
        self.sagas.write().await.insert(correlation_id, saga);

        tracing::info!(
            correlation_id = %correlation_id,
            influencer_id = %influencer.id,
            "saga opened"
        );

        let command = welcome_campaign(
            campaign_id,
            &influencer,
            &event.categories,
            self.config.default_commission.clone(),
            self.clock.now(),
        );
        self.send_command(topics::CAMPAIGN_COMMANDS, &command, correlation_id)
            .await;
        self.spawn_step_deadline(correlation_id, 1);
        Ok(())
    }

    /// Step-1 success: record the campaign and issue the step-2 command.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Log`] when the saga log fails.
    pub async fn handle_campaign_created(
        &self,
        envelope: &Envelope,
        event: CampaignCreated,
    ) -> Result<(), CoordinatorError> {
        let correlation_id = envelope.correlation_id;
        let _guard = self.locks.lock(correlation_id).await;

        let Some(saga) = self.resolve(correlation_id).await? else {
            tracing::warn!(correlation_id = %correlation_id, kind = "CampaignCreated", "event for unknown saga, dropping");
            return Ok(());
        };
        if saga.status.is_terminal() {
            tracing::warn!(correlation_id = %correlation_id, "late CampaignCreated for terminal saga, dropping");
            return Ok(());
        }
        if self
            .log
            .has_entry(correlation_id, 1, CampaignCreated::KIND)
            .await?
        {
            tracing::debug!(correlation_id = %correlation_id, "CampaignCreated already logged, dropping");
            return Ok(());
        }

        self.append(correlation_id, 1, CampaignCreated::KIND, &event)
            .await?;
        {
            let mut sagas = self.sagas.write().await;
            if let Some(saga) = sagas.get_mut(&correlation_id) {
                saga.current_step = 1;
                saga.context.campaign = Some(event.clone());
            }
        }

        if event.origin_influencer.is_some() {
            let saga = self
                .saga(correlation_id)
                .await
                .unwrap_or_else(|| Saga::open_placeholder(correlation_id));
            let command = Self::contract_command(&saga, &event);
            self.send_command(topics::CONTRACT_COMMANDS, &command, correlation_id)
                .await;
            self.spawn_step_deadline(correlation_id, 2);
        } else {
            // A campaign without influencer origin has no contract to create.
            tracing::info!(correlation_id = %correlation_id, "campaign without origin influencer, completing saga");
            self.settle(correlation_id, SagaStatus::Completed).await?;
        }
        Ok(())
    }

    /// Step-1 business rejection: nothing to compensate, the saga fails.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Log`] when the saga log fails.
    pub async fn handle_campaign_rejected(
        &self,
        envelope: &Envelope,
        event: CampaignRejected,
    ) -> Result<(), CoordinatorError> {
        let correlation_id = envelope.correlation_id;
        let _guard = self.locks.lock(correlation_id).await;

        let Some(saga) = self.resolve(correlation_id).await? else {
            tracing::warn!(correlation_id = %correlation_id, kind = "CampaignRejected", "event for unknown saga, dropping");
            return Ok(());
        };
        if saga.status.is_terminal() {
            return Ok(());
        }
        if self
            .log
            .has_entry(correlation_id, 1, CampaignRejected::KIND)
            .await?
        {
            return Ok(());
        }

        tracing::warn!(
            correlation_id = %correlation_id,
            campaign_id = %event.campaign_id,
            reason = %event.reason,
            "campaign rejected, failing saga"
        );
        self.append(correlation_id, 1, CampaignRejected::KIND, &event)
            .await?;
        {
            let mut sagas = self.sagas.write().await;
            if let Some(saga) = sagas.get_mut(&correlation_id) {
                saga.current_step = 1;
            }
        }
        self.settle(correlation_id, SagaStatus::Failed).await
    }

    /// Step-2 success: the saga completes.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Log`] when the saga log fails.
    pub async fn handle_contract_created(
        &self,
        envelope: &Envelope,
        event: ContractCreated,
    ) -> Result<(), CoordinatorError> {
        let correlation_id = envelope.correlation_id;
        let _guard = self.locks.lock(correlation_id).await;

        let Some(saga) = self.resolve(correlation_id).await? else {
            tracing::warn!(correlation_id = %correlation_id, kind = "ContractCreated", "event for unknown saga, dropping");
            return Ok(());
        };
        if saga.status.is_terminal() || saga.status == SagaStatus::Compensating {
            tracing::warn!(correlation_id = %correlation_id, status = saga.status.as_str(), "late ContractCreated, dropping");
            return Ok(());
        }
        if self
            .log
            .has_entry(correlation_id, 2, ContractCreated::KIND)
            .await?
        {
            return Ok(());
        }
        if saga.current_step < 1 {
            return Err(CoordinatorError::Premature {
                kind: ContractCreated::KIND,
            });
        }

        self.append(correlation_id, 2, ContractCreated::KIND, &event)
            .await?;
        {
            let mut sagas = self.sagas.write().await;
            if let Some(saga) = sagas.get_mut(&correlation_id) {
                saga.current_step = 2;
                saga.context.contract_id = Some(event.contract_id);
            }
        }
        self.settle(correlation_id, SagaStatus::Completed).await
    }

    /// Step-2 failure: compensate the campaign.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Log`] when the saga log fails.
    pub async fn handle_contract_error(
        &self,
        envelope: &Envelope,
        event: ContractError,
    ) -> Result<(), CoordinatorError> {
        let correlation_id = envelope.correlation_id;
        let _guard = self.locks.lock(correlation_id).await;

        let Some(saga) = self.resolve(correlation_id).await? else {
            tracing::warn!(correlation_id = %correlation_id, kind = "ContractError", "event for unknown saga, dropping");
            return Ok(());
        };
        if saga.status.is_terminal() {
            return Ok(());
        }
        if self
            .log
            .has_entry(correlation_id, 2, ContractError::KIND)
            .await?
        {
            return Ok(());
        }
        if saga.current_step < 1 {
            return Err(CoordinatorError::Premature {
                kind: ContractError::KIND,
            });
        }

        tracing::error!(
            correlation_id = %correlation_id,
            campaign_id = %event.campaign_id,
            detail = %event.error_detail,
            "contract failed, entering compensation"
        );
        self.append(correlation_id, 2, ContractError::KIND, &event)
            .await?;
        {
            let mut sagas = self.sagas.write().await;
            if let Some(saga) = sagas.get_mut(&correlation_id) {
                saga.current_step = 2;
            }
        }

        let reason = format!("compensation for contract failure: {}", event.error_detail);
        self.begin_compensation(correlation_id, 2, reason).await
    }

    /// Compensation confirmation: the saga settles as compensated.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Log`] when the saga log fails.
    pub async fn handle_campaign_deleted(
        &self,
        envelope: &Envelope,
        event: CampaignDeleted,
    ) -> Result<(), CoordinatorError> {
        let correlation_id = envelope.correlation_id;
        let _guard = self.locks.lock(correlation_id).await;

        let Some(saga) = self.resolve(correlation_id).await? else {
            tracing::warn!(correlation_id = %correlation_id, kind = "CampaignDeleted", "event for unknown saga, dropping");
            return Ok(());
        };
        if saga.status.is_terminal() {
            return Ok(());
        }
        if self
            .log
            .has_entry(correlation_id, 3, CampaignDeleted::KIND)
            .await?
        {
            return Ok(());
        }
        if saga.status != SagaStatus::Compensating {
            return Err(CoordinatorError::Premature {
                kind: CampaignDeleted::KIND,
            });
        }

        self.append(correlation_id, 3, CampaignDeleted::KIND, &event)
            .await?;
        {
            let mut sagas = self.sagas.write().await;
            if let Some(saga) = sagas.get_mut(&correlation_id) {
                saga.current_step = 3;
            }
        }
        tracing::info!(correlation_id = %correlation_id, "compensation confirmed");
        self.settle(correlation_id, SagaStatus::Compensated).await
    }

    //
    // ===== Timeouts =====
    //

    fn spawn_step_deadline(&self, correlation_id: CorrelationId, step_index: u32) {
        let Some(service) = self.self_ref.upgrade() else {
            return;
        };
        let timeout = self.config.step_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Err(e) = service.handle_step_deadline(correlation_id, step_index).await {
                tracing::error!(
                    correlation_id = %correlation_id,
                    step_index,
                    error = %e,
                    "step deadline handling failed"
                );
            }
        });
    }

    /// Deadline expiry for a step: log the timeout and fail or compensate.
    ///
    /// Deadlines are advisory; if the step's success or error event arrived
    /// in the meantime, this is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Log`] when the saga log fails.
    pub async fn handle_step_deadline(
        &self,
        correlation_id: CorrelationId,
        step_index: u32,
    ) -> Result<(), CoordinatorError> {
        let _guard = self.locks.lock(correlation_id).await;

        let Some(saga) = self.resolve(correlation_id).await? else {
            return Ok(());
        };
        if saga.status.is_terminal() || saga.status == SagaStatus::Compensating {
            return Ok(());
        }
        let Some(transaction) = self.plan.transaction(step_index).cloned() else {
            return Ok(());
        };

        // The step settled in time, one way or the other.
        if self
            .log
            .has_entry(correlation_id, step_index, transaction.success_kind)
            .await?
            || self
                .log
                .has_entry(correlation_id, step_index, transaction.error_kind)
                .await?
            || self
                .log
                .has_entry(correlation_id, step_index, KIND_STEP_TIMED_OUT)
                .await?
        {
            return Ok(());
        }

        tracing::warn!(
            correlation_id = %correlation_id,
            step_index,
            command = transaction.command_kind,
            "step timed out"
        );
        metrics::counter!("saga.step_timeout").increment(1);

        self.append(
            correlation_id,
            step_index,
            KIND_STEP_TIMED_OUT,
            &serde_json::json!({
                "step_index": step_index,
                "command_kind": transaction.command_kind,
                "timeout_ms": self.config.step_timeout.as_millis() as u64,
            }),
        )
        .await?;
        {
            let mut sagas = self.sagas.write().await;
            if let Some(saga) = sagas.get_mut(&correlation_id) {
                saga.current_step = step_index;
            }
        }

        self.begin_compensation(
            correlation_id,
            step_index,
            format!("compensation for timed out step {step_index}"),
        )
        .await
    }

    //
    // ===== Compensation =====
    //

    async fn begin_compensation(
        &self,
        correlation_id: CorrelationId,
        failed_index: u32,
        reason: String,
    ) -> Result<(), CoordinatorError> {
        // A compensation is issued only if the corresponding forward event
        // was logged for this saga.
        let compensable = match self.plan.compensation_before(failed_index) {
            Some(transaction) => {
                self.log
                    .has_entry(correlation_id, transaction.index, transaction.success_kind)
                    .await?
            },
            None => false,
        };

        if !compensable {
            tracing::info!(
                correlation_id = %correlation_id,
                failed_index,
                "nothing to compensate, failing saga"
            );
            return self.settle(correlation_id, SagaStatus::Failed).await;
        }

        {
            let mut sagas = self.sagas.write().await;
            if let Some(saga) = sagas.get_mut(&correlation_id) {
                saga.status = SagaStatus::Compensating;
            }
        }

        // Compensations are idempotent: if the confirmation was already
        // observed, settle instead of issuing a second command.
        if self
            .log
            .has_entry(correlation_id, 3, CampaignDeleted::KIND)
            .await?
        {
            return self.settle(correlation_id, SagaStatus::Compensated).await;
        }

        self.issue_compensation(correlation_id, reason).await;
        Ok(())
    }

    async fn issue_compensation(&self, correlation_id: CorrelationId, reason: String) {
        let Some(saga) = self.saga(correlation_id).await else {
            return;
        };
        let Some(campaign) = saga.context.campaign.as_ref() else {
            tracing::error!(correlation_id = %correlation_id, "compensation without campaign context");
            return;
        };

        let attempt = saga.compensation_attempts + 1;
        if attempt > self.config.max_compensation_attempts {
            tracing::error!(
                correlation_id = %correlation_id,
                attempts = saga.compensation_attempts,
                "compensation attempts exhausted, operator intervention required"
            );
            metrics::counter!("saga.compensation.exhausted").increment(1);
            return;
        }

        // Claim the attempt in the log before dispatching: the fold recovers
        // the count from these entries, so the bound holds across restarts.
        let kind = format!("{KIND_COMPENSATION_ISSUED}.{attempt}");
        let claim = self
            .append(
                correlation_id,
                3,
                &kind,
                &serde_json::json!({
                    "campaign_id": campaign.campaign_id,
                    "attempt": attempt,
                    "reason": &reason,
                }),
            )
            .await;

        match claim {
            Ok(AppendOutcome::Recorded) => {},
            Ok(AppendOutcome::Duplicate) => {
                // A previous run already claimed and dispatched this attempt.
                tracing::debug!(
                    correlation_id = %correlation_id,
                    attempt,
                    "compensation attempt already claimed"
                );
                let mut sagas = self.sagas.write().await;
                if let Some(saga) = sagas.get_mut(&correlation_id) {
                    saga.compensation_attempts = saga.compensation_attempts.max(attempt);
                }
                drop(sagas);
                self.spawn_compensation_deadline(correlation_id);
                return;
            },
            Err(e) => {
                tracing::error!(
                    correlation_id = %correlation_id,
                    error = %e,
                    "failed to record compensation attempt, deferring to deadline"
                );
                self.spawn_compensation_deadline(correlation_id);
                return;
            },
        }

        {
            let mut sagas = self.sagas.write().await;
            if let Some(saga) = sagas.get_mut(&correlation_id) {
                saga.compensation_attempts = attempt;
            }
        }

        let command = DeleteCampaign {
            campaign_id: campaign.campaign_id,
            influencer_id: Self::influencer_id_for_compensation(&saga.context),
            reason,
        };

        tracing::info!(
            correlation_id = %correlation_id,
            campaign_id = %command.campaign_id,
            attempt,
            "issuing compensation"
        );
        self.send_command(topics::CAMPAIGN_DELETION, &command, correlation_id)
            .await;
        self.spawn_compensation_deadline(correlation_id);
    }

    fn spawn_compensation_deadline(&self, correlation_id: CorrelationId) {
        let Some(service) = self.self_ref.upgrade() else {
            return;
        };
        let timeout = self.config.step_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Err(e) = service.handle_compensation_deadline(correlation_id).await {
                tracing::error!(
                    correlation_id = %correlation_id,
                    error = %e,
                    "compensation deadline handling failed"
                );
            }
        });
    }

    /// Compensation deadline: re-issue up to the bounded attempt count, then
    /// raise an operator alert and leave the saga `Compensating`.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Log`] when the saga log fails.
    pub async fn handle_compensation_deadline(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<(), CoordinatorError> {
        let _guard = self.locks.lock(correlation_id).await;

        let Some(saga) = self.resolve(correlation_id).await? else {
            return Ok(());
        };
        if saga.status != SagaStatus::Compensating {
            return Ok(());
        }
        if self
            .log
            .has_entry(correlation_id, 3, CampaignDeleted::KIND)
            .await?
        {
            return Ok(());
        }

        if saga.compensation_attempts >= self.config.max_compensation_attempts {
            tracing::error!(
                correlation_id = %correlation_id,
                attempts = saga.compensation_attempts,
                "compensation attempts exhausted, operator intervention required"
            );
            metrics::counter!("saga.compensation.exhausted").increment(1);
            return Ok(());
        }

        self.issue_compensation(
            correlation_id,
            "compensation retry after deadline".to_string(),
        )
        .await;
        Ok(())
    }

    //
    // ===== Recovery =====
    //

    /// Fold the log for every open saga and resume it: a crash between
    /// logging a step and dispatching the next command leaves the command
    /// to be re-derived here.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Log`] when the saga log fails.
    pub async fn recover_all(&self) -> Result<usize, CoordinatorError> {
        let open = self.log.open_correlations().await?;
        let count = open.len();
        for correlation_id in open {
            if let Err(e) = self.recover(correlation_id).await {
                tracing::error!(correlation_id = %correlation_id, error = %e, "saga recovery failed");
            }
        }
        if count > 0 {
            tracing::info!(count, "saga recovery pass finished");
        }
        Ok(count)
    }

    /// Recover a single saga from its log.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Log`] when the saga log fails.
    pub async fn recover(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<(), CoordinatorError> {
        let _guard = self.locks.lock(correlation_id).await;

        let Some(saga) = self.resolve(correlation_id).await? else {
            return Ok(());
        };

        match (saga.status, saga.current_step) {
            (SagaStatus::Running, 0) => {
                // Start logged, step-1 command possibly lost: re-derive it.
                let Some(influencer) = saga.context.influencer.clone() else {
                    return Ok(());
                };
                let command = welcome_campaign(
                    saga.campaign_id(),
                    &influencer,
                    &saga.context.categories,
                    self.config.default_commission.clone(),
                    self.clock.now(),
                );
                tracing::info!(correlation_id = %correlation_id, "recovery: re-issuing RegisterCampaign");
                self.send_command(topics::CAMPAIGN_COMMANDS, &command, correlation_id)
                    .await;
                self.spawn_step_deadline(correlation_id, 1);
            },
            (SagaStatus::Running, 1) => {
                let Some(campaign) = saga.context.campaign.clone() else {
                    return Ok(());
                };
                if campaign.origin_influencer.is_some() {
                    let command = Self::contract_command(&saga, &campaign);
                    tracing::info!(correlation_id = %correlation_id, "recovery: re-issuing CreateContract");
                    self.send_command(topics::CONTRACT_COMMANDS, &command, correlation_id)
                        .await;
                    self.spawn_step_deadline(correlation_id, 2);
                } else {
                    self.settle(correlation_id, SagaStatus::Completed).await?;
                }
            },
            (SagaStatus::Compensating, _) => {
                if self
                    .log
                    .has_entry(correlation_id, 3, CampaignDeleted::KIND)
                    .await?
                {
                    self.settle(correlation_id, SagaStatus::Compensated).await?;
                } else {
                    tracing::info!(correlation_id = %correlation_id, "recovery: re-issuing compensation");
                    self.issue_compensation(
                        correlation_id,
                        "compensation re-issued during recovery".to_string(),
                    )
                    .await;
                }
            },
            // Terminal in the fold but the End entry never landed.
            (status, _) if status.is_terminal() => {
                self.settle(correlation_id, status).await?;
            },
            (status, step) => {
                tracing::debug!(
                    correlation_id = %correlation_id,
                    status = status.as_str(),
                    step,
                    "nothing to recover"
                );
            },
        }
        Ok(())
    }

    //
    // ===== Internals =====
    //

    /// Resolve a saga: in-memory first, otherwise fold it from the log.
    async fn resolve(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Option<Saga>, CoordinatorError> {
        if let Some(saga) = self.sagas.read().await.get(&correlation_id) {
            return Ok(Some(saga.clone()));
        }

        let entries = self.log.read_by_correlation(correlation_id).await?;
        if entries.is_empty() {
            return Ok(None);
        }
        let Some(saga) = Saga::from_log(correlation_id, &entries) else {
            return Ok(None);
        };
        self.sagas
            .write()
            .await
            .insert(correlation_id, saga.clone());
        tracing::debug!(correlation_id = %correlation_id, "saga reconstructed from log");
        Ok(Some(saga))
    }

    async fn append<P: Serialize>(
        &self,
        correlation_id: CorrelationId,
        step_index: u32,
        event_kind: &str,
        payload: &P,
    ) -> Result<AppendOutcome, CoordinatorError> {
        let payload = serde_json::to_value(payload)
            .map_err(|e| SagaLogError::Encoding(e.to_string()))?;
        let outcome = self
            .log
            .append(NewSagaLogEntry::new(
                correlation_id,
                step_index,
                event_kind,
                payload,
            ))
            .await?;
        Ok(outcome)
    }

    /// Append the terminal `End` entry and freeze the saga.
    async fn settle(
        &self,
        correlation_id: CorrelationId,
        status: SagaStatus,
    ) -> Result<(), CoordinatorError> {
        let end_index = {
            let sagas = self.sagas.read().await;
            sagas
                .get(&correlation_id)
                .map_or(1, |saga| saga.current_step + 1)
        };

        self.append(
            correlation_id,
            end_index,
            KIND_END,
            &serde_json::json!({
                "status": status.as_str(),
                "ended_at": self.clock.now().to_rfc3339(),
            }),
        )
        .await?;

        {
            let mut sagas = self.sagas.write().await;
            if let Some(saga) = sagas.get_mut(&correlation_id) {
                saga.status = status;
                saga.current_step = end_index;
            }
        }
        self.locks.release_idle();

        metrics::counter!("saga.terminal", "status" => status.as_str()).increment(1);
        tracing::info!(
            correlation_id = %correlation_id,
            status = status.as_str(),
            "saga settled"
        );
        Ok(())
    }

    /// Publish a command envelope; failures are logged and counted, never
    /// bubbled — the log entry is already durable and the deadline/recovery
    /// paths re-derive lost commands.
    async fn send_command<M: Message + Serialize + Sync>(
        &self,
        topic: &str,
        command: &M,
        correlation_id: CorrelationId,
    ) {
        let envelope = match Envelope::enclose(command, correlation_id, SERVICE_NAME, self.clock.now())
        {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(error = %e, kind = M::KIND, "failed to encode command");
                return;
            },
        };

        if let Err(e) = self.dispatcher.dispatch(topic, envelope).await {
            metrics::counter!("saga.dispatch_failed", "topic" => topic.to_string()).increment(1);
            tracing::error!(
                correlation_id = %correlation_id,
                topic = topic,
                error = %e,
                "command dispatch failed, deferring to deadline/recovery"
            );
        }
    }

    fn contract_command(saga: &Saga, campaign: &CampaignCreated) -> CreateContract {
        let influencer = campaign
            .origin_influencer
            .clone()
            .or_else(|| saga.context.influencer.clone())
            .unwrap_or_else(|| InfluencerRef {
                id: String::new(),
                name: String::new(),
                email: String::new(),
            });

        CreateContract {
            contract_id: saga.contract_id(),
            influencer,
            campaign: partnerflow_core::commands::CampaignRef {
                id: campaign.campaign_id,
                name: campaign.name.clone(),
            },
            categories: campaign.target_categories.clone(),
            description: format!("Automatic contract for campaign: {}", campaign.name),
            base_amount: campaign.commission.amount.clone(),
            period: campaign.period.clone(),
            deliverables: "Promotional content per campaign specification".to_string(),
            contract_kind: partnerflow_core::money::ContractKind::OneOff,
        }
    }

    /// Influencer id for a compensation command, falling back to the saga
    /// context when the campaign event did not carry an origin.
    fn influencer_id_for_compensation(context: &SagaContext) -> Option<String> {
        context
            .campaign
            .as_ref()
            .and_then(|c| c.origin_influencer.as_ref())
            .map(|i| i.id.clone())
            .or_else(|| context.influencer.as_ref().map(|i| i.id.clone()))
    }
}

impl Saga {
    /// Minimal placeholder used only when the in-memory map entry vanished
    /// between an append and the command build; ids stay deterministic.
    fn open_placeholder(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            status: SagaStatus::Running,
            current_step: 1,
            context: SagaContext::default(),
            compensation_attempts: 0,
        }
    }
}

/// Stamp a receipt time with the wall clock; consumers use this before
/// handing envelopes to the service.
#[must_use]
pub fn stamp_now(mut envelope: Envelope) -> Envelope {
    envelope.stamp_ingested(Utc::now());
    envelope
}
