//! The saga process instance and its reconstruction from the log.

use partnerflow_core::envelope::CorrelationId;
use partnerflow_core::commands::InfluencerRef;
use partnerflow_core::events::{CampaignCreated, InfluencerRegistered};
use partnerflow_core::saga_log::{
    KIND_COMPENSATION_ISSUED, KIND_END, KIND_START, KIND_STEP_TIMED_OUT, SagaLogEntry,
};
use uuid::Uuid;

/// Status of a saga instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaStatus {
    /// Moving forward through the step plan.
    Running,
    /// Every step completed.
    Completed,
    /// Failed with nothing to compensate.
    Failed,
    /// A step failed; compensation is in flight.
    Compensating,
    /// Compensation confirmed.
    Compensated,
}

impl SagaStatus {
    /// Whether no further transitions are allowed.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Compensated)
    }

    /// Stable name used in log payloads and metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Compensating => "compensating",
            Self::Compensated => "compensated",
        }
    }
}

/// Identifiers captured as events arrive, needed to build later commands and
/// compensations.
#[derive(Debug, Clone, Default)]
pub struct SagaContext {
    /// The influencer that triggered the saga.
    pub influencer: Option<InfluencerRef>,
    /// Categories declared at registration.
    pub categories: Vec<String>,
    /// The campaign created in step 1, as announced.
    pub campaign: Option<CampaignCreated>,
    /// The contract created in step 2.
    pub contract_id: Option<Uuid>,
}

/// A saga process instance.
#[derive(Debug, Clone)]
pub struct Saga {
    /// Identity of this instance; preserved on every message.
    pub correlation_id: CorrelationId,
    /// Current status.
    pub status: SagaStatus,
    /// Highest step index recorded so far.
    pub current_step: u32,
    /// Identifiers for command building and compensation.
    pub context: SagaContext,
    /// Compensation dispatch attempts so far.
    pub compensation_attempts: u32,
}

impl Saga {
    /// A fresh saga opened by its trigger event.
    #[must_use]
    pub fn open(correlation_id: CorrelationId, trigger: &InfluencerRegistered) -> Self {
        Self {
            correlation_id,
            status: SagaStatus::Running,
            current_step: 0,
            context: SagaContext {
                influencer: Some(InfluencerRef {
                    id: trigger.influencer_id.clone(),
                    name: trigger.name.clone(),
                    email: trigger.email.clone(),
                }),
                categories: trigger.categories.clone(),
                campaign: None,
                contract_id: None,
            },
            compensation_attempts: 0,
        }
    }

    /// Rebuild a saga by folding its log entries, oldest first.
    ///
    /// Returns `None` when the log holds no `Start` for this correlation —
    /// there is no saga to reconstruct.
    #[must_use]
    pub fn from_log(correlation_id: CorrelationId, entries: &[SagaLogEntry]) -> Option<Self> {
        let mut saga: Option<Self> = None;

        for entry in entries {
            match entry.event_kind.as_str() {
                KIND_START => {
                    let trigger: InfluencerRegistered =
                        serde_json::from_value(entry.event_payload.clone()).ok()?;
                    saga = Some(Self::open(correlation_id, &trigger));
                },
                "CampaignCreated" => {
                    if let Some(saga) = saga.as_mut() {
                        saga.current_step = entry.step_index;
                        saga.context.campaign =
                            serde_json::from_value(entry.event_payload.clone()).ok();
                    }
                },
                "CampaignRejected" => {
                    if let Some(saga) = saga.as_mut() {
                        saga.current_step = entry.step_index;
                        saga.status = SagaStatus::Failed;
                    }
                },
                "ContractCreated" => {
                    if let Some(saga) = saga.as_mut() {
                        saga.current_step = entry.step_index;
                        saga.status = SagaStatus::Completed;
                        saga.context.contract_id = entry
                            .event_payload
                            .get("contract_id")
                            .and_then(|v| v.as_str())
                            .and_then(|s| Uuid::parse_str(s).ok());
                    }
                },
                "ContractError" | KIND_STEP_TIMED_OUT => {
                    if let Some(saga) = saga.as_mut() {
                        saga.current_step = entry.step_index;
                        // Whether this becomes Compensating or Failed depends
                        // on what was completed before; the service decides
                        // when it re-derives the pending action. Until then
                        // the fold marks the failure conservatively.
                        saga.status = if saga.context.campaign.is_some() {
                            SagaStatus::Compensating
                        } else {
                            SagaStatus::Failed
                        };
                    }
                },
                "CampaignDeleted" => {
                    if let Some(saga) = saga.as_mut() {
                        saga.current_step = entry.step_index;
                        saga.status = SagaStatus::Compensated;
                    }
                },
                KIND_END => {
                    if let Some(saga) = saga.as_mut() {
                        saga.current_step = entry.step_index;
                        if let Some(status) = entry
                            .event_payload
                            .get("status")
                            .and_then(|v| v.as_str())
                        {
                            saga.status = match status {
                                "completed" => SagaStatus::Completed,
                                "failed" => SagaStatus::Failed,
                                "compensated" => SagaStatus::Compensated,
                                _ => saga.status,
                            };
                        }
                    }
                },
                kind if kind.starts_with(KIND_COMPENSATION_ISSUED) => {
                    // Compensation attempts are claimed in the log with the
                    // attempt number as a suffix; the highest suffix is the
                    // durable attempt count.
                    if let Some(saga) = saga.as_mut() {
                        let attempt = kind
                            .rsplit('.')
                            .next()
                            .and_then(|n| n.parse::<u32>().ok())
                            .unwrap_or(0);
                        saga.compensation_attempts = saga.compensation_attempts.max(attempt);
                        saga.status = SagaStatus::Compensating;
                    }
                },
                other => {
                    tracing::debug!(kind = other, "unrecognized saga log kind during fold");
                },
            }
        }

        saga
    }

    /// Deterministic campaign id for a saga.
    ///
    /// Derived from the correlation id, so a re-derived command after a
    /// crash carries the same id and collides with the worker's idempotency
    /// check instead of creating a second campaign.
    #[must_use]
    pub fn campaign_id_for(correlation_id: CorrelationId) -> Uuid {
        Uuid::new_v5(&correlation_id.as_uuid(), b"campaign")
    }

    /// Deterministic contract id for a saga; same rationale as
    /// [`campaign_id_for`](Self::campaign_id_for).
    #[must_use]
    pub fn contract_id_for(correlation_id: CorrelationId) -> Uuid {
        Uuid::new_v5(&correlation_id.as_uuid(), b"contract")
    }

    /// This saga's deterministic campaign id.
    #[must_use]
    pub fn campaign_id(&self) -> Uuid {
        Self::campaign_id_for(self.correlation_id)
    }

    /// This saga's deterministic contract id.
    #[must_use]
    pub fn contract_id(&self) -> Uuid {
        Self::contract_id_for(self.correlation_id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use chrono::Utc;
    use partnerflow_core::money::{Commission, CommissionKind, Money, Period};

    fn trigger() -> InfluencerRegistered {
        InfluencerRegistered {
            influencer_id: "inf-1".to_string(),
            name: "Ana".to_string(),
            email: "ana@x.io".to_string(),
            categories: vec!["moda".to_string()],
            registered_at: Utc::now(),
        }
    }

    fn entry(
        correlation_id: CorrelationId,
        entry_id: i64,
        step_index: u32,
        kind: &str,
        payload: serde_json::Value,
    ) -> SagaLogEntry {
        SagaLogEntry {
            entry_id,
            correlation_id,
            step_index,
            event_kind: kind.to_string(),
            event_payload: payload,
            recorded_at: Utc::now(),
        }
    }

    fn campaign_created() -> CampaignCreated {
        CampaignCreated {
            campaign_id: Uuid::new_v4(),
            name: "Welcome campaign for Ana".to_string(),
            commission: Commission {
                kind: CommissionKind::Cpa,
                amount: Money::new("100".parse().unwrap(), "USD").unwrap(),
            },
            period: Period::open_from(Utc::now()),
            target_categories: vec!["moda".to_string()],
            origin_influencer: None,
        }
    }

    #[test]
    fn derived_ids_are_deterministic() {
        let correlation = CorrelationId::new();
        let a = Saga::open(correlation, &trigger());
        let b = Saga::open(correlation, &trigger());
        assert_eq!(a.campaign_id(), b.campaign_id());
        assert_eq!(a.contract_id(), b.contract_id());
        assert_ne!(a.campaign_id(), a.contract_id());
    }

    #[test]
    fn fold_empty_log_yields_none() {
        assert!(Saga::from_log(CorrelationId::new(), &[]).is_none());
    }

    #[test]
    fn fold_start_only_is_running_at_step_zero() {
        let correlation = CorrelationId::new();
        let entries = [entry(
            correlation,
            1,
            0,
            KIND_START,
            serde_json::to_value(trigger()).unwrap(),
        )];
        let saga = Saga::from_log(correlation, &entries).unwrap();
        assert_eq!(saga.status, SagaStatus::Running);
        assert_eq!(saga.current_step, 0);
        assert_eq!(saga.context.influencer.as_ref().unwrap().id, "inf-1");
    }

    #[test]
    fn fold_through_step_one_keeps_campaign_context() {
        let correlation = CorrelationId::new();
        let created = campaign_created();
        let entries = [
            entry(
                correlation,
                1,
                0,
                KIND_START,
                serde_json::to_value(trigger()).unwrap(),
            ),
            entry(
                correlation,
                2,
                1,
                "CampaignCreated",
                serde_json::to_value(&created).unwrap(),
            ),
        ];
        let saga = Saga::from_log(correlation, &entries).unwrap();
        assert_eq!(saga.status, SagaStatus::Running);
        assert_eq!(saga.current_step, 1);
        assert_eq!(
            saga.context.campaign.as_ref().unwrap().campaign_id,
            created.campaign_id
        );
    }

    #[test]
    fn fold_contract_error_after_campaign_is_compensating() {
        let correlation = CorrelationId::new();
        let entries = [
            entry(
                correlation,
                1,
                0,
                KIND_START,
                serde_json::to_value(trigger()).unwrap(),
            ),
            entry(
                correlation,
                2,
                1,
                "CampaignCreated",
                serde_json::to_value(campaign_created()).unwrap(),
            ),
            entry(
                correlation,
                3,
                2,
                "ContractError",
                serde_json::json!({"error_kind": "duplicate_contract"}),
            ),
        ];
        let saga = Saga::from_log(correlation, &entries).unwrap();
        assert_eq!(saga.status, SagaStatus::Compensating);
    }

    #[test]
    fn fold_restores_compensation_attempts_from_claims() {
        let correlation = CorrelationId::new();
        let entries = [
            entry(
                correlation,
                1,
                0,
                KIND_START,
                serde_json::to_value(trigger()).unwrap(),
            ),
            entry(
                correlation,
                2,
                1,
                "CampaignCreated",
                serde_json::to_value(campaign_created()).unwrap(),
            ),
            entry(
                correlation,
                3,
                2,
                "ContractError",
                serde_json::json!({"error_kind": "infrastructure"}),
            ),
            entry(
                correlation,
                4,
                3,
                "CompensationIssued.1",
                serde_json::json!({"attempt": 1}),
            ),
            entry(
                correlation,
                5,
                3,
                "CompensationIssued.2",
                serde_json::json!({"attempt": 2}),
            ),
        ];
        let saga = Saga::from_log(correlation, &entries).unwrap();
        assert_eq!(saga.status, SagaStatus::Compensating);
        assert_eq!(saga.compensation_attempts, 2);
        // The confirmation step is still pending.
        assert_eq!(saga.current_step, 2);
    }

    #[test]
    fn fold_end_entry_pins_terminal_status() {
        let correlation = CorrelationId::new();
        let entries = [
            entry(
                correlation,
                1,
                0,
                KIND_START,
                serde_json::to_value(trigger()).unwrap(),
            ),
            entry(
                correlation,
                2,
                1,
                "CampaignRejected",
                serde_json::json!({"reason": "duplicate name"}),
            ),
            entry(
                correlation,
                3,
                2,
                KIND_END,
                serde_json::json!({"status": "failed"}),
            ),
        ];
        let saga = Saga::from_log(correlation, &entries).unwrap();
        assert_eq!(saga.status, SagaStatus::Failed);
        assert!(saga.status.is_terminal());
    }
}
