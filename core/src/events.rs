//! Event catalog: facts the services announce on the bus.
//!
//! Events are the saga's eyes: the coordinator drives its state machine
//! exclusively from these. Each event carries the `correlation_id` of the
//! command it resulted from (on the envelope), so the coordinator can
//! resolve the saga it belongs to.

use crate::envelope::Message;
use crate::money::{Commission, ContractKind, Money, Period};
use crate::commands::InfluencerRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An influencer was registered (saga trigger event).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfluencerRegistered {
    /// External influencer id.
    pub influencer_id: String,
    /// Display name.
    pub name: String,
    /// Contact email.
    pub email: String,
    /// Content categories.
    pub categories: Vec<String>,
    /// When the registration was persisted.
    pub registered_at: DateTime<Utc>,
}

impl Message for InfluencerRegistered {
    const KIND: &'static str = "InfluencerRegistered";
}

/// A campaign was created (step 1 success).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignCreated {
    /// Campaign id.
    pub campaign_id: Uuid,
    /// Campaign name.
    pub name: String,
    /// Commission model and amount.
    pub commission: Commission,
    /// Active period.
    pub period: Period,
    /// Categories the campaign targets.
    pub target_categories: Vec<String>,
    /// Influencer the campaign was created for, when saga-driven.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_influencer: Option<InfluencerRef>,
}

impl Message for CampaignCreated {
    const KIND: &'static str = "CampaignCreated";
}

/// A campaign command was rejected by a business rule (step 1 failure).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignRejected {
    /// Campaign id from the rejected command.
    pub campaign_id: Uuid,
    /// Name that collided or failed validation.
    pub name: String,
    /// Human-readable rejection reason.
    pub reason: String,
}

impl Message for CampaignRejected {
    const KIND: &'static str = "CampaignRejected";
}

/// A campaign was deleted (compensation confirmation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignDeleted {
    /// Deleted campaign id.
    pub campaign_id: Uuid,
    /// Originating influencer, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub influencer_id: Option<String>,
    /// Why the deletion happened.
    pub reason: String,
    /// When the deletion was applied.
    pub deleted_at: DateTime<Utc>,
}

impl Message for CampaignDeleted {
    const KIND: &'static str = "CampaignDeleted";
}

/// A contract was created (step 2 success, saga completion).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCreated {
    /// Contract id.
    pub contract_id: Uuid,
    /// Contracting influencer id.
    pub influencer_id: String,
    /// Campaign the contract belongs to.
    pub campaign_id: Uuid,
    /// Total contract amount.
    pub total_amount: Money,
    /// Engagement model.
    pub contract_kind: ContractKind,
    /// When the contract was persisted.
    pub created_at: DateTime<Utc>,
}

impl Message for ContractCreated {
    const KIND: &'static str = "ContractCreated";
}

/// Classification of a contract creation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractErrorKind {
    /// An active contract already exists for this influencer and campaign.
    DuplicateContract,
    /// The command failed domain validation.
    Validation,
    /// The service could not apply the command for infrastructure reasons.
    Infrastructure,
}

/// Contract creation failed (step 2 failure; triggers compensation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractError {
    /// Contract id from the failed command.
    pub contract_id: Uuid,
    /// Contracting influencer id.
    pub influencer_id: String,
    /// Campaign the contract would have belonged to.
    pub campaign_id: Uuid,
    /// Failure classification.
    pub error_kind: ContractErrorKind,
    /// Human-readable failure detail.
    pub error_detail: String,
}

impl Message for ContractError {
    const KIND: &'static str = "ContractError";
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::envelope::{CorrelationId, Envelope};

    #[test]
    fn contract_error_kind_wire_names() {
        let json = serde_json::to_string(&ContractErrorKind::DuplicateContract).unwrap();
        assert_eq!(json, "\"duplicate_contract\"");
    }

    #[test]
    fn campaign_created_without_origin_omits_field() {
        let event = CampaignCreated {
            campaign_id: Uuid::new_v4(),
            name: "n".to_string(),
            commission: Commission {
                kind: crate::money::CommissionKind::Cpa,
                amount: Money::new("1".parse().unwrap(), "USD").unwrap(),
            },
            period: Period::open_from(Utc::now()),
            target_categories: vec![],
            origin_influencer: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("origin_influencer").is_none());
    }

    #[test]
    fn event_envelope_preserves_correlation() {
        let correlation = CorrelationId::new();
        let event = InfluencerRegistered {
            influencer_id: "inf-1".to_string(),
            name: "Ana".to_string(),
            email: "ana@x.io".to_string(),
            categories: vec!["moda".to_string()],
            registered_at: Utc::now(),
        };
        let envelope = Envelope::enclose(&event, correlation, "influencers", Utc::now()).unwrap();
        assert_eq!(envelope.correlation_id, correlation);
        assert_eq!(envelope.kind, "InfluencerRegistered");
    }
}
