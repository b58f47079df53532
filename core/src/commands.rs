//! Command catalog: requests for a service to change state.
//!
//! Commands travel on the command topics in [`crate::topics`]. Every command
//! carries the identifiers its handler needs to apply the change
//! idempotently; the envelope supplies `message_id` and `correlation_id`.

use crate::envelope::Message;
use crate::money::{Commission, ContractKind, Money, Period};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reference to an influencer carried inside campaign and contract messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfluencerRef {
    /// Influencer id as supplied at admission.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Contact email.
    pub email: String,
}

/// Reference to a campaign carried inside contract messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignRef {
    /// Campaign id.
    pub id: Uuid,
    /// Campaign name.
    pub name: String,
}

/// Audience share for one segment, as a percentage of the whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudienceShare {
    /// Segment label (e.g. an age band or country).
    pub segment: String,
    /// Share in `[0, 100]`.
    pub percent: Decimal,
}

/// Social platform presence declared for an influencer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformProfile {
    /// Platform name (e.g. `"instagram"`).
    pub platform: String,
    /// Account handle on the platform.
    pub handle: String,
    /// Follower count.
    pub followers: u64,
    /// Engagement rate percentage in `[0, 100]`.
    pub engagement_rate: Decimal,
    /// Audience distribution; must sum to 100 ±1 when present.
    #[serde(default)]
    pub audience: Vec<AudienceShare>,
}

/// Register a new influencer (the saga trigger command, minted by the BFF).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInfluencer {
    /// External influencer id supplied by the caller.
    pub influencer_id: String,
    /// Display name.
    pub name: String,
    /// Contact email.
    pub email: String,
    /// Content categories.
    pub categories: Vec<String>,
    /// Declared platform presences.
    #[serde(default)]
    pub platforms: Vec<PlatformProfile>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Longer biography.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub biography: Option<String>,
    /// Personal or agency website.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    /// Contact phone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl Message for CreateInfluencer {
    const KIND: &'static str = "CreateInfluencer";
}

/// Create a campaign (step 1 forward command, built by the coordinator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterCampaign {
    /// Campaign id, minted by the coordinator.
    pub campaign_id: Uuid,
    /// Campaign name; unique per the campaigns service.
    pub name: String,
    /// Campaign description.
    pub description: String,
    /// Commission model and amount.
    pub commission: Commission,
    /// Active period.
    pub period: Period,
    /// Categories the campaign targets.
    pub target_categories: Vec<String>,
    /// Influencer this campaign was created for, when saga-driven.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_influencer: Option<InfluencerRef>,
    /// Whether the campaign activates immediately on creation.
    pub auto_activate: bool,
}

impl Message for RegisterCampaign {
    const KIND: &'static str = "RegisterCampaign";
}

/// Delete a campaign (compensation command).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteCampaign {
    /// Campaign to delete.
    pub campaign_id: Uuid,
    /// Originating influencer, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub influencer_id: Option<String>,
    /// Why the deletion was requested.
    pub reason: String,
}

impl Message for DeleteCampaign {
    const KIND: &'static str = "DeleteCampaign";
}

/// Create a contract (step 2 forward command, built by the coordinator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateContract {
    /// Contract id, minted by the coordinator.
    pub contract_id: Uuid,
    /// Contracting influencer.
    pub influencer: InfluencerRef,
    /// Campaign the contract belongs to.
    pub campaign: CampaignRef,
    /// Content categories covered.
    pub categories: Vec<String>,
    /// Contract description.
    pub description: String,
    /// Base amount before adjustments.
    pub base_amount: Money,
    /// Contract period.
    pub period: Period,
    /// Agreed deliverables.
    pub deliverables: String,
    /// Engagement model.
    pub contract_kind: ContractKind,
}

impl Message for CreateContract {
    const KIND: &'static str = "CreateContract";
}

/// Name given to the campaign the coordinator derives from a newly
/// registered influencer.
#[must_use]
pub fn welcome_campaign_name(influencer_name: &str) -> String {
    format!("Welcome campaign for {influencer_name}")
}

/// Build the step-1 forward command from influencer context, the way the
/// coordinator derives campaigns for fresh registrations.
#[must_use]
pub fn welcome_campaign(
    campaign_id: Uuid,
    influencer: &InfluencerRef,
    categories: &[String],
    commission: Commission,
    start: DateTime<Utc>,
) -> RegisterCampaign {
    RegisterCampaign {
        campaign_id,
        name: welcome_campaign_name(&influencer.name),
        description: format!("Automatic campaign created for influencer {}", influencer.name),
        commission,
        period: Period::open_from(start),
        target_categories: categories.to_vec(),
        origin_influencer: Some(influencer.clone()),
        auto_activate: true,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::money::CommissionKind;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn create_influencer_optional_fields_default() {
        let json = serde_json::json!({
            "influencer_id": "inf-1",
            "name": "Ana",
            "email": "ana@x.io",
            "categories": ["moda", "lifestyle"]
        });
        let cmd: CreateInfluencer = serde_json::from_value(json).unwrap();
        assert!(cmd.platforms.is_empty());
        assert!(cmd.description.is_none());
    }

    #[test]
    fn welcome_campaign_carries_origin() {
        let influencer = InfluencerRef {
            id: "inf-1".to_string(),
            name: "Ana".to_string(),
            email: "ana@x.io".to_string(),
        };
        let commission = Commission {
            kind: CommissionKind::Cpa,
            amount: Money::new(d("100.0"), "USD").unwrap(),
        };
        let cmd = welcome_campaign(
            Uuid::new_v4(),
            &influencer,
            &["moda".to_string()],
            commission,
            Utc::now(),
        );

        assert_eq!(cmd.origin_influencer.as_ref().unwrap().id, "inf-1");
        assert!(cmd.auto_activate);
        assert!(cmd.period.end.is_none());
        assert_eq!(cmd.target_categories, vec!["moda".to_string()]);
    }

    #[test]
    fn register_campaign_wire_roundtrip() {
        let cmd = RegisterCampaign {
            campaign_id: Uuid::new_v4(),
            name: "Spring push".to_string(),
            description: "Seasonal".to_string(),
            commission: Commission {
                kind: CommissionKind::Cpc,
                amount: Money::new(d("0.25"), "USD").unwrap(),
            },
            period: Period::open_from(Utc::now()),
            target_categories: vec!["moda".to_string()],
            origin_influencer: None,
            auto_activate: false,
        };

        let json = serde_json::to_value(&cmd).unwrap();
        // Absent optionals are omitted from the wire entirely.
        assert!(json.get("origin_influencer").is_none());
        let back: RegisterCampaign = serde_json::from_value(json).unwrap();
        assert_eq!(back, cmd);
    }
}
