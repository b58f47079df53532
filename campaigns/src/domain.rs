//! Campaign domain entity and validation.

use chrono::{DateTime, Utc};
use partnerflow_core::commands::{InfluencerRef, RegisterCampaign};
use partnerflow_core::money::{Commission, Money, Period};
use thiserror::Error;
use uuid::Uuid;

/// Why a campaign command failed validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CampaignError {
    /// A required field is empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// The commission amount or currency is invalid.
    #[error("invalid commission: {0}")]
    InvalidCommission(String),
}

/// Lifecycle status of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignStatus {
    /// Created but not yet active.
    Draft,
    /// Active and accepting contracts.
    Active,
    /// Deleted (compensated or retired).
    Deleted,
}

/// A campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Campaign {
    /// Campaign id.
    pub id: Uuid,
    /// Unique campaign name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Commission model and amount.
    pub commission: Commission,
    /// Active period.
    pub period: Period,
    /// Categories the campaign targets.
    pub target_categories: Vec<String>,
    /// Influencer the campaign was created for, when saga-driven.
    pub origin_influencer: Option<InfluencerRef>,
    /// Lifecycle status.
    pub status: CampaignStatus,
    /// When the campaign was applied.
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    /// Build a validated campaign from a registration command.
    ///
    /// # Errors
    ///
    /// Returns [`CampaignError`] when the name is empty or the commission
    /// fails monetary validation. Uniqueness of the name is the store's
    /// call, made inside the insert.
    pub fn create(command: &RegisterCampaign, now: DateTime<Utc>) -> Result<Self, CampaignError> {
        if command.name.trim().is_empty() {
            return Err(CampaignError::MissingField("name"));
        }
        // Re-validate money coming off the wire; decoding bypasses the
        // constructor.
        Money::new(
            command.commission.amount.amount,
            &command.commission.amount.currency,
        )
        .map_err(|e| CampaignError::InvalidCommission(e.to_string()))?;

        Ok(Self {
            id: command.campaign_id,
            name: command.name.clone(),
            description: command.description.clone(),
            commission: command.commission.clone(),
            period: command.period.clone(),
            target_categories: command.target_categories.clone(),
            origin_influencer: command.origin_influencer.clone(),
            status: if command.auto_activate {
                CampaignStatus::Active
            } else {
                CampaignStatus::Draft
            },
            created_at: now,
        })
    }
}
