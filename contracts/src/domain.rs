//! Contract domain entity and validation.

use chrono::{DateTime, Utc};
use partnerflow_core::commands::{CampaignRef, CreateContract, InfluencerRef};
use partnerflow_core::money::{ContractKind, Money, Period};
use thiserror::Error;
use uuid::Uuid;

/// Why a contract command failed validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractValidationError {
    /// A required field is empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// The base amount or currency is invalid.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}

/// A contract between an influencer and a campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contract {
    /// Contract id.
    pub id: Uuid,
    /// Contracting influencer.
    pub influencer: InfluencerRef,
    /// Campaign the contract belongs to.
    pub campaign: CampaignRef,
    /// Content categories covered.
    pub categories: Vec<String>,
    /// Description.
    pub description: String,
    /// Base amount before adjustments.
    pub base_amount: Money,
    /// Total contract amount.
    pub total_amount: Money,
    /// Contract period.
    pub period: Period,
    /// Agreed deliverables.
    pub deliverables: String,
    /// Engagement model.
    pub kind: ContractKind,
    /// When the contract was applied.
    pub created_at: DateTime<Utc>,
}

impl Contract {
    /// Build a validated contract from a creation command.
    ///
    /// The total amount equals the base amount; adjustments are a pricing
    /// concern outside this service.
    ///
    /// # Errors
    ///
    /// Returns [`ContractValidationError`] when a required field is empty or
    /// the base amount fails monetary validation. Uniqueness of the
    /// `(influencer, campaign)` pair is the store's call, made inside the
    /// insert.
    pub fn create(
        command: &CreateContract,
        now: DateTime<Utc>,
    ) -> Result<Self, ContractValidationError> {
        if command.influencer.id.trim().is_empty() {
            return Err(ContractValidationError::MissingField("influencer.id"));
        }
        if command.deliverables.trim().is_empty() {
            return Err(ContractValidationError::MissingField("deliverables"));
        }
        let base_amount = Money::new(
            command.base_amount.amount,
            &command.base_amount.currency,
        )
        .map_err(|e| ContractValidationError::InvalidAmount(e.to_string()))?;

        Ok(Self {
            id: command.contract_id,
            influencer: command.influencer.clone(),
            campaign: command.campaign.clone(),
            categories: command.categories.clone(),
            description: command.description.clone(),
            total_amount: base_amount.clone(),
            base_amount,
            period: command.period.clone(),
            deliverables: command.deliverables.clone(),
            kind: command.contract_kind,
            created_at: now,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn command() -> CreateContract {
        CreateContract {
            contract_id: Uuid::new_v4(),
            influencer: InfluencerRef {
                id: "inf-1".to_string(),
                name: "Ana".to_string(),
                email: "ana@x.io".to_string(),
            },
            campaign: CampaignRef {
                id: Uuid::new_v4(),
                name: "Spring".to_string(),
            },
            categories: vec!["moda".to_string()],
            description: "auto".to_string(),
            base_amount: Money::new("100".parse().unwrap(), "USD").unwrap(),
            period: Period::open_from(Utc::now()),
            deliverables: "promotional content".to_string(),
            contract_kind: ContractKind::OneOff,
        }
    }

    #[test]
    fn total_equals_base() {
        let contract = Contract::create(&command(), Utc::now()).unwrap();
        assert_eq!(contract.total_amount, contract.base_amount);
    }

    #[test]
    fn rejects_empty_deliverables() {
        let mut cmd = command();
        cmd.deliverables = String::new();
        assert_eq!(
            Contract::create(&cmd, Utc::now()).unwrap_err(),
            ContractValidationError::MissingField("deliverables")
        );
    }
}
