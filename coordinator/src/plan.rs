//! The saga step plan.
//!
//! Each transaction declares the forward command it issues, the success and
//! error events it expects, and the compensation that undoes it once a
//! *later* step fails. The plan is built once at startup and immutable
//! afterwards; handlers route against it with plain matches.

use partnerflow_core::commands::{CreateContract, DeleteCampaign, RegisterCampaign};
use partnerflow_core::envelope::Message;
use partnerflow_core::events::{
    CampaignCreated, CampaignRejected, ContractCreated, ContractError,
};
use partnerflow_core::topics;

/// One forward step of the saga.
#[derive(Debug, Clone)]
pub struct Transaction {
    /// Position in the plan (Start is 0).
    pub index: u32,
    /// Kind of the forward command this step issues.
    pub command_kind: &'static str,
    /// Topic the forward command is published to.
    pub command_topic: &'static str,
    /// Event kind that completes the step.
    pub success_kind: &'static str,
    /// Event kind that fails the step.
    pub error_kind: &'static str,
    /// Compensation command kind, when this step can be undone.
    pub compensation_kind: Option<&'static str>,
    /// Topic the compensation command is published to.
    pub compensation_topic: Option<&'static str>,
}

/// The ordered step plan.
#[derive(Debug, Clone)]
pub struct StepPlan {
    transactions: Vec<Transaction>,
}

impl StepPlan {
    /// The production plan: campaign then contract.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            transactions: vec![
                Transaction {
                    index: 1,
                    command_kind: RegisterCampaign::KIND,
                    command_topic: topics::CAMPAIGN_COMMANDS,
                    success_kind: CampaignCreated::KIND,
                    error_kind: CampaignRejected::KIND,
                    compensation_kind: Some(DeleteCampaign::KIND),
                    compensation_topic: Some(topics::CAMPAIGN_DELETION),
                },
                Transaction {
                    index: 2,
                    command_kind: CreateContract::KIND,
                    command_topic: topics::CONTRACT_COMMANDS,
                    success_kind: ContractCreated::KIND,
                    error_kind: ContractError::KIND,
                    compensation_kind: None,
                    compensation_topic: None,
                },
            ],
        }
    }

    /// The transaction at a step index, if any.
    #[must_use]
    pub fn transaction(&self, index: u32) -> Option<&Transaction> {
        self.transactions.iter().find(|t| t.index == index)
    }

    /// The transactions in order.
    #[must_use]
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// The last completed step (< `failed_index`) that declares a
    /// compensation — what must be undone when `failed_index` fails.
    #[must_use]
    pub fn compensation_before(&self, failed_index: u32) -> Option<&Transaction> {
        self.transactions
            .iter()
            .rev()
            .find(|t| t.index < failed_index && t.compensation_kind.is_some())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn standard_plan_shape() {
        let plan = StepPlan::standard();
        assert_eq!(plan.transactions().len(), 2);

        let campaign = plan.transaction(1).unwrap();
        assert_eq!(campaign.command_kind, "RegisterCampaign");
        assert_eq!(campaign.success_kind, "CampaignCreated");
        assert!(campaign.compensation_kind.is_some());

        let contract = plan.transaction(2).unwrap();
        assert_eq!(contract.success_kind, "ContractCreated");
        assert!(contract.compensation_kind.is_none());
    }

    #[test]
    fn step_two_failure_compensates_step_one() {
        let plan = StepPlan::standard();
        let compensation = plan.compensation_before(2).unwrap();
        assert_eq!(compensation.index, 1);
        assert_eq!(compensation.compensation_kind, Some("DeleteCampaign"));
    }

    #[test]
    fn step_one_failure_has_nothing_to_compensate() {
        let plan = StepPlan::standard();
        assert!(plan.compensation_before(1).is_none());
    }
}
