//! Campaigns service worker.
//!
//! Consumes `RegisterCampaign` commands, enforcing the unique-name business
//! rule, and announces `CampaignCreated` or `CampaignRejected`. Also listens
//! on the compensation channel for `DeleteCampaign` requests and confirms
//! them with `CampaignDeleted`.

pub mod domain;
pub mod store;
pub mod worker;

pub use domain::{Campaign, CampaignError, CampaignStatus};
pub use store::{CampaignStore, InMemoryCampaignStore};
pub use worker::CampaignWorker;

/// Logical service name stamped on outbound envelopes.
pub const SERVICE_NAME: &str = "campaigns";

/// Consumer group for the command subscription.
pub const COMMAND_GROUP: &str = "campaigns-service";

/// Consumer group for the compensation channel subscription.
pub const DELETION_GROUP: &str = "campaigns-deletion";
