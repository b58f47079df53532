//! Contracts service worker.
//!
//! Consumes `CreateContract` commands, enforcing one active contract per
//! `(influencer, campaign)` pair, and announces `ContractCreated` on the
//! event topic or `ContractError` on the error topic. A contract error is
//! the signal that sends the saga into compensation.

pub mod domain;
pub mod store;
pub mod worker;

pub use domain::{Contract, ContractValidationError};
pub use store::{ContractStore, InMemoryContractStore};
pub use worker::ContractWorker;

/// Logical service name stamped on outbound envelopes.
pub const SERVICE_NAME: &str = "contracts";

/// Consumer group for the command subscription.
pub const COMMAND_GROUP: &str = "contracts-service";
