//! Influencers service worker.
//!
//! Consumes `CreateInfluencer` commands from the admission topic, applies
//! them idempotently to the local store, and announces successful
//! registrations on the influencer event topic — the event that triggers a
//! saga.

pub mod domain;
pub mod store;
pub mod worker;

pub use domain::{Influencer, RegistrationError};
pub use store::{InMemoryInfluencerStore, InfluencerStore};
pub use worker::InfluencerWorker;

/// Logical service name stamped on outbound envelopes.
pub const SERVICE_NAME: &str = "influencers";

/// Consumer group for the command subscription.
pub const COMMAND_GROUP: &str = "influencers-service";
