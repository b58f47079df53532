//! Saga coordinator: the orchestration state machine.
//!
//! The coordinator drives one saga per correlation id through the step plan
//! `Start → RegisterCampaign → CreateContract → End`, reacting to events on
//! the bus, recording every transition in the saga log **before** dispatching
//! the next command, and compensating completed steps when a later step
//! fails.
//!
//! # Concurrency
//!
//! Sagas are serialized per correlation id with a keyed mutex; unrelated
//! sagas run fully in parallel. The coordinator never mints correlation ids —
//! it only consumes the ones stamped at admission.
//!
//! # Recovery
//!
//! The log is the source of truth. On startup (or on an event for a saga not
//! in memory) the coordinator folds the log back into a [`saga::Saga`] and
//! re-derives whatever command is still pending. Derived entity ids are
//! deterministic in the correlation id, so a re-derived command collides
//! with its earlier delivery in the worker's idempotency check instead of
//! creating a second entity.

pub mod consumers;
pub mod plan;
pub mod saga;
pub mod service;

pub use plan::{StepPlan, Transaction};
pub use saga::{Saga, SagaContext, SagaStatus};
pub use service::{CoordinatorConfig, CoordinatorService};

/// Logical service name stamped on outbound envelopes.
pub const SERVICE_NAME: &str = "coordinator";

/// Consumer group shared by the coordinator's subscriptions.
pub const CONSUMER_GROUP: &str = "saga-coordinator";
