//! Saga log: the durable, append-only record of every step a saga takes.
//!
//! One row per observed step per saga, keyed by correlation id. The triple
//! `(correlation_id, step_index, event_kind)` is unique; a second append of
//! the same triple is silently dropped and reported as
//! [`AppendOutcome::Duplicate`] — this is the substrate the coordinator's
//! idempotency rests on.
//!
//! Appends are linearizable per correlation id; readers see all appends
//! committed before their call. Entries are never deleted by the core.

use crate::envelope::CorrelationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from saga log operations.
#[derive(Error, Debug)]
pub enum SagaLogError {
    /// The underlying store failed.
    #[error("saga log store failure: {0}")]
    Store(String),

    /// The entry payload could not be serialized.
    #[error("saga log payload encoding failed: {0}")]
    Encoding(String),
}

/// A recorded saga step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaLogEntry {
    /// Store-assigned unique entry id.
    pub entry_id: i64,
    /// Saga this entry belongs to.
    pub correlation_id: CorrelationId,
    /// Position in the step plan.
    pub step_index: u32,
    /// What was observed (e.g. `"Start"`, `"CampaignCreated"`).
    pub event_kind: String,
    /// Opaque payload captured with the observation.
    pub event_payload: serde_json::Value,
    /// When the entry was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// An entry about to be appended; the store assigns `entry_id` and
/// `recorded_at`.
#[derive(Debug, Clone)]
pub struct NewSagaLogEntry {
    /// Saga this entry belongs to.
    pub correlation_id: CorrelationId,
    /// Position in the step plan.
    pub step_index: u32,
    /// What was observed.
    pub event_kind: String,
    /// Opaque payload captured with the observation.
    pub event_payload: serde_json::Value,
}

impl NewSagaLogEntry {
    /// Build an entry.
    #[must_use]
    pub fn new(
        correlation_id: CorrelationId,
        step_index: u32,
        event_kind: impl Into<String>,
        event_payload: serde_json::Value,
    ) -> Self {
        Self {
            correlation_id,
            step_index,
            event_kind: event_kind.into(),
            event_payload,
        }
    }
}

/// What happened to an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The entry was recorded.
    Recorded,
    /// An entry with the same `(correlation_id, step_index, event_kind)`
    /// already existed; nothing was written.
    Duplicate,
}

/// Port trait for saga log stores.
///
/// Implementations: Postgres (`partnerflow-postgres`), in-memory
/// (`partnerflow-testing`).
pub trait SagaLogStore: Send + Sync {
    /// Append an entry; duplicate triples are dropped, not errors.
    ///
    /// Callers append **before** dispatching the outbound command the entry
    /// justifies, so crash-and-restart can replay from the log.
    ///
    /// # Errors
    ///
    /// [`SagaLogError::Store`] when the underlying store fails.
    fn append(
        &self,
        entry: NewSagaLogEntry,
    ) -> Pin<Box<dyn Future<Output = Result<AppendOutcome, SagaLogError>> + Send + '_>>;

    /// All entries for one saga, ordered by step index then record time.
    ///
    /// # Errors
    ///
    /// [`SagaLogError::Store`] when the underlying store fails.
    fn read_by_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SagaLogEntry>, SagaLogError>> + Send + '_>>;

    /// Whether a `(correlation_id, step_index, event_kind)` triple exists.
    ///
    /// # Errors
    ///
    /// [`SagaLogError::Store`] when the underlying store fails.
    fn has_entry(
        &self,
        correlation_id: CorrelationId,
        step_index: u32,
        event_kind: &str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, SagaLogError>> + Send + '_>>;

    /// Correlations with a `Start` entry but no `End` entry — the sagas a
    /// restarted coordinator must recover.
    ///
    /// # Errors
    ///
    /// [`SagaLogError::Store`] when the underlying store fails.
    fn open_correlations(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<CorrelationId>, SagaLogError>> + Send + '_>>;
}

/// Entry kind recorded when a saga opens.
pub const KIND_START: &str = "Start";
/// Entry kind recorded when a saga reaches a terminal status.
pub const KIND_END: &str = "End";
/// Entry kind recorded when a step's soft deadline expires.
pub const KIND_STEP_TIMED_OUT: &str = "StepTimedOut";
/// Entry kind prefix recorded when a compensation command is issued.
///
/// Each issuance carries its attempt number as a suffix
/// (`CompensationIssued.1`, `CompensationIssued.2`, …) so the bounded
/// attempt count survives a coordinator restart: the triple uniqueness makes
/// each attempt claimable exactly once, and the fold recovers the count from
/// the highest suffix.
pub const KIND_COMPENSATION_ISSUED: &str = "CompensationIssued";
