//! `PostgreSQL` adapters for PartnerFlow.
//!
//! This crate provides the durable side of the orchestrator:
//!
//! - [`saga_log::PostgresSagaLog`]: the append-only saga log with the
//!   `(correlation_id, step_index, event_kind)` uniqueness the coordinator's
//!   idempotency rests on
//! - [`dead_letter::DeadLetterStore`] + [`dead_letter::DeadLetterArchiver`]:
//!   persistent storage for messages that could not be processed, fed by an
//!   archiver that drains the bus adapter's dead-letter channels
//! - [`outbox::PostgresOutbox`] / [`outbox::OutboxRelay`]: a transactional
//!   outbox so "append log entry, then dispatch command" survives a crash
//!   between the two
//!
//! All queries use runtime-checked sqlx; [`ensure_schema`] creates every
//! table idempotently so a fresh database is usable without a migration
//! step.
//!
//! # Example
//!
//! ```ignore
//! use partnerflow_postgres::{ensure_schema, saga_log::PostgresSagaLog};
//!
//! let pool = sqlx::PgPool::connect(&database_url).await?;
//! ensure_schema(&pool).await?;
//! let log = PostgresSagaLog::new(pool.clone());
//! ```

pub mod dead_letter;
pub mod outbox;
pub mod saga_log;

pub use dead_letter::{DeadLetterArchiver, DeadLetterStatus, DeadLetterStore, FailedMessage};
pub use outbox::{OutboxRelay, PostgresOutbox};
pub use saga_log::PostgresSagaLog;

use partnerflow_core::saga_log::SagaLogError;
use sqlx::PgPool;

/// Create every table and index this crate relies on, idempotently.
///
/// # Errors
///
/// Returns [`SagaLogError::Store`] if any DDL statement fails.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), SagaLogError> {
    for statement in [
        saga_log::SCHEMA,
        dead_letter::SCHEMA,
        outbox::SCHEMA,
    ] {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| SagaLogError::Store(e.to_string()))?;
    }
    Ok(())
}
