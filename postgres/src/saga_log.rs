//! Postgres saga log store.
//!
//! One row per observed step per saga. The unique index on
//! `(correlation_id, step_index, event_kind)` makes duplicate appends a
//! no-op (`ON CONFLICT DO NOTHING`), which is exactly the idempotency
//! contract of [`SagaLogStore`]. Appends are single-row inserts, so they are
//! linearizable per correlation without any table-level locking.

use chrono::{DateTime, Utc};
use partnerflow_core::envelope::CorrelationId;
use partnerflow_core::saga_log::{
    AppendOutcome, KIND_END, KIND_START, NewSagaLogEntry, SagaLogEntry, SagaLogError,
    SagaLogStore,
};
use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

/// DDL for the saga log table; executed idempotently by
/// [`crate::ensure_schema`].
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS saga_logs (
    entry_id        BIGSERIAL PRIMARY KEY,
    correlation_id  UUID        NOT NULL,
    step_index      INTEGER     NOT NULL,
    event_kind      TEXT        NOT NULL,
    event_payload   JSONB       NOT NULL,
    recorded_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (correlation_id, step_index, event_kind)
)
";

/// Postgres-backed [`SagaLogStore`].
pub struct PostgresSagaLog {
    pool: PgPool,
}

impl PostgresSagaLog {
    /// Create a store over the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<SagaLogEntry, SagaLogError> {
    let correlation: Uuid = row
        .try_get("correlation_id")
        .map_err(|e| SagaLogError::Store(e.to_string()))?;
    let step_index: i32 = row
        .try_get("step_index")
        .map_err(|e| SagaLogError::Store(e.to_string()))?;
    let recorded_at: DateTime<Utc> = row
        .try_get("recorded_at")
        .map_err(|e| SagaLogError::Store(e.to_string()))?;

    Ok(SagaLogEntry {
        entry_id: row
            .try_get("entry_id")
            .map_err(|e| SagaLogError::Store(e.to_string()))?,
        correlation_id: CorrelationId::from_uuid(correlation),
        step_index: step_index.try_into().unwrap_or(0),
        event_kind: row
            .try_get("event_kind")
            .map_err(|e| SagaLogError::Store(e.to_string()))?,
        event_payload: row
            .try_get("event_payload")
            .map_err(|e| SagaLogError::Store(e.to_string()))?,
        recorded_at,
    })
}

impl SagaLogStore for PostgresSagaLog {
    fn append(
        &self,
        entry: NewSagaLogEntry,
    ) -> Pin<Box<dyn Future<Output = Result<AppendOutcome, SagaLogError>> + Send + '_>> {
        Box::pin(async move {
            let step_index: i32 = entry
                .step_index
                .try_into()
                .map_err(|_| SagaLogError::Encoding("step index out of range".to_string()))?;

            let result = sqlx::query(
                r"
                INSERT INTO saga_logs (correlation_id, step_index, event_kind, event_payload)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (correlation_id, step_index, event_kind) DO NOTHING
                ",
            )
            .bind(entry.correlation_id.as_uuid())
            .bind(step_index)
            .bind(&entry.event_kind)
            .bind(&entry.event_payload)
            .execute(&self.pool)
            .await
            .map_err(|e| SagaLogError::Store(e.to_string()))?;

            if result.rows_affected() == 0 {
                tracing::debug!(
                    correlation_id = %entry.correlation_id,
                    step_index = entry.step_index,
                    event_kind = %entry.event_kind,
                    "duplicate saga log entry dropped"
                );
                Ok(AppendOutcome::Duplicate)
            } else {
                Ok(AppendOutcome::Recorded)
            }
        })
    }

    fn read_by_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SagaLogEntry>, SagaLogError>> + Send + '_>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT entry_id, correlation_id, step_index, event_kind, event_payload, recorded_at
                FROM saga_logs
                WHERE correlation_id = $1
                ORDER BY step_index ASC, entry_id ASC
                ",
            )
            .bind(correlation_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SagaLogError::Store(e.to_string()))?;

            rows.iter().map(row_to_entry).collect()
        })
    }

    fn has_entry(
        &self,
        correlation_id: CorrelationId,
        step_index: u32,
        event_kind: &str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, SagaLogError>> + Send + '_>> {
        let event_kind = event_kind.to_string();
        Box::pin(async move {
            let step_index: i32 = step_index
                .try_into()
                .map_err(|_| SagaLogError::Encoding("step index out of range".to_string()))?;

            let row = sqlx::query(
                r"
                SELECT 1 AS present FROM saga_logs
                WHERE correlation_id = $1 AND step_index = $2 AND event_kind = $3
                ",
            )
            .bind(correlation_id.as_uuid())
            .bind(step_index)
            .bind(&event_kind)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SagaLogError::Store(e.to_string()))?;

            Ok(row.is_some())
        })
    }

    fn open_correlations(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<CorrelationId>, SagaLogError>> + Send + '_>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT DISTINCT correlation_id
                FROM saga_logs started
                WHERE event_kind = $1
                  AND NOT EXISTS (
                      SELECT 1 FROM saga_logs ended
                      WHERE ended.correlation_id = started.correlation_id
                        AND ended.event_kind = $2
                  )
                ",
            )
            .bind(KIND_START)
            .bind(KIND_END)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SagaLogError::Store(e.to_string()))?;

            rows.iter()
                .map(|row| {
                    row.try_get::<Uuid, _>("correlation_id")
                        .map(CorrelationId::from_uuid)
                        .map_err(|e| SagaLogError::Store(e.to_string()))
                })
                .collect()
        })
    }
}
