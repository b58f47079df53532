//! Dead-letter store for messages that could not be processed.
//!
//! Provides persistent storage and management of messages that failed
//! decoding or exhausted their redeliveries. Enables observability, incident
//! response, and manual reprocessing workflows.

use chrono::{DateTime, Utc};
use partnerflow_core::bus::{
    BusError, DeliveryHandler, Disposition, MessageBus, SubscriptionHandle, SubscriptionSpec,
};
use partnerflow_core::envelope::Envelope;
use partnerflow_core::saga_log::SagaLogError;
use partnerflow_core::topics::dead_letter_topic;
use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

/// DDL for the dead-letter table; executed idempotently by
/// [`crate::ensure_schema`].
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS failed_messages (
    id               BIGSERIAL PRIMARY KEY,
    topic            TEXT        NOT NULL,
    kind             TEXT,
    correlation_id   UUID,
    frame            JSONB,
    raw_payload      BYTEA,
    error_message    TEXT        NOT NULL,
    retry_count      INTEGER     NOT NULL DEFAULT 0,
    first_failed_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
    last_failed_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
    status           TEXT        NOT NULL DEFAULT 'pending',
    resolved_at      TIMESTAMPTZ,
    resolution_notes TEXT
)
";

/// Status of a failed message in the dead-letter store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterStatus {
    /// Message is pending investigation or reprocessing.
    Pending,
    /// Message is currently being reprocessed.
    Processing,
    /// Message was successfully reprocessed.
    Resolved,
    /// Message was permanently discarded.
    Discarded,
}

impl DeadLetterStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse status from its database string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string does not name a known status.
    pub fn parse(s: &str) -> Result<Self, SagaLogError> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(SagaLogError::Store(format!(
                "invalid dead letter status: {s}"
            ))),
        }
    }
}

/// An entry in the dead-letter store.
#[derive(Debug, Clone)]
pub struct FailedMessage {
    /// Unique identifier for this entry.
    pub id: i64,
    /// Topic the message arrived on.
    pub topic: String,
    /// Message kind, when the frame was decodable enough to tell.
    pub kind: Option<String>,
    /// Correlation id, when the frame was decodable enough to tell.
    pub correlation_id: Option<Uuid>,
    /// The envelope frame, when it parsed as JSON.
    pub frame: Option<serde_json::Value>,
    /// Error message from the failure.
    pub error_message: String,
    /// Number of times processing was retried before giving up.
    pub retry_count: i32,
    /// When this message first failed.
    pub first_failed_at: DateTime<Utc>,
    /// When this message most recently failed.
    pub last_failed_at: DateTime<Utc>,
    /// Current processing status.
    pub status: DeadLetterStatus,
}

/// Postgres-backed dead-letter store.
pub struct DeadLetterStore {
    pool: PgPool,
}

impl DeadLetterStore {
    /// Create a store over the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a failed message.
    ///
    /// Undecodable raw bytes go into `raw_payload`; frames that parsed as
    /// JSON go into `frame` with their kind and correlation id extracted for
    /// queries.
    ///
    /// # Errors
    ///
    /// Returns [`SagaLogError::Store`] if the insert fails.
    pub async fn add_entry(
        &self,
        topic: &str,
        raw_payload: &[u8],
        error_message: &str,
        retry_count: i32,
    ) -> Result<i64, SagaLogError> {
        let frame: Option<serde_json::Value> = serde_json::from_slice(raw_payload).ok();
        let kind = frame
            .as_ref()
            .and_then(|f| f.get("kind"))
            .and_then(|k| k.as_str())
            .map(ToString::to_string);
        let correlation_id = frame
            .as_ref()
            .and_then(|f| f.get("correlation_id"))
            .and_then(|c| c.as_str())
            .and_then(|c| Uuid::parse_str(c).ok());

        let id: (i64,) = sqlx::query_as(
            r"
            INSERT INTO failed_messages (
                topic, kind, correlation_id, frame, raw_payload, error_message, retry_count
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            ",
        )
        .bind(topic)
        .bind(&kind)
        .bind(correlation_id)
        .bind(&frame)
        .bind(raw_payload)
        .bind(error_message)
        .bind(retry_count)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| SagaLogError::Store(e.to_string()))?;

        tracing::warn!(
            dead_letter_id = id.0,
            topic = topic,
            kind = kind.as_deref().unwrap_or("?"),
            error = error_message,
            retry_count,
            "message added to dead letter store"
        );

        metrics::counter!("dead_letter.stored", "topic" => topic.to_string()).increment(1);

        Ok(id.0)
    }

    /// List pending failed messages, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`SagaLogError::Store`] if the query fails.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<FailedMessage>, SagaLogError> {
        self.list_by_status(DeadLetterStatus::Pending, limit).await
    }

    /// List failed messages by status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`SagaLogError::Store`] if the query fails.
    #[allow(clippy::cast_possible_wrap)] // Limits are small.
    pub async fn list_by_status(
        &self,
        status: DeadLetterStatus,
        limit: usize,
    ) -> Result<Vec<FailedMessage>, SagaLogError> {
        let rows = sqlx::query(
            r"
            SELECT id, topic, kind, correlation_id, frame, error_message,
                   retry_count, first_failed_at, last_failed_at, status
            FROM failed_messages
            WHERE status = $1
            ORDER BY first_failed_at ASC
            LIMIT $2
            ",
        )
        .bind(status.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SagaLogError::Store(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let status_str: String = row
                    .try_get("status")
                    .map_err(|e| SagaLogError::Store(e.to_string()))?;
                Ok(FailedMessage {
                    id: row
                        .try_get("id")
                        .map_err(|e| SagaLogError::Store(e.to_string()))?,
                    topic: row
                        .try_get("topic")
                        .map_err(|e| SagaLogError::Store(e.to_string()))?,
                    kind: row
                        .try_get("kind")
                        .map_err(|e| SagaLogError::Store(e.to_string()))?,
                    correlation_id: row
                        .try_get("correlation_id")
                        .map_err(|e| SagaLogError::Store(e.to_string()))?,
                    frame: row
                        .try_get("frame")
                        .map_err(|e| SagaLogError::Store(e.to_string()))?,
                    error_message: row
                        .try_get("error_message")
                        .map_err(|e| SagaLogError::Store(e.to_string()))?,
                    retry_count: row
                        .try_get("retry_count")
                        .map_err(|e| SagaLogError::Store(e.to_string()))?,
                    first_failed_at: row
                        .try_get("first_failed_at")
                        .map_err(|e| SagaLogError::Store(e.to_string()))?,
                    last_failed_at: row
                        .try_get("last_failed_at")
                        .map_err(|e| SagaLogError::Store(e.to_string()))?,
                    status: DeadLetterStatus::parse(&status_str)?,
                })
            })
            .collect()
    }

    /// Update the status of an entry, stamping `resolved_at` for terminal
    /// statuses.
    ///
    /// # Errors
    ///
    /// Returns [`SagaLogError::Store`] if the update fails.
    pub async fn update_status(
        &self,
        id: i64,
        status: DeadLetterStatus,
        notes: Option<&str>,
    ) -> Result<(), SagaLogError> {
        let resolved = matches!(
            status,
            DeadLetterStatus::Resolved | DeadLetterStatus::Discarded
        );
        sqlx::query(
            r"
            UPDATE failed_messages
            SET status = $2,
                resolution_notes = COALESCE($3, resolution_notes),
                resolved_at = CASE WHEN $4 THEN now() ELSE resolved_at END
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(notes)
        .bind(resolved)
        .execute(&self.pool)
        .await
        .map_err(|e| SagaLogError::Store(e.to_string()))?;
        Ok(())
    }
}

/// Consumer that drains dead-letter channels into the store.
///
/// The bus adapter sidelines unprocessable messages onto each topic's
/// `-dlq` channel; this archiver subscribes to those channels with a shared
/// group (replicas split the work) and persists every delivery as a pending
/// [`FailedMessage`], so incidents are inspectable from the database rather
/// than by spelunking broker offsets.
pub struct DeadLetterArchiver {
    store: Arc<DeadLetterStore>,
    source_topic: String,
}

impl DeadLetterArchiver {
    /// Consumer group shared by archiver instances.
    pub const GROUP: &'static str = "dead-letter-archiver";

    /// Install one archiver subscription per source topic's dead-letter
    /// channel.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] when a consumer cannot be
    /// installed; handles created before the failure are dropped, which
    /// closes their consumers.
    pub async fn subscribe_sources(
        bus: &Arc<dyn MessageBus>,
        store: Arc<DeadLetterStore>,
        source_topics: &[&str],
    ) -> Result<Vec<SubscriptionHandle>, BusError> {
        let mut handles = Vec::with_capacity(source_topics.len());
        for topic in source_topics {
            let handler = Arc::new(Self {
                store: Arc::clone(&store),
                source_topic: (*topic).to_string(),
            });
            handles.push(
                bus.subscribe(
                    SubscriptionSpec::new(dead_letter_topic(topic), Self::GROUP),
                    handler,
                )
                .await?,
            );
        }
        tracing::info!(channels = source_topics.len(), "dead-letter archiver installed");
        Ok(handles)
    }
}

impl DeliveryHandler for DeadLetterArchiver {
    fn handle(
        &self,
        envelope: Envelope,
    ) -> Pin<Box<dyn Future<Output = Disposition> + Send + '_>> {
        Box::pin(async move {
            let frame = match envelope.to_bytes() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!(error = %e, "dead-lettered frame failed to re-encode");
                    return Disposition::Ack;
                },
            };

            match self
                .store
                .add_entry(
                    &self.source_topic,
                    &frame,
                    "sidelined after failed processing",
                    0,
                )
                .await
            {
                Ok(_) => Disposition::Ack,
                Err(e) => {
                    tracing::warn!(error = %e, "dead-letter store unavailable, requesting redelivery");
                    Disposition::NackRetry
                },
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn status_string_roundtrip() {
        for status in [
            DeadLetterStatus::Pending,
            DeadLetterStatus::Processing,
            DeadLetterStatus::Resolved,
            DeadLetterStatus::Discarded,
        ] {
            assert_eq!(DeadLetterStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(DeadLetterStatus::parse("bogus").is_err());
    }
}
