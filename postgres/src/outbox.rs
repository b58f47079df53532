//! Transactional outbox for outbound commands.
//!
//! The coordinator appends its saga log entry first and then dispatches the
//! next command. With the direct bus dispatcher a crash between the two
//! loses the command until recovery re-derives it; the outbox closes that
//! window by persisting the command in the same database as the log. A
//! relay drains undispatched rows to the bus in the background.
//!
//! `FOR UPDATE SKIP LOCKED` lets multiple relay instances share the table
//! without double-publishing under normal operation (redelivery after a
//! crash between publish and mark is still possible; consumers are
//! idempotent).

use partnerflow_core::bus::MessageBus;
use partnerflow_core::dispatcher::{CommandDispatcher, DispatchError};
use partnerflow_core::envelope::Envelope;
use partnerflow_core::saga_log::SagaLogError;
use partnerflow_runtime::retry::{RetryPolicy, retry_while};
use partnerflow_runtime::shutdown::ShutdownSignal;
use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// DDL for the outbox table; executed idempotently by
/// [`crate::ensure_schema`].
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS saga_outbox (
    id            BIGSERIAL PRIMARY KEY,
    topic         TEXT        NOT NULL,
    frame         JSONB       NOT NULL,
    created_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
    dispatched_at TIMESTAMPTZ
)
";

/// [`CommandDispatcher`] that persists commands instead of publishing them.
///
/// Pair with an [`OutboxRelay`] to drain the table to the bus.
pub struct PostgresOutbox {
    pool: PgPool,
}

impl PostgresOutbox {
    /// Create an outbox over the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl CommandDispatcher for PostgresOutbox {
    fn dispatch(
        &self,
        topic: &str,
        envelope: Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let frame = serde_json::to_value(&envelope).map_err(|e| DispatchError::Failed {
                topic: topic.clone(),
                reason: format!("frame encoding failed: {e}"),
            })?;

            sqlx::query("INSERT INTO saga_outbox (topic, frame) VALUES ($1, $2)")
                .bind(&topic)
                .bind(&frame)
                .execute(&self.pool)
                .await
                .map_err(|e| DispatchError::Failed {
                    topic: topic.clone(),
                    reason: e.to_string(),
                })?;

            tracing::debug!(
                topic = %topic,
                kind = %envelope.kind,
                correlation_id = %envelope.correlation_id,
                "command enqueued in outbox"
            );
            Ok(())
        })
    }
}

/// Background relay that publishes outbox rows to the bus.
pub struct OutboxRelay {
    pool: PgPool,
    bus: Arc<dyn MessageBus>,
    poll_interval: Duration,
    batch_size: i64,
    retry: RetryPolicy,
}

impl OutboxRelay {
    /// Create a relay with a 250ms poll interval and batches of 64.
    #[must_use]
    pub fn new(pool: PgPool, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            pool,
            bus,
            poll_interval: Duration::from_millis(250),
            batch_size: 64,
            retry: RetryPolicy::default(),
        }
    }

    /// Override the poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Drain the outbox until shutdown is triggered.
    ///
    /// Each pass claims a batch with `FOR UPDATE SKIP LOCKED`, publishes
    /// every claimed row (bounded retry on transient bus errors), and marks
    /// published rows dispatched in the same transaction. A row whose
    /// publish keeps failing stays unclaimed for the next pass.
    pub async fn run(self, mut shutdown: ShutdownSignal) {
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "outbox relay started"
        );

        loop {
            tokio::select! {
                biased;
                () = shutdown.triggered() => break,
                () = tokio::time::sleep(self.poll_interval) => {},
            }

            if let Err(e) = self.drain_once().await {
                tracing::error!(error = %e, "outbox drain pass failed");
            }
        }

        tracing::info!("outbox relay stopped");
    }

    /// Run a single drain pass; returns how many rows were dispatched.
    ///
    /// # Errors
    ///
    /// Returns [`SagaLogError::Store`] if the claim or mark queries fail.
    pub async fn drain_once(&self) -> Result<usize, SagaLogError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SagaLogError::Store(e.to_string()))?;

        let rows = sqlx::query(
            r"
            SELECT id, topic, frame FROM saga_outbox
            WHERE dispatched_at IS NULL
            ORDER BY id ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            ",
        )
        .bind(self.batch_size)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| SagaLogError::Store(e.to_string()))?;

        let mut dispatched_ids: Vec<i64> = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row
                .try_get("id")
                .map_err(|e| SagaLogError::Store(e.to_string()))?;
            let topic: String = row
                .try_get("topic")
                .map_err(|e| SagaLogError::Store(e.to_string()))?;
            let frame: serde_json::Value = row
                .try_get("frame")
                .map_err(|e| SagaLogError::Store(e.to_string()))?;

            let envelope: Envelope = match serde_json::from_value(frame) {
                Ok(envelope) => envelope,
                Err(e) => {
                    // A row that cannot decode will never publish; mark it
                    // dispatched so it stops blocking the queue and alert.
                    tracing::error!(outbox_id = id, error = %e, "undecodable outbox row skipped");
                    metrics::counter!("outbox.undecodable").increment(1);
                    dispatched_ids.push(id);
                    continue;
                },
            };

            let publish = retry_while(
                &self.retry,
                || self.bus.publish(&topic, &envelope),
                partnerflow_core::bus::BusError::is_transient,
            )
            .await;

            match publish {
                Ok(()) => dispatched_ids.push(id),
                Err(e) => {
                    tracing::warn!(
                        outbox_id = id,
                        topic = %topic,
                        error = %e,
                        "outbox publish failed, row stays queued"
                    );
                    // Stop the pass: later rows for the same saga must not
                    // overtake this one.
                    break;
                },
            }
        }

        if !dispatched_ids.is_empty() {
            sqlx::query("UPDATE saga_outbox SET dispatched_at = now() WHERE id = ANY($1)")
                .bind(&dispatched_ids)
                .execute(&mut *tx)
                .await
                .map_err(|e| SagaLogError::Store(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| SagaLogError::Store(e.to_string()))?;

        Ok(dispatched_ids.len())
    }
}
