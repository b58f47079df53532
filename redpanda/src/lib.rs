//! Redpanda message bus adapter for PartnerFlow.
//!
//! Implements the [`MessageBus`] port from `partnerflow-core` over rdkafka.
//! Any Kafka-compatible broker works (Redpanda, Apache Kafka, managed
//! equivalents); the orchestrator only relies on consumer groups and
//! per-partition ordering.
//!
//! # Delivery Semantics
//!
//! **At-least-once** with manual offset commits:
//! - An offset is committed only after the handler returns a final
//!   disposition for the delivery.
//! - A crash before commit causes redelivery; every consumer in the system
//!   is idempotent (saga log triples, message-id dedup, natural keys).
//! - Envelopes are keyed by `correlation_id`, so all messages of one saga
//!   land on one partition and arrive in publish order.
//!
//! # Failure Routing
//!
//! - Undecodable frames go to `<topic>-dlq` and increment
//!   `bus.dead_letter`; they are never retried.
//! - `NackRetry` redelivers inline with doubling backoff up to a bounded
//!   count, then dead-letters.
//! - `NackDead` dead-letters immediately.
//!
//! # Example
//!
//! ```no_run
//! use partnerflow_redpanda::RedpandaMessageBus;
//! use partnerflow_core::bus::MessageBus;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaMessageBus::builder()
//!     .brokers("localhost:9092")
//!     .producer_acks("all")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use chrono::Utc;
use futures::StreamExt;
use partnerflow_core::bus::{
    BusError, DeliveryHandler, Disposition, MessageBus, SubscriptionHandle, SubscriptionSpec,
};
use partnerflow_core::envelope::Envelope;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use partnerflow_core::topics::{dead_letter_topic, is_dead_letter_topic};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Bounded in-place redeliveries before a `NackRetry` stream dead-letters.
const MAX_REDELIVERIES: u32 = 5;

/// Redpanda-backed [`MessageBus`] implementation.
///
/// Holds one producer; each subscription creates its own consumer inside a
/// dedicated task. Construction is via [`RedpandaMessageBus::builder`].
pub struct RedpandaMessageBus {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    auto_offset_reset: String,
}

impl std::fmt::Debug for RedpandaMessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaMessageBus")
            .field("brokers", &self.brokers)
            .field("timeout", &self.timeout)
            .field("auto_offset_reset", &self.auto_offset_reset)
            .finish_non_exhaustive()
    }
}

impl RedpandaMessageBus {
    /// Create a bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if the producer cannot be
    /// created.
    pub fn new(brokers: &str) -> Result<Self, BusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the bus.
    #[must_use]
    pub fn builder() -> RedpandaMessageBusBuilder {
        RedpandaMessageBusBuilder::default()
    }

    /// Broker addresses this bus connects to.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for [`RedpandaMessageBus`].
#[derive(Default)]
pub struct RedpandaMessageBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    auto_offset_reset: Option<String>,
}

impl RedpandaMessageBusBuilder {
    /// Set the broker addresses (comma-separated `host:port`).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: `"0"`, `"1"`, or `"all"`.
    ///
    /// Default: `"1"`.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"`,
    /// `"zstd"`.
    ///
    /// Default: `"none"`.
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout. Default: 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set where new consumer groups start reading: `"earliest"` or
    /// `"latest"`.
    ///
    /// Default: `"earliest"` — a freshly deployed worker must not skip
    /// commands published before it came up.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaMessageBus`].
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if brokers are unset or the
    /// producer cannot be created.
    pub fn build(self) -> Result<RedpandaMessageBus, BusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BusError::ConnectionFailed("brokers not configured".to_string()))?;

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", self.producer_acks.as_deref().unwrap_or("1"))
            .set(
                "compression.type",
                self.compression.as_deref().unwrap_or("none"),
            );

        let producer: FutureProducer = producer_config
            .create()
            .map_err(|e| BusError::ConnectionFailed(format!("failed to create producer: {e}")))?;

        tracing::info!(
            brokers = %brokers,
            acks = self.producer_acks.as_deref().unwrap_or("1"),
            "Redpanda message bus created"
        );

        Ok(RedpandaMessageBus {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "earliest".to_string()),
        })
    }
}

/// Publish raw bytes to a topic's dead-letter channel and count the arrival.
///
/// A message already on a dead-letter channel (an archiver consumer failed
/// it) is only counted, never forwarded again — no `-dlq-dlq` cascade.
async fn dead_letter(
    producer: &FutureProducer,
    topic: &str,
    key: &[u8],
    payload: &[u8],
    reason: &str,
) {
    metrics::counter!("bus.dead_letter", "topic" => topic.to_string()).increment(1);

    if is_dead_letter_topic(topic) {
        tracing::error!(topic = %topic, reason = %reason, "dead-letter channel message dropped");
        return;
    }

    let dlq_topic = dead_letter_topic(topic);
    tracing::error!(topic = %topic, dlq = %dlq_topic, reason = %reason, "routing message to dead letter");

    let record = FutureRecord::to(&dlq_topic).payload(payload).key(key);
    if let Err((e, _)) = producer
        .send(record, Timeout::After(Duration::from_secs(5)))
        .await
    {
        // The message stays committed on the source topic; operators recover
        // it from the broker by offset.
        tracing::error!(dlq = %dlq_topic, error = %e, "failed to publish to dead letter channel");
    }
}

impl MessageBus for RedpandaMessageBus {
    fn publish(
        &self,
        topic: &str,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        let topic = topic.to_string();
        let envelope = envelope.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let payload = envelope
                .to_bytes()
                .map_err(|e| BusError::Schema(e.to_string()))?;

            // Key by correlation id: all messages of one saga share a
            // partition, preserving their relative order.
            let key = envelope.correlation_id.as_uuid();
            let record = FutureRecord::to(&topic)
                .payload(&payload)
                .key(key.as_bytes());

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition,
                        offset,
                        kind = %envelope.kind,
                        correlation_id = %envelope.correlation_id,
                        "message published"
                    );
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::error!(topic = %topic, error = %kafka_error, "publish failed");
                    Err(BusError::Transient(kafka_error.to_string()))
                },
            }
        })
    }

    #[allow(clippy::too_many_lines)] // At-least-once consume loop with manual commits.
    fn subscribe(
        &self,
        spec: SubscriptionSpec,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Pin<Box<dyn Future<Output = Result<SubscriptionHandle, BusError>> + Send + '_>> {
        let brokers = self.brokers.clone();
        let auto_offset_reset = self.auto_offset_reset.clone();
        let producer = self.producer.clone();

        Box::pin(async move {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &spec.group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| BusError::SubscriptionFailed {
                    topic: spec.topic.clone(),
                    reason: format!("failed to create consumer: {e}"),
                })?;

            consumer
                .subscribe(&[spec.topic.as_str()])
                .map_err(|e| BusError::SubscriptionFailed {
                    topic: spec.topic.clone(),
                    reason: format!("failed to subscribe: {e}"),
                })?;

            tracing::info!(
                topic = %spec.topic,
                group = %spec.group,
                manual_commit = true,
                "subscribed"
            );

            let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
            let topic = spec.topic.clone();

            let task = tokio::spawn(async move {
                let mut stream = consumer.stream();

                loop {
                    let msg_result = tokio::select! {
                        biased;
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                break;
                            }
                            continue;
                        }
                        next = stream.next() => match next {
                            Some(result) => result,
                            None => break,
                        },
                    };

                    let message = match msg_result {
                        Ok(message) => message,
                        Err(e) => {
                            tracing::error!(topic = %topic, error = %e, "receive failed");
                            continue;
                        },
                    };

                    let Some(payload) = message.payload() else {
                        dead_letter(&producer, &topic, message.key().unwrap_or(&[]), &[], "empty payload")
                            .await;
                        if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                            tracing::warn!(error = %e, "commit after dead letter failed");
                        }
                        continue;
                    };

                    let mut envelope = match Envelope::from_bytes(payload) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            dead_letter(
                                &producer,
                                &topic,
                                message.key().unwrap_or(&[]),
                                payload,
                                &e.to_string(),
                            )
                            .await;
                            if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                                tracing::warn!(error = %e, "commit after dead letter failed");
                            }
                            continue;
                        },
                    };
                    envelope.stamp_ingested(Utc::now());

                    // In-place bounded redelivery for transient handler
                    // failures; the offset stays uncommitted meanwhile, so a
                    // crash here still redelivers.
                    let mut backoff = Duration::from_millis(100);
                    let mut attempt: u32 = 0;
                    loop {
                        match handler.handle(envelope.clone()).await {
                            Disposition::Ack => break,
                            Disposition::NackDead => {
                                dead_letter(
                                    &producer,
                                    &topic,
                                    message.key().unwrap_or(&[]),
                                    payload,
                                    "handler rejected delivery",
                                )
                                .await;
                                break;
                            },
                            Disposition::NackRetry => {
                                attempt += 1;
                                if attempt > MAX_REDELIVERIES {
                                    dead_letter(
                                        &producer,
                                        &topic,
                                        message.key().unwrap_or(&[]),
                                        payload,
                                        "redeliveries exhausted",
                                    )
                                    .await;
                                    break;
                                }
                                tracing::debug!(
                                    topic = %topic,
                                    attempt,
                                    kind = %envelope.kind,
                                    "redelivering after transient handler failure"
                                );
                                tokio::time::sleep(backoff).await;
                                backoff = (backoff * 2).min(Duration::from_secs(10));
                            },
                        }
                    }

                    // Commit only after a final disposition: at-least-once.
                    if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                        tracing::warn!(
                            topic = %topic,
                            offset = message.offset(),
                            error = %e,
                            "offset commit failed, message may be redelivered"
                        );
                    }
                }

                tracing::debug!(topic = %topic, "consumer task exiting");
            });

            Ok(SubscriptionHandle::new(shutdown_tx, task, spec))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaMessageBus>();
        assert_sync::<RedpandaMessageBus>();
    }

    #[test]
    fn builder_requires_brokers() {
        let err = RedpandaMessageBus::builder().build().unwrap_err();
        assert!(matches!(err, BusError::ConnectionFailed(_)));
    }

    #[test]
    fn builder_default_offset_reset_is_earliest() {
        // Workers must not skip commands published before they started.
        let bus = RedpandaMessageBus::builder()
            .brokers("localhost:9092")
            .build()
            .unwrap();
        assert_eq!(bus.auto_offset_reset, "earliest");
    }
}
