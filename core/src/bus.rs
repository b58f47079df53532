//! Message bus abstraction.
//!
//! Presents the broker as a small typed API: publish an [`Envelope`] to a
//! topic, or install a shared-subscription consumer whose handler decides the
//! fate of each delivery with an explicit [`Disposition`].
//!
//! # Delivery Semantics
//!
//! At-least-once. Multiple worker instances sharing the same subscription
//! `group` receive disjoint subsets of a topic (load balancing). The adapter
//! acknowledges a delivery only after the handler returns
//! [`Disposition::Ack`]; a crash before that point causes redelivery, so
//! handlers must be idempotent. Per-topic FIFO is whatever the broker
//! preserves and is not relied on by consumers.
//!
//! # Failure Policy
//!
//! - [`BusError::Transient`] on publish: the caller may retry with backoff.
//! - [`BusError::Schema`]: the envelope is undecodable; adapters route it to
//!   a dead-letter channel and increment an alert counter.
//!
//! # Dyn Compatibility
//!
//! This trait uses explicit `Pin<Box<dyn Future>>` returns instead of
//! `async fn` to enable trait object usage (`Arc<dyn MessageBus>`), which the
//! coordinator and workers rely on for dependency injection.

use crate::envelope::Envelope;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Errors that can occur during bus operations.
#[derive(Error, Debug, Clone)]
pub enum BusError {
    /// The operation failed for a reason that may clear on retry.
    #[error("transient bus failure: {0}")]
    Transient(String),

    /// The payload or frame is structurally invalid; retrying cannot help.
    #[error("schema failure: {0}")]
    Schema(String),

    /// Connecting to the broker failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Installing a subscription failed.
    #[error("subscription failed for topic '{topic}': {reason}")]
    SubscriptionFailed {
        /// Topic that failed to subscribe.
        topic: String,
        /// Reason for the failure.
        reason: String,
    },
}

/// What a handler decided about one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processed; commit and move on.
    Ack,
    /// Not processed for a transient reason; redeliver.
    NackRetry,
    /// Not processable; route to dead-letter and move on.
    NackDead,
}

/// A shared-subscription consumer's identity on a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    /// Topic wire name.
    pub topic: String,
    /// Consumer group; instances sharing a group split the topic.
    pub group: String,
}

impl SubscriptionSpec {
    /// Build a subscription spec.
    #[must_use]
    pub fn new(topic: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            group: group.into(),
        }
    }
}

/// Handler invoked once per delivered envelope.
///
/// The handler owns decode, idempotency, and domain application; the adapter
/// owns commits and dead-letter routing based on the returned
/// [`Disposition`].
pub trait DeliveryHandler: Send + Sync {
    /// Process one delivery and decide its fate.
    fn handle(
        &self,
        envelope: Envelope,
    ) -> Pin<Box<dyn Future<Output = Disposition> + Send + '_>>;
}

/// Running subscription; dropping it abandons the consumer task, closing it
/// drains the in-flight handler call first.
pub struct SubscriptionHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    spec: SubscriptionSpec,
}

impl SubscriptionHandle {
    /// Wrap a consumer task with its shutdown signal.
    ///
    /// Adapters construct this; the receiver half of `shutdown` is polled by
    /// the consumer loop between deliveries.
    #[must_use]
    pub const fn new(
        shutdown: watch::Sender<bool>,
        task: JoinHandle<()>,
        spec: SubscriptionSpec,
    ) -> Self {
        Self {
            shutdown,
            task,
            spec,
        }
    }

    /// The subscription this handle controls.
    #[must_use]
    pub const fn spec(&self) -> &SubscriptionSpec {
        &self.spec
    }

    /// Stop accepting deliveries, let the in-flight handler call finish,
    /// then return.
    pub async fn close(self) {
        // Receiver may already be gone if the task exited on its own.
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(
                topic = %self.spec.topic,
                group = %self.spec.group,
                error = %e,
                "consumer task ended abnormally during close"
            );
        }
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

/// Trait for message bus implementations.
///
/// Implementations: the Redpanda adapter for production, the in-memory bus
/// in `partnerflow-testing` for tests.
pub trait MessageBus: Send + Sync {
    /// Publish an envelope to a topic.
    ///
    /// Synchronous from the caller's perspective: resolution means the
    /// broker accepted the message. No ordering guarantee across topics.
    ///
    /// # Errors
    ///
    /// [`BusError::Transient`] when the send may succeed on retry,
    /// [`BusError::Schema`] when the envelope cannot be framed.
    fn publish(
        &self,
        topic: &str,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>>;

    /// Install a shared-subscription consumer.
    ///
    /// Deliveries are passed to `handler` one at a time per consumer;
    /// instances sharing `spec.group` receive disjoint subsets.
    ///
    /// # Errors
    ///
    /// [`BusError::SubscriptionFailed`] when the consumer cannot be
    /// installed.
    fn subscribe(
        &self,
        spec: SubscriptionSpec,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Pin<Box<dyn Future<Output = Result<SubscriptionHandle, BusError>> + Send + '_>>;
}

impl BusError {
    /// Whether retrying the operation could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::ConnectionFailed(_))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(BusError::Transient("timeout".to_string()).is_transient());
        assert!(BusError::ConnectionFailed("refused".to_string()).is_transient());
        assert!(!BusError::Schema("bad frame".to_string()).is_transient());
    }

    #[tokio::test]
    async fn close_drains_consumer_task() {
        let (tx, mut rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            // Simulates a consumer loop waiting for shutdown.
            while !*rx.borrow() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        });
        let handle =
            SubscriptionHandle::new(tx, task, SubscriptionSpec::new("topic", "group"));
        handle.close().await;
    }
}
