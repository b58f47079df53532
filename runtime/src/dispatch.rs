//! Direct bus-backed command dispatcher.
//!
//! Publishes outbound commands straight to the bus, retrying transient
//! failures with bounded backoff. This is the default dispatcher; the
//! Postgres outbox in `partnerflow-postgres` is the durable alternative for
//! deployments that need the write-and-publish pair to be atomic.

use crate::retry::{RetryPolicy, retry_while};
use partnerflow_core::bus::MessageBus;
use partnerflow_core::dispatcher::{CommandDispatcher, DispatchError};
use partnerflow_core::envelope::Envelope;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Dispatcher that publishes to the bus with bounded retry on transient
/// errors.
pub struct BusDispatcher {
    bus: Arc<dyn MessageBus>,
    policy: RetryPolicy,
}

impl BusDispatcher {
    /// Build a dispatcher over `bus` with the given retry policy.
    #[must_use]
    pub fn new(bus: Arc<dyn MessageBus>, policy: RetryPolicy) -> Self {
        Self { bus, policy }
    }
}

impl CommandDispatcher for BusDispatcher {
    fn dispatch(
        &self,
        topic: &str,
        envelope: Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            retry_while(
                &self.policy,
                || self.bus.publish(&topic, &envelope),
                partnerflow_core::bus::BusError::is_transient,
            )
            .await
            .map_err(|e| DispatchError::Failed {
                topic: topic.clone(),
                reason: e.to_string(),
            })
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use chrono::Utc;
    use partnerflow_core::bus::{
        BusError, DeliveryHandler, SubscriptionHandle, SubscriptionSpec,
    };
    use partnerflow_core::envelope::{CorrelationId, Message};
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize)]
    struct Probe;

    impl Message for Probe {
        const KIND: &'static str = "Probe";
    }

    /// Bus that fails a configurable number of publishes before accepting.
    struct FlakyBus {
        failures_left: AtomicUsize,
        published: Mutex<Vec<String>>,
        schema_error: bool,
    }

    impl FlakyBus {
        fn new(failures: usize, schema_error: bool) -> Self {
            Self {
                failures_left: AtomicUsize::new(failures),
                published: Mutex::new(Vec::new()),
                schema_error,
            }
        }
    }

    impl MessageBus for FlakyBus {
        fn publish(
            &self,
            topic: &str,
            _envelope: &Envelope,
        ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
            let topic = topic.to_string();
            Box::pin(async move {
                let left = self.failures_left.load(Ordering::SeqCst);
                if left > 0 {
                    self.failures_left.fetch_sub(1, Ordering::SeqCst);
                    if self.schema_error {
                        return Err(BusError::Schema("bad frame".to_string()));
                    }
                    return Err(BusError::Transient("broker busy".to_string()));
                }
                self.published.lock().unwrap().push(topic);
                Ok(())
            })
        }

        fn subscribe(
            &self,
            _spec: SubscriptionSpec,
            _handler: Arc<dyn DeliveryHandler>,
        ) -> Pin<Box<dyn Future<Output = Result<SubscriptionHandle, BusError>> + Send + '_>>
        {
            Box::pin(async {
                Err(BusError::SubscriptionFailed {
                    topic: "unused".to_string(),
                    reason: "not implemented in test double".to_string(),
                })
            })
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(3)
            .initial_delay(Duration::from_millis(1))
            .build()
    }

    fn probe_envelope() -> Envelope {
        Envelope::enclose(&Probe, CorrelationId::new(), "tests", Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let bus = Arc::new(FlakyBus::new(2, false));
        let dispatcher = BusDispatcher::new(Arc::clone(&bus) as Arc<dyn MessageBus>, fast_policy());

        dispatcher
            .dispatch("commands-campaigns", probe_envelope())
            .await
            .unwrap();

        assert_eq!(bus.published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn schema_failures_are_not_retried() {
        let bus = Arc::new(FlakyBus::new(1, true));
        let dispatcher = BusDispatcher::new(Arc::clone(&bus) as Arc<dyn MessageBus>, fast_policy());

        let err = dispatcher
            .dispatch("commands-campaigns", probe_envelope())
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Failed { .. }));
        // One attempt only: schema errors cannot clear on retry.
        assert_eq!(bus.failures_left.load(Ordering::SeqCst), 0);
        assert!(bus.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_error() {
        let bus = Arc::new(FlakyBus::new(10, false));
        let dispatcher = BusDispatcher::new(Arc::clone(&bus) as Arc<dyn MessageBus>, fast_policy());

        let err = dispatcher
            .dispatch("commands-campaigns", probe_envelope())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Failed { .. }));
    }
}
