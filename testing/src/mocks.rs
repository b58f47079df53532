//! In-memory doubles for the bus, the saga log, the clock, and the
//! dispatcher.

use chrono::{DateTime, Utc};
use partnerflow_core::bus::{
    BusError, DeliveryHandler, Disposition, MessageBus, SubscriptionHandle, SubscriptionSpec,
};
use partnerflow_core::clock::Clock;
use partnerflow_core::dispatcher::{CommandDispatcher, DispatchError};
use partnerflow_core::envelope::{CorrelationId, Envelope};
use partnerflow_core::saga_log::{
    AppendOutcome, KIND_END, KIND_START, NewSagaLogEntry, SagaLogEntry, SagaLogError,
    SagaLogStore,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, mpsc, watch};

/// Fixed clock for deterministic tests.
///
/// Always returns the same time, making tests reproducible.
#[derive(Debug, Clone)]
pub struct FixedClock {
    time: DateTime<Utc>,
}

impl FixedClock {
    /// Create a new fixed clock with the given time.
    #[must_use]
    pub const fn new(time: DateTime<Utc>) -> Self {
        Self { time }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.time
    }
}

/// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC).
///
/// # Panics
///
/// Panics if the hardcoded timestamp fails to parse, which should never
/// happen in practice.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_clock() -> FixedClock {
    FixedClock::new(
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc),
    )
}

struct GroupState {
    consumers: Vec<mpsc::UnboundedSender<Envelope>>,
    next: usize,
}

#[derive(Default)]
struct TopicState {
    groups: HashMap<String, GroupState>,
}

/// In-memory message bus with shared-subscription semantics.
///
/// - Consumers in the same group split a topic's deliveries (round robin);
///   distinct groups each see every message.
/// - `NackRetry` redelivers up to a bounded count, then dead-letters.
/// - `NackDead` dead-letters immediately.
/// - [`quiesce`](Self::quiesce) waits until every published message has been
///   fully handled — the test-side substitute for wall-clock waiting.
pub struct InMemoryMessageBus {
    topics: Mutex<HashMap<String, TopicState>>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    dead_letters: Arc<Mutex<Vec<(String, Envelope)>>>,
    max_redeliveries: usize,
}

impl InMemoryMessageBus {
    /// Create a bus with the default redelivery bound (5).
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_redeliveries(5)
    }

    /// Create a bus with a custom redelivery bound.
    #[must_use]
    pub fn with_max_redeliveries(max_redeliveries: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            pending: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
            dead_letters: Arc::new(Mutex::new(Vec::new())),
            max_redeliveries,
        }
    }

    /// Envelopes that were dead-lettered, with the topic they arrived on.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn dead_letters(&self) -> Vec<(String, Envelope)> {
        self.dead_letters
            .lock()
            .expect("dead letter mutex poisoned")
            .clone()
    }

    /// Wait until all published messages have been handled to completion.
    pub async fn quiesce(&self) {
        loop {
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            let notified = self.idle.notified();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Default for InMemoryMessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for InMemoryMessageBus {
    #[allow(clippy::expect_used)]
    fn publish(
        &self,
        topic: &str,
        envelope: &Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        let topic = topic.to_string();
        let envelope = envelope.clone();
        Box::pin(async move {
            let mut topics = self.topics.lock().expect("topic mutex poisoned");
            let Some(state) = topics.get_mut(&topic) else {
                // No subscriber yet; a real broker would retain the message,
                // tests subscribe before publishing.
                tracing::debug!(topic = %topic, "publish with no subscribers, dropping");
                return Ok(());
            };

            for group in state.groups.values_mut() {
                if group.consumers.is_empty() {
                    continue;
                }
                // Round-robin across a group's consumers: shared subscription.
                let index = group.next % group.consumers.len();
                group.next = group.next.wrapping_add(1);
                self.pending.fetch_add(1, Ordering::SeqCst);
                if group.consumers[index].send(envelope.clone()).is_err() {
                    self.pending.fetch_sub(1, Ordering::SeqCst);
                }
            }
            Ok(())
        })
    }

    #[allow(clippy::expect_used)]
    fn subscribe(
        &self,
        spec: SubscriptionSpec,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Pin<Box<dyn Future<Output = Result<SubscriptionHandle, BusError>> + Send + '_>> {
        Box::pin(async move {
            let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
            {
                let mut topics = self.topics.lock().expect("topic mutex poisoned");
                let state = topics.entry(spec.topic.clone()).or_default();
                let group = state
                    .groups
                    .entry(spec.group.clone())
                    .or_insert_with(|| GroupState {
                        consumers: Vec::new(),
                        next: 0,
                    });
                group.consumers.push(tx);
            }

            let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
            let pending = Arc::clone(&self.pending);
            let idle = Arc::clone(&self.idle);
            let dead_letters = Arc::clone(&self.dead_letters);
            let max_redeliveries = self.max_redeliveries;
            let topic = spec.topic.clone();

            let task = tokio::spawn(async move {
                loop {
                    let envelope = tokio::select! {
                        biased;
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                break;
                            }
                            continue;
                        }
                        received = rx.recv() => match received {
                            Some(envelope) => envelope,
                            None => break,
                        },
                    };

                    let mut deliveries = 0;
                    loop {
                        deliveries += 1;
                        match handler.handle(envelope.clone()).await {
                            Disposition::Ack => break,
                            Disposition::NackDead => {
                                dead_letters
                                    .lock()
                                    .expect("dead letter mutex poisoned")
                                    .push((topic.clone(), envelope.clone()));
                                break;
                            },
                            Disposition::NackRetry => {
                                if deliveries > max_redeliveries {
                                    dead_letters
                                        .lock()
                                        .expect("dead letter mutex poisoned")
                                        .push((topic.clone(), envelope.clone()));
                                    break;
                                }
                                tokio::task::yield_now().await;
                            },
                        }
                    }

                    if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                        idle.notify_waiters();
                    }
                }
            });

            Ok(SubscriptionHandle::new(shutdown_tx, task, spec))
        })
    }
}

/// In-memory saga log with the store's uniqueness semantics.
pub struct InMemorySagaLog {
    entries: Mutex<Vec<SagaLogEntry>>,
    next_id: AtomicI64,
}

impl InMemorySagaLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Snapshot of every entry, across all correlations.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn all_entries(&self) -> Vec<SagaLogEntry> {
        self.entries.lock().expect("saga log mutex poisoned").clone()
    }
}

impl Default for InMemorySagaLog {
    fn default() -> Self {
        Self::new()
    }
}

impl SagaLogStore for InMemorySagaLog {
    #[allow(clippy::expect_used)]
    fn append(
        &self,
        entry: NewSagaLogEntry,
    ) -> Pin<Box<dyn Future<Output = Result<AppendOutcome, SagaLogError>> + Send + '_>> {
        Box::pin(async move {
            let mut entries = self.entries.lock().expect("saga log mutex poisoned");
            let duplicate = entries.iter().any(|existing| {
                existing.correlation_id == entry.correlation_id
                    && existing.step_index == entry.step_index
                    && existing.event_kind == entry.event_kind
            });
            if duplicate {
                return Ok(AppendOutcome::Duplicate);
            }
            entries.push(SagaLogEntry {
                entry_id: self.next_id.fetch_add(1, Ordering::SeqCst),
                correlation_id: entry.correlation_id,
                step_index: entry.step_index,
                event_kind: entry.event_kind,
                event_payload: entry.event_payload,
                recorded_at: Utc::now(),
            });
            Ok(AppendOutcome::Recorded)
        })
    }

    #[allow(clippy::expect_used)]
    fn read_by_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SagaLogEntry>, SagaLogError>> + Send + '_>> {
        Box::pin(async move {
            let entries = self.entries.lock().expect("saga log mutex poisoned");
            let mut matched: Vec<SagaLogEntry> = entries
                .iter()
                .filter(|e| e.correlation_id == correlation_id)
                .cloned()
                .collect();
            matched.sort_by_key(|e| (e.step_index, e.entry_id));
            Ok(matched)
        })
    }

    #[allow(clippy::expect_used)]
    fn has_entry(
        &self,
        correlation_id: CorrelationId,
        step_index: u32,
        event_kind: &str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, SagaLogError>> + Send + '_>> {
        let event_kind = event_kind.to_string();
        Box::pin(async move {
            let entries = self.entries.lock().expect("saga log mutex poisoned");
            Ok(entries.iter().any(|e| {
                e.correlation_id == correlation_id
                    && e.step_index == step_index
                    && e.event_kind == event_kind
            }))
        })
    }

    #[allow(clippy::expect_used)]
    fn open_correlations(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<CorrelationId>, SagaLogError>> + Send + '_>> {
        Box::pin(async move {
            let entries = self.entries.lock().expect("saga log mutex poisoned");
            let mut open = Vec::new();
            for entry in entries.iter() {
                if entry.event_kind == KIND_START
                    && !entries.iter().any(|e| {
                        e.correlation_id == entry.correlation_id && e.event_kind == KIND_END
                    })
                    && !open.contains(&entry.correlation_id)
                {
                    open.push(entry.correlation_id);
                }
            }
            Ok(open)
        })
    }
}

/// Dispatcher double that records every dispatched command.
pub struct CapturingDispatcher {
    dispatched: Mutex<Vec<(String, Envelope)>>,
}

impl CapturingDispatcher {
    /// Create an empty capture.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dispatched: Mutex::new(Vec::new()),
        }
    }

    /// Everything dispatched so far, in order.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn dispatched(&self) -> Vec<(String, Envelope)> {
        self.dispatched
            .lock()
            .expect("capture mutex poisoned")
            .clone()
    }
}

impl Default for CapturingDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandDispatcher for CapturingDispatcher {
    #[allow(clippy::expect_used)]
    fn dispatch(
        &self,
        topic: &str,
        envelope: Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            self.dispatched
                .lock()
                .expect("capture mutex poisoned")
                .push((topic, envelope));
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use partnerflow_core::envelope::Message;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Probe {
        n: u32,
    }

    impl Message for Probe {
        const KIND: &'static str = "Probe";
    }

    struct CountingHandler {
        seen: Arc<AtomicUsize>,
        disposition: Disposition,
    }

    impl DeliveryHandler for CountingHandler {
        fn handle(
            &self,
            _envelope: Envelope,
        ) -> Pin<Box<dyn Future<Output = Disposition> + Send + '_>> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            let disposition = self.disposition;
            Box::pin(async move { disposition })
        }
    }

    fn probe_envelope(n: u32) -> Envelope {
        Envelope::enclose(&Probe { n }, CorrelationId::new(), "tests", Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn same_group_splits_deliveries() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));

        let _sub_a = bus
            .subscribe(
                SubscriptionSpec::new("t", "workers"),
                Arc::new(CountingHandler {
                    seen: Arc::clone(&a),
                    disposition: Disposition::Ack,
                }),
            )
            .await
            .unwrap();
        let _sub_b = bus
            .subscribe(
                SubscriptionSpec::new("t", "workers"),
                Arc::new(CountingHandler {
                    seen: Arc::clone(&b),
                    disposition: Disposition::Ack,
                }),
            )
            .await
            .unwrap();

        for n in 0..10 {
            bus.publish("t", &probe_envelope(n)).await.unwrap();
        }
        bus.quiesce().await;

        // Load balanced: both saw work, total is exact.
        assert_eq!(a.load(Ordering::SeqCst) + b.load(Ordering::SeqCst), 10);
        assert!(a.load(Ordering::SeqCst) > 0);
        assert!(b.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn distinct_groups_each_see_everything() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));

        let _sub_a = bus
            .subscribe(
                SubscriptionSpec::new("t", "group-a"),
                Arc::new(CountingHandler {
                    seen: Arc::clone(&a),
                    disposition: Disposition::Ack,
                }),
            )
            .await
            .unwrap();
        let _sub_b = bus
            .subscribe(
                SubscriptionSpec::new("t", "group-b"),
                Arc::new(CountingHandler {
                    seen: Arc::clone(&b),
                    disposition: Disposition::Ack,
                }),
            )
            .await
            .unwrap();

        for n in 0..4 {
            bus.publish("t", &probe_envelope(n)).await.unwrap();
        }
        bus.quiesce().await;

        assert_eq!(a.load(Ordering::SeqCst), 4);
        assert_eq!(b.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn nack_dead_routes_to_dead_letter() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let seen = Arc::new(AtomicUsize::new(0));

        let _sub = bus
            .subscribe(
                SubscriptionSpec::new("t", "g"),
                Arc::new(CountingHandler {
                    seen: Arc::clone(&seen),
                    disposition: Disposition::NackDead,
                }),
            )
            .await
            .unwrap();

        bus.publish("t", &probe_envelope(1)).await.unwrap();
        bus.quiesce().await;

        assert_eq!(bus.dead_letters().len(), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bounded_redelivery_then_dead_letter() {
        let bus = Arc::new(InMemoryMessageBus::with_max_redeliveries(2));
        let seen = Arc::new(AtomicUsize::new(0));

        let _sub = bus
            .subscribe(
                SubscriptionSpec::new("t", "g"),
                Arc::new(CountingHandler {
                    seen: Arc::clone(&seen),
                    disposition: Disposition::NackRetry,
                }),
            )
            .await
            .unwrap();

        bus.publish("t", &probe_envelope(1)).await.unwrap();
        bus.quiesce().await;

        // Initial delivery plus two redeliveries, then dead letter.
        assert_eq!(seen.load(Ordering::SeqCst), 3);
        assert_eq!(bus.dead_letters().len(), 1);
    }

    #[tokio::test]
    async fn saga_log_drops_duplicate_triples() {
        let log = InMemorySagaLog::new();
        let correlation = CorrelationId::new();

        let entry = NewSagaLogEntry::new(correlation, 1, "CampaignCreated", serde_json::json!({}));
        assert_eq!(
            log.append(entry.clone()).await.unwrap(),
            AppendOutcome::Recorded
        );
        assert_eq!(log.append(entry).await.unwrap(), AppendOutcome::Duplicate);

        let entries = log.read_by_correlation(correlation).await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn open_correlations_excludes_ended_sagas() {
        let log = InMemorySagaLog::new();
        let open = CorrelationId::new();
        let closed = CorrelationId::new();

        for correlation in [open, closed] {
            log.append(NewSagaLogEntry::new(
                correlation,
                0,
                KIND_START,
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        }
        log.append(NewSagaLogEntry::new(
            closed,
            3,
            KIND_END,
            serde_json::json!({}),
        ))
        .await
        .unwrap();

        let result = log.open_correlations().await.unwrap();
        assert_eq!(result, vec![open]);
    }
}
