//! In-process notification hub for committed event batches.
//!
//! The repository publishes every committed batch exactly once, after the
//! event log accepted it. Subscribers run synchronously on the saving task,
//! in registration order, and each subscriber's outcome is captured on its
//! own so a failing listener can neither stop the remaining dispatch nor
//! undo the commit that triggered it.

use std::any::Any;
use std::borrow::Cow;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use common::AggregateId;
use event_store::EventEnvelope;

/// Error type returned by subscriber handlers.
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

type Handler = dyn Fn(&[EventEnvelope]) -> Result<(), SubscriberError> + Send + Sync;

/// Selects which committed events a subscriber receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionFilter {
    /// Every event.
    All,

    /// Events of aggregates with any of these type tags.
    AggregateTypes(Vec<String>),

    /// Events of these specific aggregates.
    AggregateIds(Vec<AggregateId>),

    /// Events of any of these kinds, regardless of aggregate.
    EventTypes(Vec<String>),

    /// Events of these kinds on aggregates of one type.
    AggregateEvents {
        aggregate_type: String,
        event_types: Vec<String>,
    },
}

impl SubscriptionFilter {
    /// Matches events of a single aggregate type.
    pub fn aggregate_type(aggregate_type: impl Into<String>) -> Self {
        Self::AggregateTypes(vec![aggregate_type.into()])
    }

    /// Matches events of a single aggregate.
    pub fn aggregate_id(aggregate_id: AggregateId) -> Self {
        Self::AggregateIds(vec![aggregate_id])
    }

    /// Matches events of any of the given kinds.
    pub fn event_types<I, S>(event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::EventTypes(event_types.into_iter().map(Into::into).collect())
    }

    /// Returns true if the event passes this filter.
    pub fn matches(&self, event: &EventEnvelope) -> bool {
        match self {
            Self::All => true,
            Self::AggregateTypes(types) => types.iter().any(|t| t == &event.aggregate_type),
            Self::AggregateIds(ids) => ids.contains(&event.aggregate_id),
            Self::EventTypes(types) => types.iter().any(|t| t == &event.event_type),
            Self::AggregateEvents {
                aggregate_type,
                event_types,
            } => {
                aggregate_type == &event.aggregate_type
                    && event_types.iter().any(|t| t == &event.event_type)
            }
        }
    }

    /// Returns the matching part of a batch, preserving order.
    fn select<'a>(&self, events: &'a [EventEnvelope]) -> Cow<'a, [EventEnvelope]> {
        if events.iter().all(|e| self.matches(e)) {
            Cow::Borrowed(events)
        } else {
            Cow::Owned(events.iter().filter(|e| self.matches(e)).cloned().collect())
        }
    }
}

struct Subscriber {
    id: u64,
    filter: SubscriptionFilter,
    handler: Box<Handler>,
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<Arc<Subscriber>>>,
}

/// A subscriber that did not handle its batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    /// The failing subscription.
    pub subscription_id: u64,

    /// The returned error or the panic message.
    pub error: String,
}

/// Per-subscriber outcome of one publication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Number of subscribers that handled their batch successfully.
    pub delivered: usize,

    /// Subscribers that returned an error or panicked.
    pub failures: Vec<DeliveryFailure>,
}

impl DeliveryReport {
    /// Returns true if no subscriber failed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Synchronous publish/subscribe hub for committed event batches.
///
/// Cloning yields a handle to the same set of subscribers.
#[derive(Clone, Default)]
pub struct EventStream {
    registry: Arc<Registry>,
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventStream {
    /// Creates a hub without subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for batches passing `filter`.
    ///
    /// The handler receives the matching events of each committed batch in
    /// one call. It is not invoked when nothing in a batch matches. The
    /// subscription stays registered until [`Subscription::close`] is called.
    pub fn subscribe<F>(&self, filter: SubscriptionFilter, handler: F) -> Subscription
    where
        F: Fn(&[EventEnvelope]) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber = Arc::new(Subscriber {
            id,
            filter,
            handler: Box::new(handler),
        });

        self.registry
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscriber);

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Registers a handler for every committed batch.
    pub fn subscribe_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&[EventEnvelope]) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        self.subscribe(SubscriptionFilter::All, handler)
    }

    /// Returns the number of registered subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.registry
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Delivers a committed batch to every matching subscriber.
    ///
    /// Subscribers are invoked once each, in registration order. Errors and
    /// panics are captured in the returned report and never interrupt the
    /// dispatch to later subscribers.
    #[tracing::instrument(skip(self, events), fields(count = events.len()))]
    pub fn publish(&self, events: &[EventEnvelope]) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        if events.is_empty() {
            return report;
        }

        // Handlers may subscribe or close while we dispatch.
        let subscribers = self
            .registry
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for subscriber in subscribers {
            let batch = subscriber.filter.select(events);
            if batch.is_empty() {
                continue;
            }

            let outcome = catch_unwind(AssertUnwindSafe(|| (subscriber.handler)(&*batch)));
            let error = match outcome {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Err(err)) => err.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };

            tracing::warn!(
                subscription_id = subscriber.id,
                error = %error,
                "subscriber failed to handle committed events"
            );
            metrics::counter!("eventsourcing_subscriber_failures").increment(1);
            report.failures.push(DeliveryFailure {
                subscription_id: subscriber.id,
                error,
            });
        }

        report
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("subscriber panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("subscriber panicked: {message}")
    } else {
        "subscriber panicked".to_string()
    }
}

/// Handle to a registered subscriber.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Returns the subscription identifier used in delivery reports.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Unregisters the subscriber.
    ///
    /// Returns false if it was already closed or the hub is gone.
    pub fn close(&self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut subscribers = registry
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|s| s.id != self.id);
        subscribers.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use event_store::Version;

    fn event(
        aggregate_id: &str,
        aggregate_type: &str,
        version: i64,
        event_type: &str,
    ) -> EventEnvelope {
        EventEnvelope::record(
            aggregate_id,
            aggregate_type,
            Version::new(version),
            event_type,
            serde_json::json!({}),
        )
    }

    fn batch() -> Vec<EventEnvelope> {
        vec![
            event("p-1", "Person", 1, "Born"),
            event("p-1", "Person", 2, "AgedOneYear"),
            event("p-1", "Person", 3, "AgedOneYear"),
        ]
    }

    type Calls = Arc<Mutex<Vec<(&'static str, Vec<i64>)>>>;

    fn recorder(
        calls: Calls,
        name: &'static str,
    ) -> impl Fn(&[EventEnvelope]) -> Result<(), SubscriberError> + Send + Sync + 'static {
        move |events| {
            let versions = events.iter().map(|e| e.version.as_i64()).collect();
            calls.lock().unwrap().push((name, versions));
            Ok(())
        }
    }

    #[test]
    fn each_subscriber_gets_whole_batch_once_in_registration_order() {
        let stream = EventStream::new();
        let calls: Calls = Arc::default();
        stream.subscribe_all(recorder(calls.clone(), "first"));
        stream.subscribe_all(recorder(calls.clone(), "second"));

        let report = stream.publish(&batch());

        assert_eq!(report.delivered, 2);
        assert!(report.is_clean());
        assert_eq!(
            *calls.lock().unwrap(),
            vec![("first", vec![1, 2, 3]), ("second", vec![1, 2, 3])]
        );
    }

    #[test]
    fn empty_batch_invokes_nobody() {
        let stream = EventStream::new();
        let calls: Calls = Arc::default();
        stream.subscribe_all(recorder(calls.clone(), "all"));

        let report = stream.publish(&[]);

        assert_eq!(report.delivered, 0);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn aggregate_type_filter() {
        let stream = EventStream::new();
        let calls: Calls = Arc::default();
        stream.subscribe(
            SubscriptionFilter::aggregate_type("Person"),
            recorder(calls.clone(), "person"),
        );
        stream.subscribe(
            SubscriptionFilter::aggregate_type("Order"),
            recorder(calls.clone(), "order"),
        );

        stream.publish(&batch());

        assert_eq!(*calls.lock().unwrap(), vec![("person", vec![1, 2, 3])]);
    }

    #[test]
    fn aggregate_id_filter() {
        let stream = EventStream::new();
        let calls: Calls = Arc::default();
        stream.subscribe(
            SubscriptionFilter::aggregate_id(AggregateId::from("p-2")),
            recorder(calls.clone(), "other"),
        );
        stream.subscribe(
            SubscriptionFilter::aggregate_id(AggregateId::from("p-1")),
            recorder(calls.clone(), "mine"),
        );

        stream.publish(&batch());

        assert_eq!(*calls.lock().unwrap(), vec![("mine", vec![1, 2, 3])]);
    }

    #[test]
    fn event_type_filter_delivers_matching_sub_batch() {
        let stream = EventStream::new();
        let calls: Calls = Arc::default();
        stream.subscribe(
            SubscriptionFilter::event_types(["AgedOneYear"]),
            recorder(calls.clone(), "aged"),
        );
        stream.subscribe(
            SubscriptionFilter::event_types(["Died"]),
            recorder(calls.clone(), "died"),
        );

        let report = stream.publish(&batch());

        assert_eq!(report.delivered, 1);
        assert_eq!(*calls.lock().unwrap(), vec![("aged", vec![2, 3])]);
    }

    #[test]
    fn aggregate_events_filter_requires_both() {
        let stream = EventStream::new();
        let calls: Calls = Arc::default();
        stream.subscribe(
            SubscriptionFilter::AggregateEvents {
                aggregate_type: "Person".to_string(),
                event_types: vec!["Born".to_string()],
            },
            recorder(calls.clone(), "born"),
        );
        stream.subscribe(
            SubscriptionFilter::AggregateEvents {
                aggregate_type: "Order".to_string(),
                event_types: vec!["Born".to_string()],
            },
            recorder(calls.clone(), "wrong-type"),
        );

        stream.publish(&batch());

        assert_eq!(*calls.lock().unwrap(), vec![("born", vec![1])]);
    }

    #[test]
    fn failing_subscriber_does_not_stop_dispatch() {
        let stream = EventStream::new();
        let calls: Calls = Arc::default();
        let failing = stream.subscribe_all(|_| Err("projection offline".into()));
        stream.subscribe_all(recorder(calls.clone(), "after"));

        let report = stream.publish(&batch());

        assert_eq!(report.delivered, 1);
        assert_eq!(
            report.failures,
            vec![DeliveryFailure {
                subscription_id: failing.id(),
                error: "projection offline".to_string(),
            }]
        );
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn panicking_subscriber_is_isolated() {
        let stream = EventStream::new();
        let calls: Calls = Arc::default();
        stream.subscribe_all(|_| panic!("boom"));
        stream.subscribe_all(recorder(calls.clone(), "after"));

        let report = stream.publish(&batch());

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].error.contains("boom"));
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn closed_subscription_is_not_invoked() {
        let stream = EventStream::new();
        let calls: Calls = Arc::default();
        let subscription = stream.subscribe_all(recorder(calls.clone(), "closed"));
        assert_eq!(stream.subscriber_count(), 1);

        assert!(subscription.close());
        assert!(!subscription.close());
        assert_eq!(stream.subscriber_count(), 0);

        stream.publish(&batch());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn handler_may_subscribe_during_dispatch() {
        let stream = EventStream::new();
        let inner = stream.clone();
        stream.subscribe_all(move |_| {
            inner.subscribe_all(|_| Ok(()));
            Ok(())
        });

        let report = stream.publish(&batch());

        assert_eq!(report.delivered, 1);
        assert_eq!(stream.subscriber_count(), 2);
    }
}
