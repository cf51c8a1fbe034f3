// src/runtime/bus/mod.rs
//! Topic-keyed publish/subscribe registry.
//!
//! Exact patterns live in a map keyed by topic, wildcard patterns in a list
//! scanned with the bus's `TopicMatcher`. Publishing snapshots the matching
//! handlers and releases the locks before invoking any of them, so handlers
//! may freely subscribe, unsubscribe or publish. A subscription added while
//! an event is being dispatched does not see that event.
pub mod matcher;

use crate::error::{HandlerError, HandlerFaultedError};
use crate::runtime::event::Event;
pub use matcher::{SegmentMatcher, SubstringMatcher, TopicMatcher, is_wildcard};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Handler callable registered against a pattern.
pub type Handler = Arc<dyn Fn(&Event) -> Result<(), HandlerError> + Send + Sync>;

const FAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to a registered handler. Dropping it does not unsubscribe; call
/// `cancel` or `EventBus::unsubscribe`.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: SubscriptionId,
    pattern: String,
    bus: WeakBus,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Removes the handler. Returns false if it was already gone or the bus
    /// no longer exists.
    pub fn cancel(&self) -> bool {
        self.bus.upgrade().is_some_and(|bus| bus.unsubscribe(self))
    }
}

/// Outcome of one `publish` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Handlers invoked, faulted ones included.
    pub delivered: usize,
    pub faulted: usize,
}

struct Entry {
    id: SubscriptionId,
    pattern: String,
    handler: Handler,
}

struct BusInner {
    exact: RwLock<HashMap<String, Vec<Entry>>>,
    wildcard: RwLock<Vec<Entry>>,
    matcher: Box<dyn TopicMatcher>,
    next_id: AtomicU64,
    faults: broadcast::Sender<HandlerFaultedError>,
}

/// Shared handle to one bus. Clones refer to the same registry.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

/// Non-owning bus handle, held by pods and subscriptions.
#[derive(Clone, Default)]
pub struct WeakBus {
    inner: Weak<BusInner>,
}

impl WeakBus {
    pub fn upgrade(&self) -> Option<EventBus> {
        self.inner.upgrade().map(|inner| EventBus { inner })
    }
}

impl fmt::Debug for WeakBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakBus")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("matcher", &self.inner.matcher.name())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Bus with the substring matching rule.
    pub fn new() -> Self {
        Self::with_matcher(Box::new(SubstringMatcher))
    }

    pub fn with_matcher(matcher: Box<dyn TopicMatcher>) -> Self {
        let (faults, _) = broadcast::channel(FAULT_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                exact: RwLock::new(HashMap::new()),
                wildcard: RwLock::new(Vec::new()),
                matcher,
                next_id: AtomicU64::new(1),
                faults,
            }),
        }
    }

    pub fn downgrade(&self) -> WeakBus {
        WeakBus {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn matcher(&self) -> &dyn TopicMatcher {
        self.inner.matcher.as_ref()
    }

    /// Whether `pattern` selects `topic` under this bus's rule.
    pub fn matches(&self, pattern: &str, topic: &str) -> bool {
        self.inner.matcher.matches(pattern, topic)
    }

    pub fn subscribe<F>(&self, pattern: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.subscribe_handler(pattern, Arc::new(handler))
    }

    pub fn subscribe_handler(&self, pattern: impl Into<String>, handler: Handler) -> Subscription {
        let pattern = pattern.into();
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = Entry {
            id,
            pattern: pattern.clone(),
            handler,
        };
        if is_wildcard(&pattern) {
            self.inner.wildcard.write().push(entry);
        } else {
            self.inner.exact.write().entry(pattern.clone()).or_default().push(entry);
        }
        debug!(subscription = %id, pattern = %pattern, "subscribed");
        Subscription {
            id,
            pattern,
            bus: self.downgrade(),
        }
    }

    /// Removes a handler. Dispatches already holding it still run to completion.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let id = subscription.id;
        let removed = if is_wildcard(&subscription.pattern) {
            let mut wildcard = self.inner.wildcard.write();
            let before = wildcard.len();
            wildcard.retain(|e| e.id != id);
            wildcard.len() != before
        } else {
            let mut exact = self.inner.exact.write();
            match exact.get_mut(&subscription.pattern) {
                Some(entries) => {
                    let before = entries.len();
                    entries.retain(|e| e.id != id);
                    let removed = entries.len() != before;
                    if entries.is_empty() {
                        exact.remove(&subscription.pattern);
                    }
                    removed
                }
                None => false,
            }
        };
        if removed {
            debug!(subscription = %id, pattern = %subscription.pattern, "unsubscribed");
        }
        removed
    }

    pub fn subscription_count(&self) -> usize {
        let exact: usize = self.inner.exact.read().values().map(Vec::len).sum();
        exact + self.inner.wildcard.read().len()
    }

    /// Handlers matching `topic`: exact subscriptions first, then wildcard
    /// ones, each group in subscription order.
    fn snapshot(&self, topic: &str) -> Vec<(SubscriptionId, Handler)> {
        let mut handlers: Vec<(SubscriptionId, Handler)> = self
            .inner
            .exact
            .read()
            .get(topic)
            .map(|entries| entries.iter().map(|e| (e.id, e.handler.clone())).collect())
            .unwrap_or_default();
        let wildcard = self.inner.wildcard.read();
        handlers.extend(
            wildcard
                .iter()
                .filter(|e| self.inner.matcher.matches(&e.pattern, topic))
                .map(|e| (e.id, e.handler.clone())),
        );
        handlers
    }

    /// Delivers `event` to every matching handler exactly once. A failing or
    /// panicking handler is reported as a fault and dispatch continues.
    pub fn publish(&self, event: &Event) -> PublishReport {
        let handlers = self.snapshot(event.topic());
        let mut report = PublishReport::default();
        for (id, handler) in handlers {
            report.delivered += 1;
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(event)));
            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err.0,
                Err(panic) => panic_message(panic.as_ref()),
            };
            report.faulted += 1;
            self.report_fault(HandlerFaultedError {
                topic: event.topic().to_string(),
                subscription: id,
                message,
            });
        }
        report
    }

    /// Records a handler fault. Also used by deferred handler executions
    /// that fail after `publish` has returned.
    pub fn report_fault(&self, fault: HandlerFaultedError) {
        warn!(topic = %fault.topic, subscription = %fault.subscription, "{}", fault.message);
        // No receivers is fine.
        let _ = self.inner.faults.send(fault);
    }

    pub fn subscribe_faults(&self) -> broadcast::Receiver<HandlerFaultedError> {
        self.inner.faults.subscribe()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", s)
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counter(bus: &EventBus, pattern: &str) -> (Subscription, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let sub = bus.subscribe(pattern, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (sub, hits)
    }

    #[test]
    fn test_exact_subscription() {
        let bus = EventBus::new();
        let (_sub, hits) = counter(&bus, "x.y");
        bus.publish(&Event::new("x.y", json!(null)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        bus.publish(&Event::new("x.z", json!(null)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wildcard_subscription() {
        let bus = EventBus::new();
        let (_sub, hits) = counter(&bus, "alert.*");
        bus.publish(&Event::new("alert.temperature.high", json!(null)));
        // Loose substring rule: this also matches.
        bus.publish(&Event::new("xalertyz", json!(null)));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_segment_matcher_bus() {
        let bus = EventBus::with_matcher(Box::new(SegmentMatcher));
        let (_sub, hits) = counter(&bus, "alert.*");
        bus.publish(&Event::new("xalertyz", json!(null)));
        bus.publish(&Event::new("alert.t", json!(null)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delivery_order_exact_then_wildcard() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (pattern, tag) in [("a.*", "w1"), ("a.b", "e1"), ("*", "w2"), ("a.b", "e2")] {
            let order = order.clone();
            bus.subscribe(pattern, move |_| {
                order.lock().push(tag);
                Ok(())
            });
        }
        let report = bus.publish(&Event::new("a.b", json!(null)));
        assert_eq!(report.delivered, 4);
        assert_eq!(*order.lock(), vec!["e1", "e2", "w1", "w2"]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let (sub, hits) = counter(&bus, "t");
        let (wsub, whits) = counter(&bus, "t*");
        assert_eq!(bus.subscription_count(), 2);
        assert!(sub.cancel());
        assert!(bus.unsubscribe(&wsub));
        assert!(!sub.cancel());
        bus.publish(&Event::new("t", json!(null)));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(whits.load(Ordering::SeqCst), 0);
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn test_unsubscribe_during_dispatch_keeps_current_event() {
        let bus = EventBus::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let s = slot.clone();
        bus.subscribe("t", move |_| {
            if let Some(sub) = s.lock().take() {
                sub.cancel();
            }
            Ok(())
        });
        let (victim, hits) = counter(&bus, "t");
        *slot.lock() = Some(victim);
        bus.publish(&Event::new("t", json!(null)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        bus.publish(&Event::new("t", json!(null)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_faults_are_reported_and_dispatch_continues() {
        let bus = EventBus::new();
        let mut faults = bus.subscribe_faults();
        let failing = bus.subscribe("t", |_| Err("boom".into()));
        bus.subscribe("t", |_| panic!("kaboom"));
        let (_ok, hits) = counter(&bus, "t");
        let report = bus.publish(&Event::new("t", json!(null)));
        assert_eq!(report, PublishReport { delivered: 3, faulted: 2 });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let first = faults.try_recv().unwrap();
        assert_eq!(first.subscription, failing.id());
        assert_eq!(first.message, "boom");
        assert!(faults.try_recv().unwrap().message.contains("kaboom"));
    }

    #[test]
    fn test_handlers_may_publish() {
        let bus = EventBus::new();
        let weak = bus.downgrade();
        bus.subscribe("a", move |e| {
            if let Some(bus) = weak.upgrade() {
                bus.publish(&Event::new("b", e.payload().clone()));
            }
            Ok(())
        });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        bus.subscribe("b", move |e| {
            s.lock().push(e.payload().clone());
            Ok(())
        });
        bus.publish(&Event::new("a", json!(42)));
        assert_eq!(*seen.lock(), vec![json!(42)]);
    }

    #[test]
    fn test_weak_bus_outlives_bus() {
        let bus = EventBus::new();
        let (sub, _) = counter(&bus, "x");
        let weak = bus.downgrade();
        drop(bus);
        assert!(weak.upgrade().is_none());
        assert!(!sub.cancel());
    }
}
