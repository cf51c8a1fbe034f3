// src/runtime/reflex.rs
//! Reflex pods: native subscribers reacting inline on the publishing thread.
//!
//! A pod registers its subscriptions when constructed and keeps only a
//! `WeakBus` to publish follow-up events. The bus owns the subscriptions;
//! a pod never keeps its bus alive.
use crate::error::ConfigError;
use crate::runtime::bus::{EventBus, Subscription, is_wildcard};
use crate::runtime::event::{Event, Priority};
use serde::Deserialize;
use serde_json::{Value as Json, json};
use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Nested relay hops allowed on one thread before a relay stops forwarding.
pub const MAX_RELAY_DEPTH: usize = 16;

thread_local! {
    static RELAY_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Counts one nested relay hop for as long as it lives.
struct RelayHop;

impl RelayHop {
    fn enter() -> Option<Self> {
        RELAY_DEPTH.with(|depth| {
            if depth.get() >= MAX_RELAY_DEPTH {
                return None;
            }
            depth.set(depth.get() + 1);
            Some(RelayHop)
        })
    }
}

impl Drop for RelayHop {
    fn drop(&mut self) {
        RELAY_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

pub trait ReflexPod: Send + Sync {
    fn name(&self) -> &str;

    fn subscriptions(&self) -> &[Subscription];

    /// Events this pod has published.
    fn fired(&self) -> u64;

    fn detach(&self) {
        for subscription in self.subscriptions() {
            subscription.cancel();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ThresholdSettings {
    pub source: String,
    pub threshold: f64,
    pub alert: String,
    /// Object payload field holding the reading; the payload itself if absent.
    #[serde(default)]
    pub field: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RelaySettings {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReflexConfig {
    pub threshold: Vec<ThresholdSettings>,
    pub relay: Vec<RelaySettings>,
}

/// Publishes a `High` alert whenever a reading exceeds the threshold.
pub struct ThresholdPod {
    name: String,
    subscriptions: Vec<Subscription>,
    fired: Arc<AtomicU64>,
}

impl ThresholdPod {
    pub fn new(bus: &EventBus, settings: ThresholdSettings) -> Result<Self, ConfigError> {
        if !settings.threshold.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "threshold for `{}` must be a finite number",
                settings.source
            )));
        }
        if is_wildcard(&settings.alert) {
            return Err(ConfigError::Invalid(format!(
                "alert topic `{}` must not contain `*`",
                settings.alert
            )));
        }
        let name = format!("threshold({} > {})", settings.source, settings.threshold);
        let fired = Arc::new(AtomicU64::new(0));
        let counter = fired.clone();
        let weak = bus.downgrade();
        let ThresholdSettings {
            source,
            threshold,
            alert,
            field,
        } = settings;
        let subscription = bus.subscribe(source, move |event| {
            // Never react to our own alerts.
            if event.topic() == alert {
                return Ok(());
            }
            let reading = match &field {
                Some(field) => event.payload().get(field).and_then(Json::as_f64),
                None => event.payload().as_f64(),
            };
            let Some(value) = reading.filter(|v| *v > threshold) else {
                return Ok(());
            };
            if let Some(bus) = weak.upgrade() {
                let payload = json!({ "source": event.topic(), "value": value, "threshold": threshold });
                counter.fetch_add(1, Ordering::Relaxed);
                debug!(alert = %alert, value, "threshold exceeded");
                bus.publish(&Event::new(alert.clone(), payload).with_priority(Priority::High));
            }
            Ok(())
        });
        Ok(Self {
            name,
            subscriptions: vec![subscription],
            fired,
        })
    }
}

impl ReflexPod for ThresholdPod {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    fn fired(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }
}

/// Republishes matching events on another topic, keeping payload and priority.
pub struct RelayPod {
    name: String,
    subscriptions: Vec<Subscription>,
    fired: Arc<AtomicU64>,
}

impl RelayPod {
    /// Rejects a target its own source pattern would match, which would loop.
    pub fn new(bus: &EventBus, settings: RelaySettings) -> Result<Self, ConfigError> {
        if is_wildcard(&settings.target) {
            return Err(ConfigError::Invalid(format!(
                "relay target `{}` must not contain `*`",
                settings.target
            )));
        }
        if bus.matches(&settings.source, &settings.target) {
            return Err(ConfigError::Invalid(format!(
                "relay target `{}` matches its own source `{}`",
                settings.target, settings.source
            )));
        }
        let name = format!("relay({} -> {})", settings.source, settings.target);
        let fired = Arc::new(AtomicU64::new(0));
        let counter = fired.clone();
        let weak = bus.downgrade();
        let target = settings.target;
        let subscription = bus.subscribe(settings.source, move |event| {
            let Some(_hop) = RelayHop::enter() else {
                warn!(topic = %event.topic(), target = %target, "relay depth exceeded, event dropped");
                return Ok(());
            };
            if let Some(bus) = weak.upgrade() {
                counter.fetch_add(1, Ordering::Relaxed);
                bus.publish(&Event::new(target.clone(), event.payload().clone()).with_priority(event.priority()));
            }
            Ok(())
        });
        Ok(Self {
            name,
            subscriptions: vec![subscription],
            fired,
        })
    }
}

impl ReflexPod for RelayPod {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    fn fired(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }
}

/// Owns a group of pods; dropping it detaches all of them.
#[derive(Default)]
pub struct PodSet {
    pods: Vec<Box<dyn ReflexPod>>,
}

impl PodSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects configurations whose pods would feed each other in a loop.
    pub fn from_config(bus: &EventBus, config: &ReflexConfig) -> Result<Self, ConfigError> {
        check_cycles(bus, config)?;
        let mut set = PodSet::new();
        for settings in &config.threshold {
            set.push(ThresholdPod::new(bus, settings.clone())?);
        }
        for settings in &config.relay {
            set.push(RelayPod::new(bus, settings.clone())?);
        }
        if !set.is_empty() {
            info!(pods = set.len(), "reflex pods attached");
        }
        Ok(set)
    }

    pub fn push(&mut self, pod: impl ReflexPod + 'static) {
        self.pods.push(Box::new(pod));
    }

    pub fn len(&self) -> usize {
        self.pods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn ReflexPod> {
        self.pods.iter().map(|p| p.as_ref())
    }
}

/// One pod's edge in the publish graph: events on `source` lead to `output`.
struct Link<'a> {
    name: String,
    source: &'a str,
    output: &'a str,
    /// Threshold pods skip events on their own alert topic.
    ignores_output: bool,
}

fn check_cycles(bus: &EventBus, config: &ReflexConfig) -> Result<(), ConfigError> {
    let links: Vec<Link<'_>> = config
        .threshold
        .iter()
        .map(|t| Link {
            name: format!("threshold({} -> {})", t.source, t.alert),
            source: &t.source,
            output: &t.alert,
            ignores_output: true,
        })
        .chain(config.relay.iter().map(|r| Link {
            name: format!("relay({} -> {})", r.source, r.target),
            source: &r.source,
            output: &r.target,
            ignores_output: false,
        }))
        .collect();
    let next: Vec<Vec<usize>> = links
        .iter()
        .enumerate()
        .map(|(i, from)| {
            (0..links.len())
                .filter(|&j| !(i == j && from.ignores_output) && bus.matches(links[j].source, from.output))
                .collect()
        })
        .collect();

    // 0 = unvisited, 1 = on the current path, 2 = done.
    let mut state = vec![0u8; links.len()];
    for start in 0..links.len() {
        if state[start] != 0 {
            continue;
        }
        let mut stack = vec![(start, 0usize)];
        state[start] = 1;
        while let Some((node, edge)) = stack.pop() {
            let Some(&to) = next[node].get(edge) else {
                state[node] = 2;
                continue;
            };
            stack.push((node, edge + 1));
            match state[to] {
                0 => {
                    state[to] = 1;
                    stack.push((to, 0));
                }
                1 => {
                    return Err(ConfigError::Invalid(format!(
                        "reflex pods form a cycle through {}",
                        links[to].name
                    )));
                }
                _ => {}
            }
        }
    }
    Ok(())
}

impl Drop for PodSet {
    fn drop(&mut self) {
        for pod in &self.pods {
            pod.detach();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn record(bus: &EventBus, pattern: &str) -> Arc<Mutex<Vec<Event>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        bus.subscribe(pattern, move |e| {
            s.lock().push(e.clone());
            Ok(())
        });
        seen
    }

    fn threshold(source: &str, field: Option<&str>) -> ThresholdSettings {
        ThresholdSettings {
            source: source.into(),
            threshold: 50.0,
            alert: "alert.temperature.high".into(),
            field: field.map(str::to_string),
        }
    }

    #[test]
    fn test_threshold_pod_fires_above_threshold() {
        let bus = EventBus::new();
        let alerts = record(&bus, "alert.temperature.high");
        let pod = ThresholdPod::new(&bus, threshold("sensor.temp", None)).unwrap();
        bus.publish(&Event::new("sensor.temp", json!(20)));
        bus.publish(&Event::new("sensor.temp", json!(75.5)));
        let alerts = alerts.lock();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].priority(), Priority::High);
        assert_eq!(
            alerts[0].payload(),
            &json!({"source": "sensor.temp", "value": 75.5, "threshold": 50.0})
        );
        assert_eq!(pod.fired(), 1);
    }

    #[test]
    fn test_threshold_pod_reads_field_and_ignores_own_alerts() {
        let bus = EventBus::new();
        // The wildcard source also matches the alert topic.
        let pod = ThresholdPod::new(&bus, threshold("*", Some("celsius"))).unwrap();
        bus.publish(&Event::new("room.1", json!({"celsius": 90})));
        bus.publish(&Event::new("room.2", json!("not a reading")));
        assert_eq!(pod.fired(), 1);
    }

    #[test]
    fn test_relay_pod_forwards() {
        let bus = EventBus::new();
        let out = record(&bus, "audit.log");
        let pod = RelayPod::new(
            &bus,
            RelaySettings {
                source: "orders.*".into(),
                target: "audit.log".into(),
            },
        )
        .unwrap();
        bus.publish(&Event::new("orders.created", json!({"id": 7})).with_priority(Priority::Bulk));
        let out = out.lock();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload(), &json!({"id": 7}));
        assert_eq!(out[0].priority(), Priority::Bulk);
        assert_eq!(pod.fired(), 1);
    }

    #[test]
    fn test_relay_rejects_self_matching_target() {
        let bus = EventBus::new();
        let err = RelayPod::new(
            &bus,
            RelaySettings {
                source: "orders.*".into(),
                target: "orders.copy".into(),
            },
        )
        .err()
        .unwrap();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert_eq!(bus.subscription_count(), 0);
    }

    fn relay(source: &str, target: &str) -> RelaySettings {
        RelaySettings {
            source: source.into(),
            target: target.into(),
        }
    }

    #[test]
    fn test_pod_set_rejects_relay_cycles() {
        let bus = EventBus::new();
        let config = ReflexConfig {
            threshold: Vec::new(),
            relay: vec![relay("a", "b"), relay("b", "a")],
        };
        let err = PodSet::from_config(&bus, &config).err().unwrap();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert_eq!(bus.subscription_count(), 0);

        let config = ReflexConfig {
            threshold: vec![threshold("sensor.temp", None)],
            relay: vec![relay("alert.temperature.high", "sensor.temp")],
        };
        assert!(PodSet::from_config(&bus, &config).is_err());

        // A chain without a way back is fine.
        let config = ReflexConfig {
            threshold: vec![threshold("sensor.temp", None)],
            relay: vec![relay("alert.temperature.high", "audit.alerts"), relay("audit.alerts", "archive")],
        };
        assert_eq!(PodSet::from_config(&bus, &config).unwrap().len(), 3);
    }

    #[test]
    fn test_relay_loop_built_by_hand_stops_at_depth_limit() {
        let bus = EventBus::new();
        let forward = RelayPod::new(&bus, relay("a", "b")).unwrap();
        let back = RelayPod::new(&bus, relay("b", "a")).unwrap();
        bus.publish(&Event::new("a", json!(1)));
        assert_eq!(forward.fired() + back.fired(), MAX_RELAY_DEPTH as u64);

        // The depth counter unwinds, so the next publish relays again.
        bus.publish(&Event::new("b", json!(2)));
        assert_eq!(forward.fired() + back.fired(), 2 * MAX_RELAY_DEPTH as u64);
    }

    #[test]
    fn test_pod_set_detaches_on_drop() {
        let bus = EventBus::new();
        let config = ReflexConfig {
            threshold: vec![threshold("sensor.temp", None)],
            relay: vec![RelaySettings {
                source: "a".into(),
                target: "b".into(),
            }],
        };
        let pods = PodSet::from_config(&bus, &config).unwrap();
        assert_eq!(pods.len(), 2);
        assert_eq!(bus.subscription_count(), 2);
        drop(pods);
        assert_eq!(bus.subscription_count(), 0);
    }
}
