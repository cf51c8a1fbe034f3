// src/runtime/event.rs
//! Events flowing through the bus.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::fmt;
use uuid::Uuid;

/// Opaque per-instance event identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery class. Ordering is by urgency: `High < Standard < Bulk`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Standard,
    Bulk,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Standard, Priority::Bulk];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// An immutable published event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    id: EventId,
    timestamp: DateTime<Utc>,
    topic: String,
    priority: Priority,
    payload: Json,
    /// Reserved for semantic routing; matching ignores it.
    vector: Option<Vec<f32>>,
}

impl Event {
    /// Standard-priority event stamped with a fresh id and the current time.
    pub fn new(topic: impl Into<String>, payload: Json) -> Self {
        Self {
            id: EventId::new(),
            timestamp: Utc::now(),
            topic: topic.into(),
            priority: Priority::Standard,
            payload,
            vector: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = Some(vector);
        self
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn payload(&self) -> &Json {
        &self.payload
    }

    pub fn vector(&self) -> Option<&[f32]> {
        self.vector.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_defaults() {
        let a = Event::new("x.y", json!(1));
        let b = Event::new("x.y", json!(1));
        assert_ne!(a.id(), b.id());
        assert_eq!(a.priority(), Priority::Standard);
        assert_eq!(a.vector(), None);
        assert!(a.timestamp() <= b.timestamp());
    }

    #[test]
    fn test_builders() {
        let e = Event::new("a", json!(null))
            .with_priority(Priority::High)
            .with_vector(vec![0.5, 1.0]);
        assert_eq!(e.priority(), Priority::High);
        assert_eq!(e.vector(), Some(&[0.5, 1.0][..]));
        assert!(Priority::High < Priority::Bulk);
    }
}
