// src/runtime/mod.rs
//! Event bus, reflex pods, host modules, capabilities and the bytecode VM.
pub mod bus;
pub mod capability;
pub mod dispatch;
pub mod event;
pub mod host;
pub mod reflex;
pub mod vm;

pub use bus::{EventBus, PublishReport, Subscription, SubscriptionId, WeakBus};
pub use event::{Event, EventId, Priority};
