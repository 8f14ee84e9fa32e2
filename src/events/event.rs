//! Event envelope and priority (C10).

use std::any::Any;
use std::time::Instant;

/// Delivery priority lane. Ordered so that `Priority::Critical` sorts
/// highest (`critical > high > normal > low`, §4.10).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Marker trait for values publishable on the bus. Implemented for any
/// `'static + Send + Sync` type via a blanket impl.
pub trait Event: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync> Event for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Wraps a published value with bus-assigned identity.
pub struct Envelope {
    pub event_id: u64,
    pub timestamp: Instant,
    pub priority: Priority,
    pub payload: Box<dyn Any + Send + Sync>,
}

/// Opaque handle returned by `subscribe_event`, used to unsubscribe later.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Token(pub u64);
