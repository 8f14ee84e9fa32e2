//! Typed event bus (C10): priority lanes, bounded queues, worker dispatch.

pub mod bus;
pub mod event;

pub use bus::{BusStats, EventBus, EventBusConfig};
pub use event::{Envelope, Event, Priority, Token};
