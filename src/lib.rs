//! perfmon-core: an in-process observability runtime.
//!
//! Composes a lock-free ring buffer, a percentile stats kernel, time-series
//! storage with retention and downsampling, an LRU-evicting operation
//! profiler, a tagged metric store, an adaptive sampling controller, a
//! distributed tracer with W3C propagation, a typed priority event bus, and
//! circuit-breaker/retry fault tolerance, behind a single facade
//! (`PerformanceMonitor`) that consumes an injected [`provider::MetricsProvider`].
//!
//! No platform probes, disk persistence, cross-process transport or
//! alerting delivery live here: the core is consumed by callers that supply
//! their own platform-specific [`provider::MetricsProvider`] implementation.
//!
//! ```
//! use perfmon_core::monitor::{MonitorConfig, PerformanceMonitor};
//! use perfmon_core::provider::NullMetricsProvider;
//! use perfmon_core::health::Monitor;
//!
//! let monitor = PerformanceMonitor::new(MonitorConfig::default(), Box::new(NullMetricsProvider))
//!     .expect("valid default configuration");
//! monitor.record_metric("queue_depth", 3.0, None).unwrap();
//! let snapshot = monitor.get_metrics();
//! assert!(snapshot.metrics.iter().any(|m| m.name == "queue_depth"));
//! ```

pub mod adaptive;
pub mod error;
pub mod events;
pub mod fault;
pub mod health;
#[cfg(test)]
mod logging;
pub mod metrics;
pub mod monitor;
pub mod profiler;
pub mod provider;
pub mod ringbuffer;
pub mod stats;
pub mod timeseries;
pub mod tracing_core;

pub use error::{Error, ErrorKind, Result};
