//! External `MetricsProvider` contract (§5/§6) and a `null` default double,
//! mirroring the original source's `platform/null/null_metrics_provider.h`:
//! platform probes are out of scope for this core, so the only provider it
//! ships is one that always reports `resource_unavailable`.

use std::time::Instant;

use crate::error::{Error, Result};

/// A single reading of host-level resource usage.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SystemMetrics {
    /// `[0, 100]`.
    pub cpu_usage_percent: f64,
    /// `[0, 100]`.
    pub memory_usage_percent: f64,
    pub memory_usage_bytes: u64,
    pub available_memory_bytes: u64,
    pub thread_count: u64,
    pub timestamp: Instant,
}

/// Abstract source of [`SystemMetrics`]. The core never reads `/proc`, `/sys`,
/// or any other platform interface directly; it consumes this trait instead.
pub trait MetricsProvider: Send + Sync {
    fn get_current_metrics(&self) -> Result<SystemMetrics>;
}

/// A provider that always fails with `resource_unavailable`, used as the
/// default when no platform-specific provider is wired in, and in tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullMetricsProvider;

impl MetricsProvider for NullMetricsProvider {
    fn get_current_metrics(&self) -> Result<SystemMetrics> {
        Err(Error::new(
            crate::error::ErrorKind::ResourceUnavailable,
            "no metrics provider configured",
        ))
    }
}

/// A fixed-reading provider for tests and demos.
#[derive(Clone, Copy, Debug)]
pub struct StaticMetricsProvider(pub SystemMetrics);

impl MetricsProvider for StaticMetricsProvider {
    fn get_current_metrics(&self) -> Result<SystemMetrics> {
        Ok(self.0)
    }
}
