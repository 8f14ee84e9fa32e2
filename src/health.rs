//! Shared health/snapshot vocabulary and capability contracts (C12 §4.12).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::Result;

/// Aggregate health of a monitored component.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

/// The result of one health evaluation.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub message: String,
    pub metadata: HashMap<String, String>,
    pub check_duration: Duration,
    pub timestamp: Instant,
}

impl HealthCheckResult {
    pub fn new(status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            metadata: HashMap::new(),
            check_duration: Duration::ZERO,
            timestamp: Instant::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_check_duration(mut self, duration: Duration) -> Self {
        self.check_duration = duration;
        self
    }
}

/// One named numeric reading inside a [`Snapshot`].
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricValue {
    pub name: String,
    pub value: f64,
    pub tags: HashMap<String, String>,
}

/// A point-in-time, immutable copy of a set of metrics emitted by a monitor.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Snapshot {
    pub capture_time: Instant,
    pub source_id: String,
    pub metrics: Vec<MetricValue>,
}

impl Snapshot {
    pub fn new(source_id: impl Into<String>, capture_time: Instant) -> Self {
        Self {
            capture_time,
            source_id: source_id.into(),
            metrics: Vec::new(),
        }
    }

    pub fn add_metric(
        &mut self,
        name: impl Into<String>,
        value: f64,
        tags: Option<HashMap<String, String>>,
    ) {
        self.metrics.push(MetricValue {
            name: name.into(),
            value,
            tags: tags.unwrap_or_default(),
        });
    }
}

/// Capability contract consumed by facades, implemented by `PerformanceMonitor`.
pub trait Monitor {
    fn record_metric(
        &self,
        name: &str,
        value: f64,
        tags: Option<HashMap<String, String>>,
    ) -> Result<()>;
    fn get_metrics(&self) -> Snapshot;
    fn check_health(&self) -> HealthCheckResult;
    fn reset(&self);
}

/// Capability contract for a registry of named monitors.
pub trait MonitorProvider {
    fn get_monitor(&self, name: &str) -> Option<std::sync::Arc<dyn Monitor + Send + Sync>>;
    fn create_monitor(&self, name: &str) -> std::sync::Arc<dyn Monitor + Send + Sync>;
}
