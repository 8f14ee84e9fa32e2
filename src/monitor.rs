//! Performance monitor (C6): the facade composing the profiler, tagged
//! metrics, and an external [`MetricsProvider`] into health snapshots.

use std::collections::HashMap;
use std::time::Instant;

use crate::error::{Error, Result};
use crate::health::{HealthCheckResult, HealthStatus, Monitor, Snapshot};
use crate::metrics::{MetricStore, Tags};
use crate::profiler::{Profiler, ProfilerConfig};
use crate::provider::MetricsProvider;

/// Thresholds and identity for a [`PerformanceMonitor`].
#[derive(Clone)]
pub struct MonitorConfig {
    pub source_id: String,
    pub cpu_threshold: f64,
    pub memory_threshold: f64,
    pub latency_threshold: std::time::Duration,
    pub profiler: ProfilerConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            source_id: "perfmon-core".to_string(),
            cpu_threshold: 90.0,
            memory_threshold: 90.0,
            latency_threshold: std::time::Duration::from_secs(1),
            profiler: ProfilerConfig::default(),
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.cpu_threshold) {
            return Err(Error::invalid_configuration(
                "cpu_threshold must be in [0, 100]",
            ));
        }
        if !(0.0..=100.0).contains(&self.memory_threshold) {
            return Err(Error::invalid_configuration(
                "memory_threshold must be in [0, 100]",
            ));
        }
        self.profiler.validate()
    }
}

/// Facade composing C2 (via `profiler`), C4 and C5 plus an injected
/// [`MetricsProvider`] (§4.6).
pub struct PerformanceMonitor {
    config: MonitorConfig,
    profiler: Profiler,
    metrics: MetricStore,
    provider: Box<dyn MetricsProvider>,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig, provider: Box<dyn MetricsProvider>) -> Result<Self> {
        config.validate()?;
        let profiler = Profiler::new(config.profiler)?;
        Ok(Self {
            config,
            profiler,
            metrics: MetricStore::new(),
            provider,
        })
    }

    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    pub fn metrics(&self) -> &MetricStore {
        &self.metrics
    }

    /// Records one timed operation sample through the profiler.
    pub fn record_operation(&self, name: &str, duration: std::time::Duration, success: bool) {
        self.profiler.record_sample(name, duration, success);
    }
}

impl Monitor for PerformanceMonitor {
    /// Routes to the tagged store with gauge semantics by default (§4.6).
    fn record_metric(
        &self,
        name: &str,
        value: f64,
        tags: Option<HashMap<String, String>>,
    ) -> Result<()> {
        let tags: Tags = tags.unwrap_or_default().into_iter().collect();
        self.metrics.gauge_set(name, &tags, value)
    }

    fn get_metrics(&self) -> Snapshot {
        let mut snapshot = Snapshot::new(self.config.source_id.clone(), Instant::now());

        if let Ok(reading) = self.provider.get_current_metrics() {
            snapshot.add_metric("cpu_usage_percent", reading.cpu_usage_percent, None);
            snapshot.add_metric("memory_usage_percent", reading.memory_usage_percent, None);
            snapshot.add_metric("memory_usage_bytes", reading.memory_usage_bytes as f64, None);
            snapshot.add_metric("thread_count", reading.thread_count as f64, None);
        }

        for op in self.profiler.get_all_metrics() {
            if let Some(stats) = op.stats {
                snapshot.add_metric(
                    format!("profile.{}.mean_ms", op.name),
                    stats.mean.as_secs_f64() * 1000.0,
                    None,
                );
            }
        }

        for m in self.metrics.snapshot() {
            snapshot.add_metric(m.name, m.value, Some(m.tags.into_iter().collect()));
        }

        snapshot
    }

    fn check_health(&self) -> HealthCheckResult {
        let start = Instant::now();
        let mut triggers = Vec::new();

        if let Ok(reading) = self.provider.get_current_metrics() {
            if reading.cpu_usage_percent > self.config.cpu_threshold {
                triggers.push("cpu");
            }
            if reading.memory_usage_percent > self.config.memory_threshold {
                triggers.push("memory");
            }
        }

        for op in self.profiler.get_all_metrics() {
            if let Some(stats) = op.stats {
                if stats.p95 > self.config.latency_threshold {
                    triggers.push("latency");
                    break;
                }
            }
        }

        let status = match triggers.len() {
            0 => HealthStatus::Healthy,
            1 => HealthStatus::Degraded,
            _ => HealthStatus::Unhealthy,
        };

        let message = if triggers.is_empty() {
            "all checks within threshold".to_string()
        } else {
            format!("triggered by: {}", triggers.join(", "))
        };

        HealthCheckResult::new(status, message)
            .with_check_duration(start.elapsed())
    }

    fn reset(&self) {
        self.profiler.clear_all();
        self.metrics.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{NullMetricsProvider, StaticMetricsProvider, SystemMetrics};
    use std::time::Duration;

    fn monitor_with(provider: Box<dyn MetricsProvider>) -> PerformanceMonitor {
        PerformanceMonitor::new(MonitorConfig::default(), provider).unwrap()
    }

    #[test]
    fn collect_continues_with_partial_data_on_provider_failure() {
        let monitor = monitor_with(Box::new(NullMetricsProvider));
        monitor.record_metric("queue_depth", 5.0, None).unwrap();
        let snapshot = monitor.get_metrics();
        assert!(snapshot.metrics.iter().any(|m| m.name == "queue_depth"));
        assert!(!snapshot.metrics.iter().any(|m| m.name == "cpu_usage_percent"));
    }

    #[test]
    fn healthy_when_all_thresholds_respected() {
        let reading = SystemMetrics {
            cpu_usage_percent: 10.0,
            memory_usage_percent: 10.0,
            memory_usage_bytes: 0,
            available_memory_bytes: 0,
            thread_count: 1,
            timestamp: Instant::now(),
        };
        let monitor = monitor_with(Box::new(StaticMetricsProvider(reading)));
        assert_eq!(monitor.check_health().status, HealthStatus::Healthy);
    }

    #[test]
    fn single_trigger_degrades_two_triggers_unhealthy() {
        let hot = SystemMetrics {
            cpu_usage_percent: 95.0,
            memory_usage_percent: 10.0,
            memory_usage_bytes: 0,
            available_memory_bytes: 0,
            thread_count: 1,
            timestamp: Instant::now(),
        };
        let monitor = monitor_with(Box::new(StaticMetricsProvider(hot)));
        assert_eq!(monitor.check_health().status, HealthStatus::Degraded);

        let both = SystemMetrics {
            cpu_usage_percent: 95.0,
            memory_usage_percent: 95.0,
            memory_usage_bytes: 0,
            available_memory_bytes: 0,
            thread_count: 1,
            timestamp: Instant::now(),
        };
        let monitor = monitor_with(Box::new(StaticMetricsProvider(both)));
        assert_eq!(monitor.check_health().status, HealthStatus::Unhealthy);
    }

    #[test]
    fn reset_clears_profiler_and_metrics() {
        let monitor = monitor_with(Box::new(NullMetricsProvider));
        monitor.record_operation("op", Duration::from_millis(1), true);
        monitor.record_metric("gauge", 1.0, None).unwrap();
        monitor.reset();
        assert!(monitor.profiler().is_empty());
        assert!(monitor.metrics().is_empty());
    }
}
