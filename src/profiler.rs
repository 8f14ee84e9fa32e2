//! Profiler (C4): per-operation sample storage with LRU eviction.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::stats::{self, DurationStats};

/// A snapshot of one operation's aggregated metrics.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OperationMetrics {
    pub name: String,
    pub call_count: u64,
    pub error_count: u64,
    pub stats: Option<DurationStats>,
}

struct ProfileEntry {
    call_count: AtomicU64,
    error_count: AtomicU64,
    samples: Mutex<VecDeque<Duration>>,
    max_samples: usize,
    last_access: AtomicU64,
}

impl ProfileEntry {
    fn new(max_samples: usize, tick: u64) -> Self {
        Self {
            call_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            samples: Mutex::new(VecDeque::with_capacity(max_samples.min(4096))),
            max_samples,
            last_access: AtomicU64::new(tick),
        }
    }

    fn record(&self, duration: Duration, success: bool, tick: u64) {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        let mut samples = self.samples.lock().expect("profile entry poisoned");
        if samples.len() >= self.max_samples {
            let _ = samples.pop_front();
        }
        samples.push_back(duration);
        self.last_access.store(tick, Ordering::Relaxed);
    }

    fn snapshot(&self, name: &str, tick: u64) -> OperationMetrics {
        let samples: Vec<Duration> = self
            .samples
            .lock()
            .expect("profile entry poisoned")
            .iter()
            .copied()
            .collect();
        self.last_access.store(tick, Ordering::Relaxed);
        OperationMetrics {
            name: name.to_string(),
            call_count: self.call_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            stats: stats::compute(&samples),
        }
    }

    fn clear(&self) {
        self.samples.lock().expect("profile entry poisoned").clear();
        self.call_count.store(0, Ordering::Relaxed);
        self.error_count.store(0, Ordering::Relaxed);
    }
}

/// Configuration for a [`Profiler`].
#[derive(Clone, Copy, Debug)]
pub struct ProfilerConfig {
    pub max_profiles: usize,
    pub max_samples_per_operation: usize,
    pub enabled: bool,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            max_profiles: 256,
            max_samples_per_operation: 1024,
            enabled: true,
        }
    }
}

impl ProfilerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_profiles == 0 {
            return Err(Error::invalid_configuration("max_profiles must be >= 1"));
        }
        if self.max_samples_per_operation == 0 {
            return Err(Error::invalid_configuration(
                "max_samples_per_operation must be >= 1",
            ));
        }
        Ok(())
    }
}

/// Thread-safe, bounded per-operation profile store with LRU eviction.
pub struct Profiler {
    config: ProfilerConfig,
    entries: RwLock<HashMap<String, ProfileEntry>>,
    clock: AtomicU64,
    enabled: AtomicBool,
}

impl Profiler {
    pub fn new(config: ProfilerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            enabled: AtomicBool::new(config.enabled),
            config,
            entries: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(0),
        })
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Records one sample for `name`. A disabled profiler succeeds silently
    /// without side effects (spec.md §4.4).
    pub fn record_sample(&self, name: &str, duration: Duration, success: bool) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        let tick = self.tick();

        // Hot path: shared lock only.
        {
            let entries = self.entries.read().expect("profiler map poisoned");
            if let Some(entry) = entries.get(name) {
                entry.record(duration, success, tick);
                return;
            }
        }

        // Miss: upgrade to exclusive lock, double-check, possibly evict LRU.
        let mut entries = self.entries.write().expect("profiler map poisoned");
        if let Some(entry) = entries.get(name) {
            entry.record(duration, success, tick);
            return;
        }
        if entries.len() >= self.config.max_profiles {
            if let Some(lru_name) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_access.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone())
            {
                log::debug!("profiler: evicting LRU operation {lru_name}");
                let _ = entries.remove(&lru_name);
            }
        }
        let entry = ProfileEntry::new(self.config.max_samples_per_operation, tick);
        entry.record(duration, success, tick);
        let _ = entries.insert(name.to_string(), entry);
    }

    /// Returns `not_found` for an unknown operation (spec.md §4.4/§7).
    pub fn get_metrics(&self, name: &str) -> Result<OperationMetrics> {
        let tick = self.tick();
        let entries = self.entries.read().expect("profiler map poisoned");
        entries
            .get(name)
            .map(|e| e.snapshot(name, tick))
            .ok_or_else(|| Error::not_found(format!("no profile for operation '{name}'")))
    }

    /// Snapshots every entry, taking only that entry's own lock at a time —
    /// never the map lock and an entry lock simultaneously.
    pub fn get_all_metrics(&self) -> Vec<OperationMetrics> {
        let tick = self.tick();
        let entries = self.entries.read().expect("profiler map poisoned");
        entries
            .iter()
            .map(|(name, entry)| entry.snapshot(name, tick))
            .collect()
    }

    pub fn clear_samples(&self, name: &str) -> Result<()> {
        let entries = self.entries.read().expect("profiler map poisoned");
        entries
            .get(name)
            .map(|e| e.clear())
            .ok_or_else(|| Error::not_found(format!("no profile for operation '{name}'")))
    }

    pub fn clear_all(&self) {
        self.entries.write().expect("profiler map poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("profiler map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profiler() -> Profiler {
        Profiler::new(ProfilerConfig::default()).unwrap()
    }

    // S1 from spec.md §8.
    #[test]
    fn scenario_s1_profiler_record_and_query() {
        let p = profiler();
        for ms in [1, 2, 3, 4, 5] {
            p.record_sample("work", Duration::from_millis(ms), true);
        }
        let m = p.get_metrics("work").unwrap();
        assert_eq!(m.call_count, 5);
        assert_eq!(m.error_count, 0);
        let s = m.stats.unwrap();
        assert_eq!(s.min, Duration::from_millis(1));
        assert_eq!(s.max, Duration::from_millis(5));
        assert_eq!(s.mean, Duration::from_millis(3));
        assert_eq!(s.median, Duration::from_millis(3));
        assert_eq!(s.p95, Duration::from_millis(5));
        assert_eq!(s.p99, Duration::from_millis(5));
    }

    #[test]
    fn unknown_operation_is_not_found() {
        let p = profiler();
        let err = p.get_metrics("nope").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);
    }

    #[test]
    fn error_count_never_exceeds_call_count() {
        let p = profiler();
        p.record_sample("op", Duration::from_millis(1), false);
        p.record_sample("op", Duration::from_millis(1), true);
        let m = p.get_metrics("op").unwrap();
        assert_eq!(m.call_count, 2);
        assert_eq!(m.error_count, 1);
        assert!(m.error_count <= m.call_count);
    }

    #[test]
    fn disabled_profiler_drops_samples_silently() {
        let p = profiler();
        p.set_enabled(false);
        p.record_sample("op", Duration::from_millis(1), true);
        assert!(p.get_metrics("op").is_err());
    }

    #[test]
    fn lru_eviction_when_over_capacity() {
        let p = Profiler::new(ProfilerConfig {
            max_profiles: 2,
            max_samples_per_operation: 16,
            enabled: true,
        })
        .unwrap();
        p.record_sample("a", Duration::from_millis(1), true);
        p.record_sample("b", Duration::from_millis(1), true);
        // touch `a` again so `b` becomes the least-recently-accessed.
        p.record_sample("a", Duration::from_millis(1), true);
        p.record_sample("c", Duration::from_millis(1), true);

        assert_eq!(p.len(), 2);
        assert!(p.get_metrics("a").is_ok());
        assert!(p.get_metrics("c").is_ok());
        assert!(p.get_metrics("b").is_err());
    }

    #[test]
    fn sample_window_is_bounded() {
        let p = Profiler::new(ProfilerConfig {
            max_profiles: 4,
            max_samples_per_operation: 3,
            enabled: true,
        })
        .unwrap();
        for ms in 1..=10 {
            p.record_sample("op", Duration::from_millis(ms), true);
        }
        let m = p.get_metrics("op").unwrap();
        assert_eq!(m.call_count, 10);
        // only the last 3 samples (8, 9, 10ms) remain in the window.
        assert_eq!(m.stats.unwrap().min, Duration::from_millis(8));
    }
}
