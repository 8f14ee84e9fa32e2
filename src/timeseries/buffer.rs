//! Time-series buffer (C3): fixed-capacity ring of timestamped points.

use std::collections::VecDeque;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// A single timestamped sample. `sample_count > 1` marks a downsampled point
/// produced by aggregating several raw samples (see `timeseries::store`).
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeSeriesPoint {
    pub timestamp: Instant,
    pub value: f64,
    pub sample_count: u32,
}

impl TimeSeriesPoint {
    pub fn new(value: f64, timestamp: Instant) -> Self {
        Self {
            timestamp,
            value,
            sample_count: 1,
        }
    }
}

/// Aggregate statistics over the current contents of a buffer.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeSeriesStatistics {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Configuration shared by [`TimeSeriesBuffer`] and `timeseries::store::TimeSeriesStore`.
#[derive(Clone, Copy, Debug)]
pub struct TimeSeriesConfig {
    pub retention: Duration,
    pub resolution: Duration,
    pub max_points: u32,
    pub enable_compression: bool,
    pub compression_threshold: f64,
}

impl Default for TimeSeriesConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(3600),
            resolution: Duration::from_secs(1),
            max_points: 3600,
            enable_compression: false,
            compression_threshold: 0.1,
        }
    }
}

impl TimeSeriesConfig {
    pub fn validate(&self) -> Result<()> {
        if self.resolution.is_zero() {
            return Err(Error::invalid_configuration(
                "resolution must be at least 1ns",
            ));
        }
        if self.max_points == 0 {
            return Err(Error::invalid_configuration("max_points must be >= 1"));
        }
        if !(0.0..=1.0).contains(&self.compression_threshold) {
            return Err(Error::invalid_configuration(
                "compression_threshold must be in [0, 1]",
            ));
        }
        Ok(())
    }
}

/// A fixed-capacity, thread-safe ring of [`TimeSeriesPoint`]s, guarded by a
/// single reader-writer lock (spec.md §4.3): readers run concurrently,
/// writers take the write lock briefly.
pub struct TimeSeriesBuffer {
    max_points: usize,
    points: RwLock<VecDeque<TimeSeriesPoint>>,
}

impl TimeSeriesBuffer {
    pub fn new(max_points: usize) -> Self {
        Self {
            max_points: max_points.max(1),
            points: RwLock::new(VecDeque::new()),
        }
    }

    /// Appends a value, evicting the oldest point if at capacity.
    pub fn add(&self, value: f64, timestamp: Instant) {
        let mut points = self.points.write().expect("time-series buffer poisoned");
        if points.len() >= self.max_points {
            let _ = points.pop_front();
        }
        points.push_back(TimeSeriesPoint::new(value, timestamp));
    }

    pub fn latest(&self) -> Option<TimeSeriesPoint> {
        self.points
            .read()
            .expect("time-series buffer poisoned")
            .back()
            .copied()
    }

    /// All points whose timestamp falls within `duration` of now, sorted by
    /// timestamp.
    pub fn samples_within(&self, duration: Duration, now: Instant) -> Vec<TimeSeriesPoint> {
        let cutoff = now.checked_sub(duration).unwrap_or(now);
        let mut out: Vec<TimeSeriesPoint> = self
            .points
            .read()
            .expect("time-series buffer poisoned")
            .iter()
            .filter(|p| p.timestamp >= cutoff)
            .copied()
            .collect();
        out.sort_by_key(|p| p.timestamp);
        out
    }

    pub fn statistics(&self) -> Option<TimeSeriesStatistics> {
        let points = self.points.read().expect("time-series buffer poisoned");
        if points.is_empty() {
            return None;
        }
        let mut values: Vec<f64> = points.iter().map(|p| p.value).collect();
        values.sort_by(|a, b| a.total_cmp(b));

        let n = values.len();
        let sum: f64 = values.iter().sum();
        let mean = sum / n as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;

        Some(TimeSeriesStatistics {
            count: n,
            min: values[0],
            max: values[n - 1],
            mean,
            stddev: variance.sqrt(),
            p95: percentile(&values, 95.0),
            p99: percentile(&values, 99.0),
        })
    }

    pub fn clear(&self) {
        self.points.write().expect("time-series buffer poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.points.read().expect("time-series buffer poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.max_points
    }

    /// Rough resident size in bytes: point count times the size of one point.
    pub fn memory_footprint(&self) -> usize {
        self.len() * std::mem::size_of::<TimeSeriesPoint>()
    }

    /// Snapshot of all points in timestamp order, used by `timeseries::store`.
    pub(crate) fn snapshot(&self) -> Vec<TimeSeriesPoint> {
        let mut out: Vec<TimeSeriesPoint> = self
            .points
            .read()
            .expect("time-series buffer poisoned")
            .iter()
            .copied()
            .collect();
        out.sort_by_key(|p| p.timestamp);
        out
    }

    pub(crate) fn evict_front_while(&self, mut predicate: impl FnMut(&TimeSeriesPoint) -> bool) {
        let mut points = self.points.write().expect("time-series buffer poisoned");
        while let Some(front) = points.front() {
            if predicate(front) {
                let _ = points.pop_front();
            } else {
                break;
            }
        }
    }
}

fn percentile(sorted: &[f64], pct: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let rank = ((pct / 100.0) * (n - 1) as f64).floor() as usize;
    sorted[rank.min(n - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_at_capacity() {
        let buf = TimeSeriesBuffer::new(3);
        let base = Instant::now();
        for i in 0..5 {
            buf.add(i as f64, base + Duration::from_secs(i));
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.latest().unwrap().value, 4.0);
    }

    #[test]
    fn statistics_computes_population_stddev() {
        let buf = TimeSeriesBuffer::new(10);
        let base = Instant::now();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            buf.add(v, base);
        }
        let stats = buf.statistics().unwrap();
        assert_eq!(stats.count, 8);
        assert!((stats.mean - 5.0).abs() < 1e-9);
        assert!((stats.stddev - 2.0).abs() < 1e-9);
    }

    #[test]
    fn samples_within_filters_and_sorts() {
        let buf = TimeSeriesBuffer::new(10);
        let base = Instant::now();
        buf.add(1.0, base);
        buf.add(2.0, base + Duration::from_secs(5));
        buf.add(3.0, base + Duration::from_secs(100));
        let now = base + Duration::from_secs(100);
        let within = buf.samples_within(Duration::from_secs(10), now);
        assert_eq!(within.len(), 1);
        assert_eq!(within[0].value, 3.0);
    }
}
