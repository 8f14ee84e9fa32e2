//! Time-series store (C8): retention, downsampling and range queries over
//! a [`TimeSeriesBuffer`] (C3).

use std::time::{Duration, Instant};

use super::buffer::{TimeSeriesBuffer, TimeSeriesConfig, TimeSeriesPoint};
use crate::error::Result;

/// A range query against a [`TimeSeriesStore`].
#[derive(Clone, Copy, Debug)]
pub struct TimeSeriesQuery {
    pub start: Instant,
    pub end: Instant,
    /// Bucket width. `None` (or `<= resolution`) returns raw points.
    pub step: Option<Duration>,
}

/// The result of a [`TimeSeriesQuery`].
#[derive(Clone, Debug)]
pub struct TimeSeriesQueryResult {
    pub points: Vec<TimeSeriesPoint>,
    pub total_samples: u64,
}

impl TimeSeriesQueryResult {
    pub fn average(&self) -> Option<f64> {
        if self.points.is_empty() {
            return None;
        }
        let sum: f64 = self.points.iter().map(|p| p.value).sum();
        Some(sum / self.points.len() as f64)
    }

    /// Difference of last minus first value, divided by elapsed seconds.
    pub fn rate(&self) -> Option<f64> {
        let first = self.points.first()?;
        let last = self.points.last()?;
        let elapsed = last.timestamp.duration_since(first.timestamp).as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        Some((last.value - first.value) / elapsed)
    }
}

/// Retention- and downsampling-aware wrapper around [`TimeSeriesBuffer`].
pub struct TimeSeriesStore {
    config: TimeSeriesConfig,
    buffer: TimeSeriesBuffer,
}

impl TimeSeriesStore {
    pub fn new(config: TimeSeriesConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            buffer: TimeSeriesBuffer::new(config.max_points as usize),
            config,
        })
    }

    /// Appends one point and prunes to satisfy both the `max_points` and
    /// `retention` invariants.
    pub fn add_point(&self, value: f64, timestamp: Instant) {
        self.buffer.add(value, timestamp);
        self.prune(timestamp);
    }

    /// Appends a batch, pruning once afterwards (O(n) instead of O(n) prunes).
    pub fn add_points(&self, batch: impl IntoIterator<Item = (f64, Instant)>) {
        let mut last_ts = None;
        for (value, timestamp) in batch {
            self.buffer.add(value, timestamp);
            last_ts = Some(timestamp);
        }
        if let Some(ts) = last_ts {
            self.prune(ts);
        }
    }

    fn prune(&self, now: Instant) {
        let retention = self.config.retention;
        self.buffer
            .evict_front_while(|p| now.saturating_duration_since(p.timestamp) > retention);
    }

    /// Explicit garbage-collection pass, for callers that don't write on a
    /// steady cadence.
    pub fn gc(&self, now: Instant) {
        self.prune(now);
    }

    pub fn query(&self, query: TimeSeriesQuery) -> TimeSeriesQueryResult {
        let raw: Vec<TimeSeriesPoint> = self
            .buffer
            .snapshot()
            .into_iter()
            .filter(|p| p.timestamp >= query.start && p.timestamp <= query.end)
            .collect();

        let total_samples = raw.iter().map(|p| p.sample_count as u64).sum();

        let step = match query.step {
            Some(step) if step > self.config.resolution => step,
            _ => {
                return TimeSeriesQueryResult {
                    points: raw,
                    total_samples,
                };
            }
        };

        let mut points = Vec::new();
        let mut bucket_start = query.start;
        while bucket_start < query.end {
            let bucket_end = bucket_start + step;
            let in_bucket: Vec<&TimeSeriesPoint> = raw
                .iter()
                .filter(|p| p.timestamp >= bucket_start && p.timestamp < bucket_end)
                .collect();
            if !in_bucket.is_empty() {
                let sum: f64 = in_bucket.iter().map(|p| p.value).sum();
                points.push(TimeSeriesPoint {
                    timestamp: bucket_start,
                    value: sum / in_bucket.len() as f64,
                    sample_count: in_bucket.len() as u32,
                });
            }
            bucket_start = bucket_end;
        }

        TimeSeriesQueryResult {
            points,
            total_samples,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // S5 from spec.md §8.
    #[test]
    fn scenario_s5_time_series_aggregation() {
        let store = TimeSeriesStore::new(TimeSeriesConfig {
            retention: Duration::from_secs(3600),
            resolution: Duration::from_nanos(1),
            max_points: 3600,
            enable_compression: false,
            compression_threshold: 0.1,
        })
        .unwrap();

        let t0 = Instant::now();
        for i in 0..60 {
            store.add_point(i as f64, t0 + Duration::from_secs(i));
        }

        let result = store.query(TimeSeriesQuery {
            start: t0,
            end: t0 + Duration::from_secs(60),
            step: Some(Duration::from_secs(10)),
        });

        assert_eq!(result.points.len(), 6);
        for p in &result.points {
            assert_eq!(p.sample_count, 10);
        }
        assert!((result.points[0].value - 4.5).abs() < 1e-9);
    }

    #[test]
    fn raw_query_when_step_at_or_below_resolution() {
        let store = TimeSeriesStore::new(TimeSeriesConfig {
            resolution: Duration::from_secs(1),
            ..TimeSeriesConfig::default()
        })
        .unwrap();
        let t0 = Instant::now();
        store.add_point(1.0, t0);
        store.add_point(2.0, t0 + Duration::from_millis(500));

        let result = store.query(TimeSeriesQuery {
            start: t0,
            end: t0 + Duration::from_secs(1),
            step: Some(Duration::from_millis(500)),
        });
        assert_eq!(result.points.len(), 2);
    }

    #[test]
    fn retention_prunes_old_points() {
        let store = TimeSeriesStore::new(TimeSeriesConfig {
            retention: Duration::from_secs(10),
            resolution: Duration::from_nanos(1),
            max_points: 1000,
            enable_compression: false,
            compression_threshold: 0.1,
        })
        .unwrap();

        let t0 = Instant::now();
        store.add_point(1.0, t0);
        store.add_point(2.0, t0 + Duration::from_secs(20));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn rate_and_average_helpers() {
        let store = TimeSeriesStore::new(TimeSeriesConfig::default()).unwrap();
        let t0 = Instant::now();
        store.add_point(10.0, t0);
        store.add_point(20.0, t0 + Duration::from_secs(10));

        let result = store.query(TimeSeriesQuery {
            start: t0,
            end: t0 + Duration::from_secs(10),
            step: None,
        });
        assert_eq!(result.average(), Some(15.0));
        assert_eq!(result.rate(), Some(1.0));
    }
}
