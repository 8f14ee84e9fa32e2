//! Statistics kernel (C2): deterministic, side-effect free duration stats.

use std::time::Duration;

/// Summary statistics over a non-empty sample set.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DurationStats {
    pub min: Duration,
    pub max: Duration,
    pub mean: Duration,
    pub median: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub total: Duration,
}

/// Computes [`DurationStats`] over an unsorted, non-empty slice of durations.
///
/// Percentiles use nearest-rank on a sorted copy: `sorted[floor((k/100)*(n-1))]`.
/// Returns `None` for an empty slice — there is no meaningful statistic.
pub fn compute(samples: &[Duration]) -> Option<DurationStats> {
    if samples.is_empty() {
        return None;
    }

    let mut sorted = samples.to_vec();
    sorted.sort_unstable();

    let n = sorted.len();
    let total: Duration = sorted.iter().sum();
    let mean = total / n as u32;
    let min = sorted[0];
    let max = sorted[n - 1];
    let median = percentile(&sorted, 50.0);
    let p95 = percentile(&sorted, 95.0);
    let p99 = percentile(&sorted, 99.0);

    Some(DurationStats {
        min,
        max,
        mean,
        median,
        p95,
        p99,
        total,
    })
}

/// Nearest-rank percentile over an already-sorted slice.
fn percentile(sorted: &[Duration], pct: f64) -> Duration {
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
    fn empty_input_is_none() {
        assert!(compute(&[]).is_none());
    }

    #[test]
    fn single_sample_all_percentiles_equal() {
        let d = Duration::from_nanos(42);
        let stats = compute(&[d]).unwrap();
        assert_eq!(stats.min, d);
        assert_eq!(stats.max, d);
        assert_eq!(stats.mean, d);
        assert_eq!(stats.median, d);
        assert_eq!(stats.p95, d);
        assert_eq!(stats.p99, d);
    }

    // S1 from spec.md §8.
    #[test]
    fn scenario_s1_profiler_record_and_query() {
        let samples: Vec<Duration> = [1, 2, 3, 4, 5]
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect();
        let stats = compute(&samples).unwrap();
        assert_eq!(stats.min, Duration::from_millis(1));
        assert_eq!(stats.max, Duration::from_millis(5));
        assert_eq!(stats.mean, Duration::from_millis(3));
        assert_eq!(stats.median, Duration::from_millis(3));
        assert_eq!(stats.p95, Duration::from_millis(5));
        assert_eq!(stats.p99, Duration::from_millis(5));
    }

    #[test]
    fn unsorted_input_is_handled() {
        let samples: Vec<Duration> = [5, 1, 4, 2, 3]
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect();
        let stats = compute(&samples).unwrap();
        assert_eq!(stats.min, Duration::from_millis(1));
        assert_eq!(stats.max, Duration::from_millis(5));
    }
}
