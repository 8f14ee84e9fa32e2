//! Tagged-metric store (C5): counters, gauges and histograms keyed by
//! canonicalized `(name, tags)` identity.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use crate::error::{Error, Result};

/// An ordered tag set; key order is insignificant for identity (tags are
/// sorted before hashing/display) but preserved here for iteration.
pub type Tags = BTreeMap<String, String>;

/// The kind of a tagged metric (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

/// A read-only view of one histogram bucket.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HistogramBucket {
    /// `None` marks the overflow bucket (values above the last boundary).
    pub upper_bound: Option<f64>,
    pub count: u64,
}

/// A point-in-time copy of one metric cell, with its kind attached.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricValue {
    pub name: String,
    pub tags: Tags,
    pub kind: MetricKind,
    pub value: f64,
    pub buckets: Vec<HistogramBucket>,
    pub sum: f64,
    pub count: u64,
}

fn identity_key(name: &str, tags: &Tags) -> String {
    let mut key = name.to_string();
    for (k, v) in tags {
        key.push(';');
        key.push_str(k);
        key.push('=');
        key.push_str(v);
    }
    key
}

enum Cell {
    Counter(AtomicU64 /* bits of f64 */),
    Gauge(AtomicU64 /* bits of f64 */),
    Histogram(Mutex<HistogramState>),
}

struct HistogramState {
    boundaries: Vec<f64>,
    counts: Vec<u64>, // len = boundaries.len() + 1 (last is overflow)
    sum: f64,
    count: u64,
}

impl HistogramState {
    fn new(boundaries: Vec<f64>) -> Self {
        let counts = vec![0; boundaries.len() + 1];
        Self {
            boundaries,
            counts,
            sum: 0.0,
            count: 0,
        }
    }

    fn observe(&mut self, value: f64) {
        let bucket = self
            .boundaries
            .iter()
            .position(|&b| b >= value)
            .unwrap_or(self.boundaries.len());
        self.counts[bucket] += 1;
        self.sum += value;
        self.count += 1;
    }
}

fn load_f64(a: &AtomicU64) -> f64 {
    f64::from_bits(a.load(Ordering::Relaxed))
}

fn store_f64(a: &AtomicU64, v: f64) {
    a.store(v.to_bits(), Ordering::Relaxed);
}

fn add_f64(a: &AtomicU64, delta: f64) {
    loop {
        let cur = a.load(Ordering::Relaxed);
        let new = (f64::from_bits(cur) + delta).to_bits();
        if a
            .compare_exchange_weak(cur, new, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            return;
        }
    }
}

struct Entry {
    name: String,
    tags: Tags,
    kind: MetricKind,
    cell: Cell,
}

/// Thread-safe store indexed by `(name, sorted tags)` identity.
pub struct MetricStore {
    entries: RwLock<BTreeMap<String, Entry>>,
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    fn get_or_create<'a>(
        &self,
        name: &str,
        tags: &Tags,
        kind: MetricKind,
        make_cell: impl FnOnce() -> Cell,
    ) -> Result<()> {
        let key = identity_key(name, tags);
        {
            let entries = self.entries.read().expect("metric store poisoned");
            if let Some(e) = entries.get(&key) {
                if e.kind != kind {
                    return Err(Error::already_exists(format!(
                        "metric '{name}' already exists with a different kind"
                    )));
                }
                return Ok(());
            }
        }
        let mut entries = self.entries.write().expect("metric store poisoned");
        if entries.contains_key(&key) {
            return Ok(());
        }
        let _ = entries.insert(
            key,
            Entry {
                name: name.to_string(),
                tags: tags.clone(),
                kind,
                cell: make_cell(),
            },
        );
        Ok(())
    }

    pub fn counter_add(&self, name: &str, tags: &Tags, delta: f64) -> Result<()> {
        self.get_or_create(name, tags, MetricKind::Counter, || {
            Cell::Counter(AtomicU64::new(0.0_f64.to_bits()))
        })?;
        let key = identity_key(name, tags);
        let entries = self.entries.read().expect("metric store poisoned");
        match &entries.get(&key).expect("just inserted").cell {
            Cell::Counter(a) => add_f64(a, delta),
            _ => unreachable!("kind checked by get_or_create"),
        }
        Ok(())
    }

    pub fn gauge_set(&self, name: &str, tags: &Tags, value: f64) -> Result<()> {
        self.get_or_create(name, tags, MetricKind::Gauge, || {
            Cell::Gauge(AtomicU64::new(0.0_f64.to_bits()))
        })?;
        let key = identity_key(name, tags);
        let entries = self.entries.read().expect("metric store poisoned");
        match &entries.get(&key).expect("just inserted").cell {
            Cell::Gauge(a) => store_f64(a, value),
            _ => unreachable!("kind checked by get_or_create"),
        }
        Ok(())
    }

    pub fn histogram_observe(
        &self,
        name: &str,
        tags: &Tags,
        value: f64,
        boundaries: &[f64],
    ) -> Result<()> {
        self.get_or_create(name, tags, MetricKind::Histogram, || {
            Cell::Histogram(Mutex::new(HistogramState::new(boundaries.to_vec())))
        })?;
        let key = identity_key(name, tags);
        let entries = self.entries.read().expect("metric store poisoned");
        match &entries.get(&key).expect("just inserted").cell {
            Cell::Histogram(m) => m.lock().expect("histogram poisoned").observe(value),
            _ => unreachable!("kind checked by get_or_create"),
        }
        Ok(())
    }

    pub fn clear(&self) {
        self.entries.write().expect("metric store poisoned").clear();
    }

    /// A consistent snapshot of every metric currently stored.
    pub fn snapshot(&self) -> Vec<MetricValue> {
        let entries = self.entries.read().expect("metric store poisoned");
        entries
            .values()
            .map(|e| match &e.cell {
                Cell::Counter(a) => MetricValue {
                    name: e.name.clone(),
                    tags: e.tags.clone(),
                    kind: MetricKind::Counter,
                    value: load_f64(a),
                    buckets: vec![],
                    sum: 0.0,
                    count: 0,
                },
                Cell::Gauge(a) => MetricValue {
                    name: e.name.clone(),
                    tags: e.tags.clone(),
                    kind: MetricKind::Gauge,
                    value: load_f64(a),
                    buckets: vec![],
                    sum: 0.0,
                    count: 0,
                },
                Cell::Histogram(m) => {
                    let h = m.lock().expect("histogram poisoned");
                    let mut buckets: Vec<HistogramBucket> = h
                        .boundaries
                        .iter()
                        .zip(h.counts.iter())
                        .map(|(b, c)| HistogramBucket {
                            upper_bound: Some(*b),
                            count: *c,
                        })
                        .collect();
                    buckets.push(HistogramBucket {
                        upper_bound: None,
                        count: *h.counts.last().expect("overflow bucket always present"),
                    });
                    MetricValue {
                        name: e.name.clone(),
                        tags: e.tags.clone(),
                        kind: MetricKind::Histogram,
                        value: 0.0,
                        buckets,
                        sum: h.sum,
                        count: h.count,
                    }
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("metric store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
