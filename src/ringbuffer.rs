//! Lock-free bounded ring buffer (C1).
//!
//! Two atomic indices, each isolated on its own cache line to avoid false
//! sharing between the writer(s) and the reader(s). Capacity must be a
//! power of two so index arithmetic can use a bitmask instead of a modulus.
//! One slot is always sacrificed to distinguish "full" from "empty".

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::error::{Error, Result};

/// Bounded retries spent re-attempting a CAS before giving up with
/// `high_contention` (spec.md §4.1).
const MAX_CONTENTION_RETRIES: u32 = 100;

/// Cache-line aligned atomic index (64 bytes on x86_64/ARM64).
#[repr(align(64))]
struct CacheAligned(AtomicU64);

impl CacheAligned {
    fn new(v: u64) -> Self {
        Self(AtomicU64::new(v))
    }
}

/// Configuration for a [`RingBuffer`].
#[derive(Clone, Copy, Debug)]
pub struct RingBufferConfig {
    /// Must be a power of two.
    pub capacity: usize,
    /// When full, overwrite the oldest element instead of failing the write.
    pub overwrite_on_full: bool,
    /// Cap on the size of a single `write_batch` call.
    pub max_batch_size: usize,
}

impl Default for RingBufferConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            overwrite_on_full: false,
            max_batch_size: 256,
        }
    }
}

impl RingBufferConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 || !self.capacity.is_power_of_two() {
            return Err(Error::invalid_configuration(
                "ring buffer capacity must be a non-zero power of two",
            ));
        }
        if self.max_batch_size > self.capacity {
            return Err(Error::invalid_configuration(
                "max_batch_size must not exceed capacity",
            ));
        }
        Ok(())
    }
}

/// Observable counters (spec.md §4.1).
#[derive(Debug, Default)]
pub struct RingBufferStats {
    pub total_writes: AtomicU64,
    pub total_reads: AtomicU64,
    pub overwrites: AtomicU64,
    pub failed_writes: AtomicU64,
    pub failed_reads: AtomicU64,
    pub contention_retries: AtomicU64,
}

/// A snapshot of [`RingBufferStats`] for reporting.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RingBufferStatsSnapshot {
    pub total_writes: u64,
    pub total_reads: u64,
    pub overwrites: u64,
    pub failed_writes: u64,
    pub failed_reads: u64,
    pub contention_retries: u64,
}

impl RingBufferStatsSnapshot {
    pub fn write_success_rate(&self) -> f64 {
        let attempts = self.total_writes + self.failed_writes;
        if attempts == 0 {
            1.0
        } else {
            self.total_writes as f64 / attempts as f64
        }
    }

    pub fn overflow_rate(&self) -> f64 {
        if self.total_writes == 0 {
            0.0
        } else {
            self.overwrites as f64 / self.total_writes as f64
        }
    }
}

/// Bounded FIFO of `T`, safe to write to and read from concurrently.
///
/// Slots are stored behind a mutex-free `Vec<Option<T>>`; only the head/tail
/// indices are contended, via CAS. This keeps the element type unconstrained
/// (no `Copy` bound) while preserving the lock-free index protocol.
pub struct RingBuffer<T> {
    mask: usize,
    write_idx: CacheAligned,
    read_idx: CacheAligned,
    slots: Box<[parking_cell::Slot<T>]>,
    stats: RingBufferStats,
    creation_time: Instant,
    overwrite_on_full: bool,
}

mod parking_cell {
    use std::cell::UnsafeCell;

    /// A single ring-buffer slot. Access is synchronized externally by the
    /// write/read index protocol: only the thread that has just won the CAS
    /// on the corresponding index may touch a given slot.
    pub struct Slot<T>(UnsafeCell<Option<T>>);

    unsafe impl<T: Send> Sync for Slot<T> {}

    impl<T> Slot<T> {
        pub fn new() -> Self {
            Self(UnsafeCell::new(None))
        }

        /// # Safety
        /// Caller must hold exclusive logical ownership of this slot (i.e.
        /// just won the CAS that reserved it).
        pub unsafe fn put(&self, value: T) {
            *self.0.get() = Some(value);
        }

        /// # Safety
        /// Caller must hold exclusive logical ownership of this slot.
        pub unsafe fn take(&self) -> Option<T> {
            (*self.0.get()).take()
        }

        /// # Safety
        /// Caller must hold exclusive logical ownership of this slot.
        pub unsafe fn peek_clone(&self) -> Option<T>
        where
            T: Clone,
        {
            (*self.0.get()).clone()
        }
    }
}

impl<T> RingBuffer<T> {
    pub fn new(config: RingBufferConfig) -> Result<Self> {
        config.validate()?;
        let slots = (0..config.capacity)
            .map(|_| parking_cell::Slot::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ok(Self {
            mask: config.capacity - 1,
            write_idx: CacheAligned::new(0),
            read_idx: CacheAligned::new(0),
            slots,
            stats: RingBufferStats::default(),
            creation_time: Instant::now(),
            overwrite_on_full: config.overwrite_on_full,
        })
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Number of elements currently retrievable.
    pub fn size(&self) -> usize {
        let w = self.write_idx.0.load(Ordering::Acquire);
        let r = self.read_idx.0.load(Ordering::Acquire);
        self.len_from(w, r)
    }

    fn len_from(&self, w: u64, r: u64) -> usize {
        w.wrapping_sub(r) as usize
    }

    /// Writes one element. See spec.md §4.1 for the full contract.
    pub fn write(&self, item: T) -> Result<()> {
        let mut item = Some(item);
        for _ in 0..MAX_CONTENTION_RETRIES {
            let w = self.write_idx.0.load(Ordering::Relaxed);
            let r = self.read_idx.0.load(Ordering::Acquire);
            let full = self.len_from(w, r) >= self.mask;

            if full {
                if self.overwrite_on_full {
                    // Advance the read index by one, discarding the oldest
                    // element, then retry the slot reservation.
                    let new_r = r.wrapping_add(1);
                    if self
                        .read_idx
                        .0
                        .compare_exchange(r, new_r, Ordering::AcqRel, Ordering::Relaxed)
                        .is_ok()
                    {
                        self.stats.overwrites.fetch_add(1, Ordering::Relaxed);
                    } else {
                        self.stats.contention_retries.fetch_add(1, Ordering::Relaxed);
                    }
                    continue;
                } else {
                    self.stats.failed_writes.fetch_add(1, Ordering::Relaxed);
                    return Err(Error::storage_full("ring buffer is full"));
                }
            }

            let new_w = w.wrapping_add(1);
            match self
                .write_idx
                .0
                .compare_exchange(w, new_w, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => {
                    let slot = &self.slots[(w as usize) & self.mask];
                    unsafe { slot.put(item.take().expect("item consumed once")) };
                    self.stats.total_writes.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(_) => {
                    self.stats.contention_retries.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        self.stats.failed_writes.fetch_add(1, Ordering::Relaxed);
        Err(Error::new(
            crate::error::ErrorKind::ResourceUnavailable,
            "high_contention: exhausted contention retries",
        ))
    }

    /// Writes a batch sequentially; stops at the first failure when
    /// overwrite is disabled.
    pub fn write_batch(&self, items: impl IntoIterator<Item = T>) -> Result<usize> {
        let mut written = 0;
        for item in items {
            match self.write(item) {
                Ok(()) => written += 1,
                Err(e) if !self.overwrite_on_full => return Err(e),
                Err(_) => {}
            }
        }
        Ok(written)
    }

    /// Reads (and removes) the oldest element, if any.
    pub fn read(&self) -> Option<T> {
        for _ in 0..MAX_CONTENTION_RETRIES {
            let r = self.read_idx.0.load(Ordering::Relaxed);
            let w = self.write_idx.0.load(Ordering::Acquire);
            if r == w {
                self.stats.failed_reads.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            let new_r = r.wrapping_add(1);
            match self
                .read_idx
                .0
                .compare_exchange(r, new_r, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => {
                    let slot = &self.slots[(r as usize) & self.mask];
                    let item = unsafe { slot.take() };
                    self.stats.total_reads.fetch_add(1, Ordering::Relaxed);
                    return item;
                }
                Err(_) => {
                    self.stats.contention_retries.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        self.stats.failed_reads.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Non-destructive read of the head element.
    pub fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        let r = self.read_idx.0.load(Ordering::Acquire);
        let w = self.write_idx.0.load(Ordering::Acquire);
        if r == w {
            return None;
        }
        let slot = &self.slots[(r as usize) & self.mask];
        unsafe { slot.peek_clone() }
    }

    pub fn stats_snapshot(&self) -> RingBufferStatsSnapshot {
        RingBufferStatsSnapshot {
            total_writes: self.stats.total_writes.load(Ordering::Relaxed),
            total_reads: self.stats.total_reads.load(Ordering::Relaxed),
            overwrites: self.stats.overwrites.load(Ordering::Relaxed),
            failed_writes: self.stats.failed_writes.load(Ordering::Relaxed),
            failed_reads: self.stats.failed_reads.load(Ordering::Relaxed),
            contention_retries: self.stats.contention_retries.load(Ordering::Relaxed),
        }
    }

    pub fn creation_time(&self) -> Instant {
        self.creation_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rb(capacity: usize, overwrite: bool) -> RingBuffer<i32> {
        RingBuffer::new(RingBufferConfig {
            capacity,
            overwrite_on_full: overwrite,
            max_batch_size: capacity,
        })
        .unwrap()
    }

    #[test]
    fn rejects_non_power_of_two_capacity() {
        let err = RingBuffer::<i32>::new(RingBufferConfig {
            capacity: 10,
            overwrite_on_full: false,
            max_batch_size: 10,
        })
        .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidConfiguration);
    }

    #[test]
    fn fifo_order_is_preserved() {
        let b = rb(8, false);
        for i in 0..5 {
            b.write(i).unwrap();
        }
        for i in 0..5 {
            assert_eq!(b.read(), Some(i));
        }
        assert_eq!(b.read(), None);
    }

    #[test]
    fn full_without_overwrite_fails() {
        let b = rb(4, false);
        for i in 0..3 {
            b.write(i).unwrap();
        }
        let err = b.write(99).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::StorageFull);
    }

    // S2 from spec.md §8: capacity 8 (usable 7), overwrite on, write 1..=10.
    #[test]
    fn scenario_s2_ring_buffer_overflow_with_overwrite() {
        let b = rb(8, true);
        for i in 1..=10 {
            b.write(i).unwrap();
        }
        let snap = b.stats_snapshot();
        assert_eq!(snap.overwrites, 3);

        let mut out = Vec::new();
        while let Some(v) = b.read() {
            out.push(v);
        }
        assert_eq!(out, vec![4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn peek_does_not_remove() {
        let b = rb(4, false);
        b.write(7).unwrap();
        assert_eq!(b.peek(), Some(7));
        assert_eq!(b.peek(), Some(7));
        assert_eq!(b.read(), Some(7));
        assert_eq!(b.peek(), None);
    }

    #[test]
    fn write_batch_stops_on_first_failure_without_overwrite() {
        let b = rb(4, false);
        let written = b.write_batch(0..10).unwrap();
        assert_eq!(written, 3);
    }
}
