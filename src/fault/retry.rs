//! Retry executor (C11 §4.11): pluggable backoff strategies with jitter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;

use crate::error::{Error, ErrorKind, Result};

/// A backoff strategy for computing the base delay of a given attempt
/// (1-indexed).
pub enum BackoffStrategy {
    Fixed,
    Exponential { multiplier: f64 },
    Linear,
    Fibonacci,
    RandomJitter,
    Custom(Box<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl std::fmt::Debug for BackoffStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackoffStrategy::Fixed => write!(f, "Fixed"),
            BackoffStrategy::Exponential { multiplier } => {
                write!(f, "Exponential {{ multiplier: {multiplier} }}")
            }
            BackoffStrategy::Linear => write!(f, "Linear"),
            BackoffStrategy::Fibonacci => write!(f, "Fibonacci"),
            BackoffStrategy::RandomJitter => write!(f, "RandomJitter"),
            BackoffStrategy::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Configuration for a [`RetryExecutor`].
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    pub jitter_factor: f64,
    pub retryable_predicate: Option<Box<dyn Fn(ErrorKind) -> bool + Send + Sync>>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            strategy: BackoffStrategy::Exponential { multiplier: 2.0 },
            jitter_factor: 0.1,
            retryable_predicate: None,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::invalid_configuration("max_attempts must be >= 1"));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(Error::invalid_configuration(
                "jitter_factor must be in [0, 1]",
            ));
        }
        Ok(())
    }

    fn is_retryable(&self, kind: ErrorKind) -> bool {
        match &self.retryable_predicate {
            Some(predicate) => predicate(kind),
            None => kind.is_retryable_by_default(),
        }
    }
}

/// Statistics accumulated across all [`RetryExecutor::execute`] calls.
#[derive(Debug, Default)]
struct RetryStats {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    total_wait: Mutex<Duration>,
}

/// A point-in-time read of [`RetryExecutor`] counters.
#[derive(Clone, Copy, Debug)]
pub struct RetryStatsSnapshot {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_wait: Duration,
}

/// Computes backoff delays and drives the retry loop (§4.11).
pub struct RetryExecutor {
    config: RetryConfig,
    fib_cache: Mutex<Vec<u64>>,
    stats: RetryStats,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            fib_cache: Mutex::new(vec![0, 1]),
            stats: RetryStats::default(),
        })
    }

    fn memoized_fib(&self, n: u32) -> u64 {
        let mut cache = self.fib_cache.lock().expect("retry executor poisoned");
        while cache.len() <= n as usize {
            let next = cache[cache.len() - 1].saturating_add(cache[cache.len() - 2]);
            cache.push(next);
        }
        cache[n as usize]
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        match &self.config.strategy {
            BackoffStrategy::Fixed => self.config.initial_delay,
            BackoffStrategy::Exponential { multiplier } => {
                let scaled = self.config.initial_delay.as_secs_f64() * multiplier.powi(attempt as i32 - 1);
                Duration::from_secs_f64(scaled.max(0.0))
            }
            BackoffStrategy::Linear => self.config.initial_delay.saturating_mul(attempt),
            BackoffStrategy::Fibonacci => self
                .config
                .initial_delay
                .saturating_mul(self.memoized_fib(attempt) as u32),
            BackoffStrategy::RandomJitter => {
                let lo = self.config.initial_delay.as_secs_f64();
                let hi = self.config.max_delay.as_secs_f64().max(lo);
                Duration::from_secs_f64(rand::thread_rng().gen_range(lo..=hi))
            }
            BackoffStrategy::Custom(f) => f(attempt),
        }
    }

    /// Applies symmetric jitter and clamps to `[0, max_delay]`.
    fn compute_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt).as_secs_f64();
        let jitter = base * self.config.jitter_factor;
        let delta = rand::thread_rng().gen_range(-jitter..=jitter);
        let delayed = (base + delta).max(0.0);
        Duration::from_secs_f64(delayed).min(self.config.max_delay)
    }

    /// Runs `op` up to `max_attempts` times, consulting `retryable_predicate`
    /// between attempts and sleeping the computed backoff before retrying.
    pub fn execute<T>(&self, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut last_err = None;
        for attempt in 1..=self.config.max_attempts {
            self.stats.attempts.fetch_add(1, Ordering::Relaxed);
            match op() {
                Ok(value) => {
                    self.stats.successes.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                }
                Err(err) => {
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    let retryable = self.config.is_retryable(err.kind);
                    let attempts_left = attempt < self.config.max_attempts;
                    last_err = Some(err);
                    if !retryable || !attempts_left {
                        break;
                    }
                    let delay = self.compute_delay(attempt);
                    *self.stats.total_wait.lock().expect("retry executor poisoned") += delay;
                    std::thread::sleep(delay);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::operation_failed("retry executor exhausted attempts")))
    }

    pub fn stats(&self) -> RetryStatsSnapshot {
        RetryStatsSnapshot {
            attempts: self.stats.attempts.load(Ordering::Relaxed),
            successes: self.stats.successes.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
            total_wait: *self.stats.total_wait.lock().expect("retry executor poisoned"),
        }
    }
}
