//! Circuit breaker (C11 §4.11): closed/open/half-open state machine.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Configuration for a [`CircuitBreaker`].
#[derive(Clone, Copy, Debug)]
pub struct CircuitBreakerConfig {
    pub timeout: Duration,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub reset_timeout: Duration,
    pub failure_rate_threshold: f64,
    pub minimum_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(30),
            failure_rate_threshold: 0.5,
            minimum_calls: 10,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(Error::invalid_configuration("failure_threshold must be >= 1"));
        }
        if self.success_threshold == 0 {
            return Err(Error::invalid_configuration("success_threshold must be >= 1"));
        }
        if self.reset_timeout.is_zero() {
            return Err(Error::invalid_configuration("reset_timeout must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.failure_rate_threshold) {
            return Err(Error::invalid_configuration(
                "failure_rate_threshold must be in [0, 1]",
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Rolling counters reset on every closed transition, plus counters that
/// persist across the breaker's whole lifetime. This split mirrors
/// `circuit_breaker_metrics::reset_window()` in the original source.
#[derive(Clone, Copy, Debug, Default)]
pub struct CircuitBreakerMetrics {
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub rejected: u64,
    pub transitions: u64,
}

struct Inner {
    state: CircuitState,
    metrics: CircuitBreakerMetrics,
    last_failure: Option<Instant>,
}

/// State machine guarding calls to an unreliable operation (§4.11).
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                metrics: CircuitBreakerMetrics::default(),
                last_failure: None,
            }),
        })
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("circuit breaker poisoned").state
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.inner.lock().expect("circuit breaker poisoned").metrics
    }

    /// Evaluates and, if due, performs the open → half-open transition.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock().expect("circuit breaker poisoned");
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let due = inner
                    .last_failure
                    .map(|t| t.elapsed() >= self.config.reset_timeout)
                    .unwrap_or(false);
                if due {
                    log::debug!("circuit breaker: open -> half_open");
                    inner.state = CircuitState::HalfOpen;
                    inner.metrics.consecutive_successes = 0;
                    inner.metrics.transitions += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self, inner: &mut Inner) {
        inner.metrics.total_calls += 1;
        inner.metrics.consecutive_failures = 0;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.metrics.consecutive_successes += 1;
                if inner.metrics.consecutive_successes >= self.config.success_threshold {
                    log::debug!("circuit breaker: half_open -> closed");
                    inner.state = CircuitState::Closed;
                    inner.metrics.transitions += 1;
                    let rejected = inner.metrics.rejected;
                    let transitions = inner.metrics.transitions;
                    inner.metrics = CircuitBreakerMetrics {
                        rejected,
                        transitions,
                        ..CircuitBreakerMetrics::default()
                    };
                }
            }
            CircuitState::Closed => {
                inner.metrics.consecutive_successes += 1;
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self, inner: &mut Inner, now: Instant) {
        inner.metrics.total_calls += 1;
        inner.metrics.total_failures += 1;
        inner.metrics.consecutive_successes = 0;
        inner.metrics.consecutive_failures += 1;
        inner.last_failure = Some(now);

        match inner.state {
            CircuitState::HalfOpen => {
                log::debug!("circuit breaker: half_open -> open");
                inner.state = CircuitState::Open;
                inner.metrics.transitions += 1;
            }
            CircuitState::Closed => {
                let failure_rate = inner.metrics.total_failures as f64 / inner.metrics.total_calls as f64;
                let trip_by_consecutive = inner.metrics.consecutive_failures >= self.config.failure_threshold;
                let trip_by_rate = inner.metrics.total_calls >= self.config.minimum_calls as u64
                    && failure_rate >= self.config.failure_rate_threshold;
                if trip_by_consecutive || trip_by_rate {
                    log::debug!("circuit breaker: closed -> open");
                    inner.state = CircuitState::Open;
                    inner.metrics.transitions += 1;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Runs `op` if the breaker allows it, otherwise runs `fallback` (if
    /// given) or returns `circuit_breaker_open`.
    pub fn execute<T>(
        &self,
        op: impl FnOnce() -> Result<T>,
        fallback: Option<impl FnOnce() -> Result<T>>,
    ) -> Result<T> {
        if !self.can_execute() {
            let mut inner = self.inner.lock().expect("circuit breaker poisoned");
            inner.metrics.rejected += 1;
            drop(inner);
            return match fallback {
                Some(f) => f(),
                None => Err(Error::circuit_breaker_open("circuit breaker is open")),
            };
        }

        let start = Instant::now();
        let result = op();
        let elapsed = start.elapsed();
        let now = Instant::now();

        if elapsed > self.config.timeout {
            let mut inner = self.inner.lock().expect("circuit breaker poisoned");
            self.record_failure(&mut inner, now);
            drop(inner);
            return match fallback {
                Some(f) => f(),
                None => Err(Error::operation_timeout("operation exceeded circuit breaker timeout")),
            };
        }

        match result {
            Ok(value) => {
                let mut inner = self.inner.lock().expect("circuit breaker poisoned");
                self.record_success(&mut inner);
                Ok(value)
            }
            Err(err) => {
                let mut inner = self.inner.lock().expect("circuit breaker poisoned");
                self.record_failure(&mut inner, now);
                drop(inner);
                match fallback {
                    Some(f) => f(),
                    None => Err(err),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // S4 from spec.md §8.
    #[test]
    fn scenario_s4_circuit_breaker_trip_and_recover() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            reset_timeout: Duration::from_millis(50),
            success_threshold: 2,
            ..CircuitBreakerConfig::default()
        })
        .unwrap();

        for _ in 0..3 {
            let _ = cb.execute::<()>(|| Err(Error::operation_timeout("boom")), None::<fn() -> Result<()>>);
        }
        assert_eq!(cb.state(), CircuitState::Open);

        let err = cb
            .execute::<()>(|| Ok(()), None::<fn() -> Result<()>>)
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::CircuitBreakerOpen);

        std::thread::sleep(Duration::from_millis(60));

        cb.execute::<()>(|| Ok(()), None::<fn() -> Result<()>>).unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.metrics().consecutive_successes, 1);

        cb.execute::<()>(|| Ok(()), None::<fn() -> Result<()>>).unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().consecutive_successes, 0);
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_millis(10),
            success_threshold: 2,
            ..CircuitBreakerConfig::default()
        })
        .unwrap();
        let _ = cb.execute::<()>(|| Err(Error::operation_failed("x")), None::<fn() -> Result<()>>);
        assert_eq!(cb.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(15));
        let _ = cb.execute::<()>(|| Err(Error::operation_failed("x")), None::<fn() -> Result<()>>);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn fallback_is_invoked_when_open() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..CircuitBreakerConfig::default()
        })
        .unwrap();
        let _ = cb.execute::<()>(|| Err(Error::operation_failed("x")), None::<fn() -> Result<()>>);
        assert_eq!(cb.state(), CircuitState::Open);
        let value = cb
            .execute::<i32>(|| Ok(1), Some(|| Ok(42)))
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(cb.metrics().rejected, 1);
    }
}
