//! Fault-tolerance composition (C11 §4.11): circuit breaker + retry,
//! composed in either order, plus a small named registry supplementing the
//! original source's `retry_executor_registry` (SPEC_FULL.md §C).

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use crate::error::Result;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use super::retry::{RetryConfig, RetryExecutor};

/// Which capabilities are active and how they nest.
#[derive(Clone, Copy, Debug)]
pub struct FaultToleranceConfig {
    pub enable_cb: bool,
    pub enable_retry: bool,
    /// When both are enabled: `true` runs the retry loop inside the
    /// breaker's single call; `false` calls the breaker inside each retry
    /// attempt.
    pub cb_first: bool,
}

impl Default for FaultToleranceConfig {
    fn default() -> Self {
        Self {
            enable_cb: true,
            enable_retry: true,
            cb_first: true,
        }
    }
}

/// Composes a [`CircuitBreaker`] and a [`RetryExecutor`] per
/// [`FaultToleranceConfig`].
pub struct FaultToleranceManager {
    config: FaultToleranceConfig,
    breaker: Option<CircuitBreaker>,
    retry: Option<Mutex<RetryExecutor>>,
}

impl FaultToleranceManager {
    pub fn new(
        config: FaultToleranceConfig,
        cb_config: CircuitBreakerConfig,
        retry_config: RetryConfig,
    ) -> Result<Self> {
        let breaker = if config.enable_cb {
            Some(CircuitBreaker::new(cb_config)?)
        } else {
            None
        };
        let retry = if config.enable_retry {
            Some(Mutex::new(RetryExecutor::new(retry_config)?))
        } else {
            None
        };
        Ok(Self {
            config,
            breaker,
            retry,
        })
    }

    pub fn execute<T>(&self, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        match (&self.breaker, &self.retry) {
            (Some(cb), Some(retry)) if self.config.cb_first => {
                cb.execute(|| retry.lock().expect("retry executor poisoned").execute(&mut op), None::<fn() -> Result<T>>)
            }
            (Some(cb), Some(retry)) => retry
                .lock()
                .expect("retry executor poisoned")
                .execute(|| cb.execute(&mut op, None::<fn() -> Result<T>>)),
            (Some(cb), None) => cb.execute(op, None::<fn() -> Result<T>>),
            (None, Some(retry)) => retry.lock().expect("retry executor poisoned").execute(op),
            (None, None) => op(),
        }
    }

    /// Not open, and (once at least 10 calls have been made) a success rate
    /// of at least 50% (§4.11).
    pub fn is_healthy(&self) -> bool {
        let breaker_ok = self
            .breaker
            .as_ref()
            .map(|cb| cb.state() != CircuitState::Open)
            .unwrap_or(true);
        let retry_ok = self
            .retry
            .as_ref()
            .map(|retry| {
                let stats = retry.lock().expect("retry executor poisoned").stats();
                stats.attempts < 10 || stats.successes as f64 / stats.attempts as f64 >= 0.5
            })
            .unwrap_or(true);
        breaker_ok && retry_ok
    }

    pub fn breaker(&self) -> Option<&CircuitBreaker> {
        self.breaker.as_ref()
    }
}

/// A small named registry of managers, supplementing the original source's
/// registry-of-named-breakers (SPEC_FULL.md §C).
#[derive(Default)]
pub struct FaultToleranceRegistry {
    managers: RwLock<HashMap<String, std::sync::Arc<FaultToleranceManager>>>,
}

impl FaultToleranceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_insert_with(
        &self,
        name: &str,
        make: impl FnOnce() -> Result<FaultToleranceManager>,
    ) -> Result<std::sync::Arc<FaultToleranceManager>> {
        {
            let managers = self.managers.read().expect("registry poisoned");
            if let Some(m) = managers.get(name) {
                return Ok(std::sync::Arc::clone(m));
            }
        }
        let mut managers = self.managers.write().expect("registry poisoned");
        if let Some(m) = managers.get(name) {
            return Ok(std::sync::Arc::clone(m));
        }
        let manager = std::sync::Arc::new(make()?);
        let _ = managers.insert(name.to_string(), std::sync::Arc::clone(&manager));
        Ok(manager)
    }

    pub fn get(&self, name: &str) -> Option<std::sync::Arc<FaultToleranceManager>> {
        self.managers.read().expect("registry poisoned").get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<std::sync::Arc<FaultToleranceManager>> {
        self.managers.write().expect("registry poisoned").remove(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[test]
    fn cb_first_runs_retry_inside_breaker_call() {
        let manager = FaultToleranceManager::new(
            FaultToleranceConfig {
                enable_cb: true,
                enable_retry: true,
                cb_first: true,
            },
            CircuitBreakerConfig::default(),
            RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                ..RetryConfig::default()
            },
        )
        .unwrap();

        let calls = AtomicU32::new(0);
        let result = manager.execute(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(Error::operation_timeout("slow"))
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(manager.breaker().unwrap().metrics().total_calls, 1);
    }

    #[test]
    fn registry_reuses_named_managers() {
        let registry = FaultToleranceRegistry::new();
        let a = registry
            .get_or_insert_with("svc", || {
                FaultToleranceManager::new(
                    FaultToleranceConfig::default(),
                    CircuitBreakerConfig::default(),
                    RetryConfig::default(),
                )
            })
            .unwrap();
        let b = registry.get("svc").unwrap();
        assert!(std::sync::Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn only_retry_enabled_wraps_op_directly() {
        let manager = FaultToleranceManager::new(
            FaultToleranceConfig {
                enable_cb: false,
                enable_retry: true,
                cb_first: true,
            },
            CircuitBreakerConfig::default(),
            RetryConfig {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
                ..RetryConfig::default()
            },
        )
        .unwrap();
        assert!(manager.breaker().is_none());
        let result: Result<()> = manager.execute(|| Err(Error::not_found("nope")));
        assert!(result.is_err());
    }
}
