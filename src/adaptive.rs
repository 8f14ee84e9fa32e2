//! Adaptive sampling controller (C7): classifies host load into discrete
//! levels and drives a hysteresis state machine that collectors consult for
//! their sampling interval/rate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::error::{Error, Result};
use crate::provider::SystemMetrics;

/// Discrete load classification, ordered from least to most demanding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LoadLevel {
    Idle,
    Light,
    Moderate,
    High,
    Critical,
}

impl LoadLevel {
    /// Classifies one axis (CPU% or memory%) per the thresholds in §4.7.
    fn classify_axis(value: f64) -> Self {
        if value >= 90.0 {
            LoadLevel::Critical
        } else if value >= 75.0 {
            LoadLevel::High
        } else if value >= 50.0 {
            LoadLevel::Moderate
        } else if value >= 25.0 {
            LoadLevel::Light
        } else {
            LoadLevel::Idle
        }
    }

    /// The stricter (more demanding) of the CPU- and memory-derived levels.
    pub fn classify(reading: &SystemMetrics) -> Self {
        Self::classify_axis(reading.cpu_usage_percent).max(Self::classify_axis(reading.memory_usage_percent))
    }
}

/// How eagerly the controller commits to a new [`LoadLevel`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AdaptiveStrategy {
    Conservative,
    Balanced,
    Aggressive,
}

impl AdaptiveStrategy {
    /// Confirmations required before an *upgrade* (a move to a more demanding
    /// level) takes effect. Downgrades always need exactly one confirmation
    /// (SPEC_FULL.md §D.3): the original and spec.md are silent on downgrade
    /// confirmation, and shedding load eagerly is the safer default.
    fn upgrade_confirmations(self) -> u32 {
        match self {
            AdaptiveStrategy::Conservative => 2,
            AdaptiveStrategy::Balanced => 1,
            AdaptiveStrategy::Aggressive => 0,
        }
    }
}

/// Per-level sampling parameters.
#[derive(Clone, Copy, Debug)]
pub struct LevelParams {
    pub sampling_interval: Duration,
    pub sampling_rate: f64,
}

/// Configuration for an [`AdaptiveController`]: per-level sampling
/// parameters plus the hysteresis tuning knobs.
#[derive(Clone, Debug)]
pub struct AdaptiveConfig {
    pub strategy: AdaptiveStrategy,
    pub hysteresis_margin: f64,
    pub min_transition_interval: Duration,
    pub levels: [LevelParams; 5], // indexed by LoadLevel as usize
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            strategy: AdaptiveStrategy::Balanced,
            hysteresis_margin: 5.0,
            min_transition_interval: Duration::from_secs(5),
            levels: [
                LevelParams {
                    sampling_interval: Duration::from_secs(10),
                    sampling_rate: 1.0,
                }, // idle
                LevelParams {
                    sampling_interval: Duration::from_secs(5),
                    sampling_rate: 0.8,
                }, // light
                LevelParams {
                    sampling_interval: Duration::from_secs(2),
                    sampling_rate: 0.5,
                }, // moderate
                LevelParams {
                    sampling_interval: Duration::from_secs(1),
                    sampling_rate: 0.25,
                }, // high
                LevelParams {
                    sampling_interval: Duration::from_millis(500),
                    sampling_rate: 0.1,
                }, // critical
            ],
        }
    }
}

impl AdaptiveConfig {
    pub fn validate(&self) -> Result<()> {
        if self.hysteresis_margin < 0.0 {
            return Err(Error::invalid_configuration(
                "hysteresis_margin must be >= 0",
            ));
        }
        for lvl in &self.levels {
            if !(0.0..=1.0).contains(&lvl.sampling_rate) {
                return Err(Error::invalid_configuration(
                    "sampling_rate must be in [0, 1]",
                ));
            }
        }
        Ok(())
    }

    fn params(&self, level: LoadLevel) -> LevelParams {
        self.levels[level as usize]
    }
}

#[derive(Clone, Copy, Debug)]
struct PendingTransition {
    level: LoadLevel,
    confirmations: u32,
}

struct Inner {
    current_level: LoadLevel,
    last_transition: Instant,
    last_triggering_value: f64,
    pending: Option<PendingTransition>,
    transition_count: u64,
    last_accounted: Instant,
}

/// Per-level cumulative time-in-state, used by [`AdaptiveController::stats`].
#[derive(Clone, Debug, Default)]
pub struct AdaptiveStats {
    pub time_in_state: [Duration; 5],
    pub transition_count: u64,
    pub current_level: Option<LoadLevel>,
    pub last_decision: Option<Instant>,
}

/// Hysteresis state machine driving the current sampling regime (§4.7).
pub struct AdaptiveController {
    config: AdaptiveConfig,
    state: Mutex<Inner>,
    time_in_state_ms: [AtomicU64; 5],
    decisions: AtomicU64,
}

impl AdaptiveController {
    pub fn new(config: AdaptiveConfig) -> Result<Self> {
        config.validate()?;
        let now = Instant::now();
        Ok(Self {
            config,
            state: Mutex::new(Inner {
                current_level: LoadLevel::Idle,
                last_transition: now,
                last_triggering_value: 0.0,
                pending: None,
                transition_count: 0,
                last_accounted: now,
            }),
            time_in_state_ms: Default::default(),
            decisions: AtomicU64::new(0),
        })
    }

    pub fn current_level(&self) -> LoadLevel {
        self.state.lock().expect("adaptive controller poisoned").current_level
    }

    /// Feeds one observation into the hysteresis state machine. Returns
    /// `true` if a transition took effect.
    pub fn observe(&self, reading: &SystemMetrics, now: Instant) -> bool {
        let classified = LoadLevel::classify(reading);
        let observed_value = reading.cpu_usage_percent.max(reading.memory_usage_percent);
        self.decisions.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock().expect("adaptive controller poisoned");

        let elapsed = now.saturating_duration_since(state.last_accounted);
        self.time_in_state_ms[state.current_level as usize]
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        state.last_accounted = now;

        if classified == state.current_level {
            state.pending = None;
            return false;
        }
        if (observed_value - state.last_triggering_value).abs() < self.config.hysteresis_margin {
            return false;
        }
        if now.saturating_duration_since(state.last_transition) < self.config.min_transition_interval {
            return false;
        }

        let is_upgrade = classified > state.current_level;
        let required = if is_upgrade {
            self.config.strategy.upgrade_confirmations()
        } else {
            1
        };

        let confirmations = match state.pending {
            Some(p) if p.level == classified => p.confirmations + 1,
            _ => 1,
        };

        if confirmations < required {
            state.pending = Some(PendingTransition {
                level: classified,
                confirmations,
            });
            return false;
        }

        log::debug!(
            "adaptive controller: transitioning {:?} -> {:?}",
            state.current_level,
            classified
        );
        state.current_level = classified;
        state.last_transition = now;
        state.last_triggering_value = observed_value;
        state.pending = None;
        state.transition_count += 1;
        true
    }

    /// The sampling parameters currently in effect.
    pub fn current_params(&self) -> LevelParams {
        self.config.params(self.current_level())
    }

    /// Evaluates admission for one candidate collection using the current
    /// sampling rate.
    pub fn should_sample(&self) -> bool {
        let rate = self.current_params().sampling_rate;
        if rate >= 1.0 {
            return true;
        }
        if rate <= 0.0 {
            return false;
        }
        rand::thread_rng().gen::<f64>() < rate
    }

    pub fn stats(&self) -> AdaptiveStats {
        let state = self.state.lock().expect("adaptive controller poisoned");
        let mut time_in_state = [Duration::ZERO; 5];
        for (i, ms) in self.time_in_state_ms.iter().enumerate() {
            time_in_state[i] = Duration::from_millis(ms.load(Ordering::Relaxed));
        }
        AdaptiveStats {
            time_in_state,
            transition_count: state.transition_count,
            current_level: Some(state.current_level),
            last_decision: Some(state.last_transition),
        }
    }
}
