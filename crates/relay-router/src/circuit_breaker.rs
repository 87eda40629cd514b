//! Circuit breaker that takes persistently failing backends out of rotation.
//!
//! Each backend's health lives behind its own mutex, so checks and updates
//! for different backends never wait on each other.

use crate::types::BackendId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Circuit breaker state for a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Skipping the backend until the cooldown expires.
    Open(Instant),
    /// Cooldown expired; the next call is a recovery probe.
    HalfOpen,
}

impl CircuitState {
    /// Short label for reports.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open(_) => "open",
            Self::HalfOpen => "half_open",
        }
    }

    fn after_cooldown(self, cooldown: Duration) -> Self {
        match self {
            Self::Open(opened_at) if opened_at.elapsed() >= cooldown => Self::HalfOpen,
            other => other,
        }
    }
}

/// Thresholds for opening a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Failure rate above which the circuit opens.
    pub failure_threshold: f64,
    /// Sliding window for the failure rate, in seconds.
    pub window_secs: u64,
    /// Time an open circuit waits before allowing a probe, in seconds.
    pub cooldown_secs: u64,
    /// Samples needed before the circuit may open.
    pub min_samples: usize,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self { failure_threshold: 0.5, window_secs: 300, cooldown_secs: 60, min_samples: 8 }
    }
}

#[derive(Debug)]
struct BackendHealth {
    state: CircuitState,
    successes: VecDeque<Instant>,
    failures: VecDeque<Instant>,
}

impl BackendHealth {
    fn new() -> Self {
        Self { state: CircuitState::Closed, successes: VecDeque::new(), failures: VecDeque::new() }
    }

    fn prune(&mut self, window: Duration) {
        let now = Instant::now();
        for entries in [&mut self.successes, &mut self.failures] {
            while entries.front().is_some_and(|&oldest| now.duration_since(oldest) > window) {
                entries.pop_front();
            }
        }
    }

    fn samples(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    #[allow(clippy::cast_precision_loss)]
    fn failure_rate(&self) -> f64 {
        match self.samples() {
            0 => 0.0,
            total => self.failures.len() as f64 / total as f64,
        }
    }
}

/// Tracks backend health and skips backends whose failure rate is too high.
#[derive(Debug)]
pub struct CircuitBreaker {
    backends: RwLock<HashMap<BackendId, Arc<Mutex<BackendHealth>>>>,
    failure_threshold: f64,
    window: Duration,
    cooldown: Duration,
    min_samples: usize,
}

impl CircuitBreaker {
    /// Creates a breaker with default settings (50% over 5 minutes, 60s cooldown, 8 samples).
    #[must_use]
    pub fn new() -> Self {
        Self::with_settings(CircuitBreakerSettings::default())
    }

    #[must_use]
    pub fn with_settings(settings: CircuitBreakerSettings) -> Self {
        Self {
            backends: RwLock::new(HashMap::new()),
            failure_threshold: settings.failure_threshold,
            window: Duration::from_secs(settings.window_secs),
            cooldown: Duration::from_secs(settings.cooldown_secs),
            min_samples: settings.min_samples,
        }
    }

    /// Overrides the cooldown (used by tests to exercise recovery quickly).
    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    fn entry(&self, id: &BackendId) -> Arc<Mutex<BackendHealth>> {
        if let Some(entry) = self.existing(id) {
            return entry;
        }
        let mut backends = self.backends.write().unwrap_or_else(PoisonError::into_inner);
        let entry = backends
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(BackendHealth::new())));
        Arc::clone(entry)
    }

    fn existing(&self, id: &BackendId) -> Option<Arc<Mutex<BackendHealth>>> {
        self.backends.read().unwrap_or_else(PoisonError::into_inner).get(id).map(Arc::clone)
    }

    fn lock(entry: &Mutex<BackendHealth>) -> MutexGuard<'_, BackendHealth> {
        entry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a successful call.
    pub fn record_success(&self, id: &BackendId) {
        let entry = self.entry(id);
        let mut health = Self::lock(&entry);

        if health.state == CircuitState::HalfOpen {
            debug!(backend = %id, "Circuit breaker: HalfOpen -> Closed (recovery successful)");
            // Forget the failures from before the circuit opened.
            *health = BackendHealth::new();
            return;
        }

        health.successes.push_back(Instant::now());
        health.prune(self.window);
        self.maybe_open(id, &mut health);
    }

    /// Records a failed call.
    pub fn record_failure(&self, id: &BackendId) {
        let entry = self.entry(id);
        let mut health = Self::lock(&entry);
        health.failures.push_back(Instant::now());
        health.prune(self.window);

        if health.state == CircuitState::HalfOpen {
            health.state = CircuitState::Open(Instant::now());
            warn!(backend = %id, "Circuit breaker: HalfOpen -> Open (recovery failed)");
            return;
        }

        self.maybe_open(id, &mut health);
    }

    fn maybe_open(&self, id: &BackendId, health: &mut BackendHealth) {
        if health.state != CircuitState::Closed || health.samples() < self.min_samples {
            return;
        }

        let failure_rate = health.failure_rate();
        if failure_rate > self.failure_threshold {
            health.state = CircuitState::Open(Instant::now());
            warn!(
                backend = %id,
                failure_rate = failure_rate,
                threshold = self.failure_threshold,
                total_samples = health.samples(),
                "Circuit breaker: Closed -> Open (failure rate exceeded threshold)"
            );
        }
    }

    /// Whether the backend should be skipped. Moves expired open circuits to half-open.
    pub fn should_skip(&self, id: &BackendId) -> bool {
        let Some(entry) = self.existing(id) else {
            return false;
        };
        let mut health = Self::lock(&entry);
        health.state = health.state.after_cooldown(self.cooldown);
        matches!(health.state, CircuitState::Open(_))
    }

    /// Current state, without transitioning.
    pub fn state(&self, id: &BackendId) -> CircuitState {
        self.existing(id).map_or(CircuitState::Closed, |entry| {
            Self::lock(&entry).state.after_cooldown(self.cooldown)
        })
    }

    /// Failure rate in the current window.
    pub fn failure_rate(&self, id: &BackendId) -> f64 {
        self.existing(id).map_or(0.0, |entry| Self::lock(&entry).failure_rate())
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}
