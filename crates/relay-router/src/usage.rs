//! Usage tracker for per-backend rate and cost accounting.
//!
//! Each backend owns one rolling window behind its own mutex. Updates to one
//! backend are linearizable; updates to different backends never contend.
//! Admission goes through [`UsageTracker::try_reserve`], which checks the
//! capacity buffer and counts the call in one critical section.

use crate::registry::RegistrySnapshot;
use crate::types::BackendId;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from usage accounting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    /// The backend is within its capacity buffer.
    #[error("Backend '{0}' is near its capacity limit")]
    CapacityExceeded(BackendId),

    /// A usage lock was poisoned by a panicking thread.
    #[error("Usage lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Per-window capacity of one backend. Zero means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapacityLimits {
    pub requests_per_window: u32,
    pub tokens_per_window: u64,
}

#[derive(Debug)]
struct UsageWindow {
    limits: CapacityLimits,
    started: Instant,
    epoch: u64,
    requests: u64,
    tokens: u64,
    cost_day: NaiveDate,
    cost_today: f64,
    lifetime_requests: u64,
    lifetime_tokens: u64,
}

impl UsageWindow {
    fn new(limits: CapacityLimits) -> Self {
        Self {
            limits,
            started: Instant::now(),
            epoch: 0,
            requests: 0,
            tokens: 0,
            cost_day: Utc::now().date_naive(),
            cost_today: 0.0,
            lifetime_requests: 0,
            lifetime_tokens: 0,
        }
    }

    /// Starts a new window if the current one has expired, and resets the daily
    /// cost at midnight UTC.
    fn roll(&mut self, period: Duration) {
        let now = Instant::now();
        if now.duration_since(self.started) >= period {
            self.started = now;
            self.epoch += 1;
            self.requests = 0;
            self.tokens = 0;
        }

        let today = Utc::now().date_naive();
        if today != self.cost_day {
            self.cost_day = today;
            self.cost_today = 0.0;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn near_limit(&self, buffer_ratio: f64) -> bool {
        let rpm = u64::from(self.limits.requests_per_window);
        let tpm = self.limits.tokens_per_window;
        let requests_hot = rpm > 0 && self.requests as f64 >= rpm as f64 * buffer_ratio;
        let tokens_hot = tpm > 0 && self.tokens as f64 >= tpm as f64 * buffer_ratio;
        requests_hot || tokens_hot
    }

    #[allow(clippy::cast_precision_loss)]
    fn utilization(used: u64, limit: u64) -> f64 {
        if limit == 0 { 0.0 } else { used as f64 / limit as f64 }
    }
}

/// Point-in-time usage of one backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSnapshot {
    pub backend_id: BackendId,
    pub requests_in_window: u64,
    pub tokens_in_window: u64,
    pub requests_per_window: u32,
    pub tokens_per_window: u64,
    /// Fraction of the request limit used in this window.
    pub request_utilization: f64,
    /// Fraction of the token limit used in this window.
    pub token_utilization: f64,
    /// USD spent since midnight UTC.
    pub cost_today: f64,
    pub lifetime_requests: u64,
    pub lifetime_tokens: u64,
    /// Milliseconds since the current window started.
    pub window_age_ms: u64,
}

/// Tracks requests, tokens and spend per backend.
#[derive(Debug)]
pub struct UsageTracker {
    windows: RwLock<HashMap<BackendId, Arc<Mutex<UsageWindow>>>>,
    period: Duration,
}

impl UsageTracker {
    /// Creates a tracker with a one-minute window.
    #[must_use]
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(60))
    }

    /// Creates a tracker with a custom window length.
    #[must_use]
    pub fn with_window(period: Duration) -> Self {
        Self { windows: RwLock::new(HashMap::new()), period }
    }

    /// Creates a tracker that knows the limits of every catalogued backend.
    #[must_use]
    pub fn from_snapshot(snapshot: &RegistrySnapshot) -> Self {
        let tracker = Self::new();
        tracker.sync_limits(snapshot);
        tracker
    }

    /// Length of the rolling window.
    pub fn window(&self) -> Duration {
        self.period
    }

    /// Applies catalogue limits, keeping counters for backends that remain.
    pub fn sync_limits(&self, snapshot: &RegistrySnapshot) {
        for profile in snapshot.profiles() {
            let limits = CapacityLimits {
                requests_per_window: profile.requests_per_minute,
                tokens_per_window: profile.tokens_per_minute,
            };
            if let Err(e) = self.set_limits(&profile.id, limits) {
                warn!(backend = %profile.id, error = %e, "Failed to apply capacity limits");
            }
        }
    }

    /// Sets the capacity limits of one backend.
    ///
    /// # Errors
    /// Returns `UsageError::LockPoisoned` if the window lock is poisoned.
    pub fn set_limits(&self, id: &BackendId, limits: CapacityLimits) -> Result<(), UsageError> {
        let entry = self.entry(id)?;
        let mut window = entry.lock().map_err(|e| UsageError::LockPoisoned(e.to_string()))?;
        window.limits = limits;
        Ok(())
    }

    fn entry(&self, id: &BackendId) -> Result<Arc<Mutex<UsageWindow>>, UsageError> {
        {
            let windows = self.windows.read().map_err(|e| UsageError::LockPoisoned(e.to_string()))?;
            if let Some(entry) = windows.get(id) {
                return Ok(Arc::clone(entry));
            }
        }

        let mut windows =
            self.windows.write().map_err(|e| UsageError::LockPoisoned(e.to_string()))?;
        let entry = windows
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(UsageWindow::new(CapacityLimits::default()))));
        Ok(Arc::clone(entry))
    }

    /// Poisons one backend's window lock.
    #[cfg(test)]
    pub(crate) fn poison(&self, id: &BackendId) {
        let entry = self.entry(id).unwrap();
        let _ = std::thread::spawn(move || {
            let _window = entry.lock().unwrap();
            panic!("usage window poisoned");
        })
        .join();
    }

    fn existing(&self, id: &BackendId) -> Result<Option<Arc<Mutex<UsageWindow>>>, UsageError> {
        let windows = self.windows.read().map_err(|e| UsageError::LockPoisoned(e.to_string()))?;
        Ok(windows.get(id).map(Arc::clone))
    }

    /// Records completed usage outside of a reservation.
    ///
    /// # Errors
    /// Returns `UsageError::LockPoisoned` if the window lock is poisoned.
    pub fn record(
        &self,
        id: &BackendId,
        requests: u64,
        tokens: u64,
        cost: f64,
    ) -> Result<(), UsageError> {
        let entry = self.entry(id)?;
        let mut window = entry.lock().map_err(|e| UsageError::LockPoisoned(e.to_string()))?;
        window.roll(self.period);
        window.requests += requests;
        window.tokens += tokens;
        window.lifetime_requests += requests;
        window.lifetime_tokens += tokens;
        window.cost_today += cost;

        debug!(backend = %id, requests, tokens, cost, "Recorded backend usage");
        Ok(())
    }

    /// Whether the backend has used `buffer_ratio` of either limit in the current window.
    ///
    /// Backends with no recorded usage are never near their limit.
    pub fn is_near_limit(&self, id: &BackendId, buffer_ratio: f64) -> bool {
        let entry = match self.existing(id) {
            Ok(Some(entry)) => entry,
            Ok(None) => return false,
            Err(e) => {
                warn!(
                    backend = %id,
                    error = %e,
                    "Usage lookup failed, treating backend as available"
                );
                return false;
            }
        };

        match entry.lock() {
            Ok(mut window) => {
                window.roll(self.period);
                window.near_limit(buffer_ratio)
            }
            Err(e) => {
                warn!(
                    backend = %id,
                    error = %e,
                    "Usage lock poisoned, treating backend as available"
                );
                false
            }
        }
    }

    /// Atomically checks the capacity buffer and counts one request of `tokens`.
    ///
    /// With `enforce` set to false the call is counted even when the backend is
    /// near its limit.
    ///
    /// # Errors
    /// Returns `UsageError::CapacityExceeded` when enforcement rejects the call.
    pub fn try_reserve(
        &self,
        id: &BackendId,
        tokens: u64,
        buffer_ratio: f64,
        enforce: bool,
    ) -> Result<Reservation<'_>, UsageError> {
        let entry = self.entry(id)?;
        let mut window = entry.lock().map_err(|e| UsageError::LockPoisoned(e.to_string()))?;
        window.roll(self.period);

        if enforce && window.near_limit(buffer_ratio) {
            debug!(
                backend = %id,
                requests = window.requests,
                tokens = window.tokens,
                "Reservation rejected"
            );
            return Err(UsageError::CapacityExceeded(id.clone()));
        }

        window.requests += 1;
        window.tokens += tokens;
        let epoch = window.epoch;
        drop(window);

        Ok(Reservation { tracker: self, id: id.clone(), epoch, tokens, settled: false })
    }

    /// Current usage of one backend, if any was recorded or limits were set.
    pub fn snapshot(&self, id: &BackendId) -> Option<UsageSnapshot> {
        let entry = self.existing(id).ok().flatten()?;
        let mut window = entry.lock().ok()?;
        window.roll(self.period);

        Some(UsageSnapshot {
            backend_id: id.clone(),
            requests_in_window: window.requests,
            tokens_in_window: window.tokens,
            requests_per_window: window.limits.requests_per_window,
            tokens_per_window: window.limits.tokens_per_window,
            request_utilization: UsageWindow::utilization(
                window.requests,
                u64::from(window.limits.requests_per_window),
            ),
            token_utilization: UsageWindow::utilization(
                window.tokens,
                window.limits.tokens_per_window,
            ),
            cost_today: window.cost_today,
            lifetime_requests: window.lifetime_requests,
            lifetime_tokens: window.lifetime_tokens,
            window_age_ms: u64::try_from(window.started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Clears window counters and daily cost for one backend.
    pub fn reset(&self, id: &BackendId) {
        if let Ok(Some(entry)) = self.existing(id) {
            match entry.lock() {
                Ok(mut window) => {
                    let limits = window.limits;
                    *window = UsageWindow::new(limits);
                }
                Err(e) => warn!(backend = %id, error = %e, "Failed to reset usage"),
            }
        }
    }

    fn release(&self, id: &BackendId, epoch: u64, tokens: u64) {
        let Ok(Some(entry)) = self.existing(id) else {
            return;
        };
        match entry.lock() {
            Ok(mut window) => {
                if window.epoch == epoch {
                    window.requests = window.requests.saturating_sub(1);
                    window.tokens = window.tokens.saturating_sub(tokens);
                }
            }
            Err(e) => warn!(backend = %id, error = %e, "Failed to release reservation"),
        }
    }

    fn settle(
        &self,
        id: &BackendId,
        epoch: u64,
        reserved: u64,
        actual: u64,
        cost: f64,
    ) -> Result<(), UsageError> {
        let entry = self.entry(id)?;
        let mut window = entry.lock().map_err(|e| UsageError::LockPoisoned(e.to_string()))?;
        window.roll(self.period);

        if window.epoch == epoch {
            window.tokens = window.tokens.saturating_sub(reserved) + actual;
        } else {
            // The reserving window has expired; count the call in the current one.
            window.requests += 1;
            window.tokens += actual;
        }
        window.lifetime_requests += 1;
        window.lifetime_tokens += actual;
        window.cost_today += cost;

        debug!(backend = %id, tokens = actual, cost, "Committed backend usage");
        Ok(())
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// A counted call slot. Dropping it without [`commit`](Reservation::commit) gives the slot back.
#[derive(Debug)]
pub struct Reservation<'a> {
    tracker: &'a UsageTracker,
    id: BackendId,
    epoch: u64,
    tokens: u64,
    settled: bool,
}

impl Reservation<'_> {
    /// Backend this slot was reserved on.
    pub fn backend_id(&self) -> &BackendId {
        &self.id
    }

    /// Replaces the reserved token estimate with actual usage and adds the cost.
    ///
    /// # Errors
    /// Returns `UsageError::LockPoisoned` if the window lock is poisoned.
    pub fn commit(mut self, actual_tokens: u64, cost: f64) -> Result<(), UsageError> {
        self.settled = true;
        self.tracker.settle(&self.id, self.epoch, self.tokens, actual_tokens, cost)
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.tracker.release(&self.id, self.epoch, self.tokens);
        }
    }
}
