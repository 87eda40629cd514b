//! Statistics reporter: a read-only view over registry, usage and breaker state.

use crate::circuit_breaker::CircuitBreaker;
use crate::registry::CapabilityRegistry;
use crate::types::BackendProfile;
use crate::usage::{UsageSnapshot, UsageTracker};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Statistics for one backend.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStats {
    pub profile: BackendProfile,
    pub usage: Option<UsageSnapshot>,
    /// "closed", "open" or "half_open".
    pub circuit: &'static str,
    pub failure_rate: f64,
}

/// Statistics for every catalogued backend.
#[derive(Debug, Clone, Serialize)]
pub struct RouterStats {
    pub generated_at: DateTime<Utc>,
    pub registry_version: u64,
    pub window_secs: u64,
    pub backends: Vec<BackendStats>,
    /// Sum of `cost_today` across backends.
    pub total_cost_today: f64,
}

/// Builds [`RouterStats`] snapshots.
#[derive(Debug, Clone)]
pub struct StatisticsReporter {
    registry: Arc<CapabilityRegistry>,
    tracker: Arc<UsageTracker>,
    breaker: Arc<CircuitBreaker>,
}

impl StatisticsReporter {
    #[must_use]
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        tracker: Arc<UsageTracker>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self { registry, tracker, breaker }
    }

    /// Current statistics, in catalogue order.
    pub fn snapshot(&self) -> RouterStats {
        let registry = self.registry.snapshot();
        let backends: Vec<BackendStats> = registry
            .profiles()
            .iter()
            .map(|profile| BackendStats {
                profile: profile.clone(),
                usage: self.tracker.snapshot(&profile.id),
                circuit: self.breaker.state(&profile.id).label(),
                failure_rate: self.breaker.failure_rate(&profile.id),
            })
            .collect();

        let total_cost_today =
            backends.iter().filter_map(|b| b.usage.as_ref()).map(|u| u.cost_today).sum();

        RouterStats {
            generated_at: Utc::now(),
            registry_version: registry.version(),
            window_secs: self.tracker.window().as_secs(),
            backends,
            total_cost_today,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistrySnapshot;
    use crate::types::BackendId;
    use std::collections::{BTreeSet, HashMap};

    fn profile(model: &str) -> BackendProfile {
        BackendProfile {
            id: BackendId::new("acme", model),
            context_window: 4096,
            input_price_per_1k: 0.001,
            output_price_per_1k: 0.001,
            requests_per_minute: 10,
            tokens_per_minute: 1000,
            quality: 0.5,
            speed: 0.5,
            capabilities: BTreeSet::new(),
        }
    }

    #[test]
    fn test_snapshot_reports_usage_and_circuit() {
        let snapshot =
            RegistrySnapshot::new(vec![profile("a"), profile("b")], HashMap::new()).unwrap();
        let tracker = Arc::new(UsageTracker::from_snapshot(&snapshot));
        let breaker = Arc::new(CircuitBreaker::new());
        let registry = Arc::new(CapabilityRegistry::new(snapshot));

        let a = BackendId::new("acme", "a");
        tracker.record(&a, 5, 250, 0.25).unwrap();
        for _ in 0..8 {
            breaker.record_failure(&a);
        }

        let stats = StatisticsReporter::new(registry, tracker, breaker).snapshot();
        assert_eq!(stats.backends.len(), 2);
        assert_eq!(stats.window_secs, 60);

        let first = &stats.backends[0];
        assert_eq!(first.circuit, "open");
        let usage = first.usage.as_ref().unwrap();
        assert_eq!(usage.requests_in_window, 5);
        assert!((usage.request_utilization - 0.5).abs() < 1e-12);
        assert!((usage.token_utilization - 0.25).abs() < 1e-12);
        assert!((stats.total_cost_today - 0.25).abs() < 1e-12);

        assert_eq!(stats.backends[1].circuit, "closed");

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["backends"][0]["profile"]["id"], "acme:a");
        assert_eq!(json["backends"][0]["usage"]["requests_in_window"], 5);
    }
}
