//! Shared helpers for relay-router integration tests.

#![allow(dead_code)]

use relay_abstraction::Backend;
use relay_models::MockBackend;
use relay_router::{
    BackendConfig, BackendId, BackendRouter, Capability, CircuitBreakerSettings, RouterConfig,
    ScoringWeights, TaskCategory,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Parses a `provider:model` id.
pub fn id(s: &str) -> BackendId {
    s.parse().unwrap()
}

/// A catalogue entry with generous limits and no connection block.
///
/// Input and output prices are equal, so a 500 + 500 token request costs
/// exactly `price_per_1k`.
pub fn backend(
    backend_id: &str,
    price_per_1k: f64,
    quality: f64,
    speed: f64,
    caps: &[Capability],
) -> BackendConfig {
    BackendConfig {
        id: id(backend_id),
        context_window: 32_000,
        input_price_per_1k: price_per_1k,
        output_price_per_1k: price_per_1k,
        requests_per_minute: 100,
        tokens_per_minute: 10_000_000,
        quality,
        speed,
        capabilities: caps.iter().copied().collect(),
        connection: None,
    }
}

/// Configuration with default tunables and the given catalogue.
pub fn config(backends: Vec<BackendConfig>) -> RouterConfig {
    RouterConfig {
        weights: ScoringWeights::default(),
        buffer_ratio: 0.8,
        call_timeout_ms: 30_000,
        default_cost_budget: 0.10,
        usage_window_secs: 60,
        escalation_threshold: 0.7,
        escalation: None,
        circuit_breaker: CircuitBreakerSettings::default(),
        backends,
        categories: BTreeMap::new(),
    }
}

/// Adds a preference list for one category.
pub fn with_category(
    mut config: RouterConfig,
    category: TaskCategory,
    ids: &[&str],
) -> RouterConfig {
    config.categories.insert(category, ids.iter().map(|s| id(s)).collect());
    config
}

/// A mock as a shared backend connection.
pub fn connection(backend: MockBackend) -> Arc<dyn Backend> {
    Arc::new(backend)
}

/// Builds a router and registers the given connections.
pub fn router(config: &RouterConfig, connections: Vec<(&str, Arc<dyn Backend>)>) -> BackendRouter {
    let router = BackendRouter::from_config(config).unwrap();
    for (backend_id, backend) in connections {
        router.register_backend(id(backend_id), backend);
    }
    router
}
