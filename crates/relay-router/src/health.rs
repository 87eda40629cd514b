//! Health probe: concurrent reachability checks for every catalogued backend.

use crate::pool::BackendPool;
use crate::registry::CapabilityRegistry;
use crate::types::BackendId;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Overall health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Every backend answered.
    Healthy,
    /// Some backends answered.
    Degraded,
    /// No backend answered.
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Probe result for one backend.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub backend_id: BackendId,
    pub ok: bool,
    pub message: String,
    pub latency_ms: u64,
}

/// Probe results for the whole catalogue.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    pub backends: Vec<ProbeResult>,
}

impl HealthReport {
    fn from_results(backends: Vec<ProbeResult>) -> Self {
        let healthy = backends.iter().filter(|b| b.ok).count();
        let status = match healthy {
            n if n == backends.len() && n > 0 => HealthStatus::Healthy,
            0 => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        };
        Self { status, checked_at: Utc::now(), backends }
    }
}

/// Runs health checks against live connections.
#[derive(Debug, Clone)]
pub struct HealthProbe {
    registry: Arc<CapabilityRegistry>,
    pool: Arc<BackendPool>,
}

impl HealthProbe {
    #[must_use]
    pub fn new(registry: Arc<CapabilityRegistry>, pool: Arc<BackendPool>) -> Self {
        Self { registry, pool }
    }

    /// Checks every catalogued backend concurrently, each bounded by `timeout`.
    pub async fn check(&self, timeout: Duration) -> HealthReport {
        let snapshot = self.registry.snapshot();
        let probes = snapshot.profiles().iter().map(|profile| {
            let id = profile.id.clone();
            let backend = self.pool.get(&id);
            async move {
                let Some(backend) = backend else {
                    return ProbeResult {
                        backend_id: id,
                        ok: false,
                        message: "no backend connection registered".to_string(),
                        latency_ms: 0,
                    };
                };

                let started = Instant::now();
                let result = tokio::time::timeout(timeout, backend.health_check()).await;
                let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

                let (ok, message) = match result {
                    Ok(Ok(())) => (true, "ok".to_string()),
                    Ok(Err(e)) => (false, e.to_string()),
                    Err(_) => (false, format!("timed out after {}ms", timeout.as_millis())),
                };

                if ok {
                    debug!(backend = %id, latency_ms, "Health check passed");
                } else {
                    warn!(backend = %id, latency_ms, message = %message, "Health check failed");
                }

                ProbeResult { backend_id: id, ok, message, latency_ms }
            }
        });

        HealthReport::from_results(join_all(probes).await)
    }
}
