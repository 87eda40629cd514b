//! Adaptive backend selection and dispatch for relay.
//!
//! Requests are analyzed into requirement profiles, matched against a
//! catalogue of backends with live usage and health state, and dispatched to
//! the best candidate with an ordered fallback chain.

pub mod analyzer;
pub mod circuit_breaker;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod health;
pub mod pool;
pub mod registry;
pub mod request;
pub mod router;
pub mod stats;
pub mod types;
pub mod usage;

pub use analyzer::{
    ComplexityTier, ReasoningDepth, RequirementAnalyzer, RequirementProfile, SignalClassifier,
};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerSettings, CircuitState};
pub use config::{BackendConfig, ConfigError, EscalationConfig, RouterConfig, RouterConfigLoader};
pub use dispatcher::{DispatchOptions, Dispatcher};
pub use engine::{
    CandidateEvaluation, DecisionEngine, DecisionKind, EngineSettings, Filter, RoutingDecision,
};
pub use error::{AttemptError, AttemptFailure, RouterError, UnknownBackend};
pub use escalation::{EscalationError, EscalationSettings, MetaRouter};
pub use health::{HealthProbe, HealthReport, HealthStatus, ProbeResult};
pub use pool::BackendPool;
pub use registry::{CapabilityRegistry, RegistrySnapshot};
pub use request::{RouteResult, RoutingRequest};
pub use router::{BackendRouter, DecisionPreview, RouterSettings};
pub use stats::{BackendStats, RouterStats, StatisticsReporter};
pub use types::{BackendId, BackendProfile, Capability, ScoringWeights, TaskCategory};
pub use usage::{CapacityLimits, Reservation, UsageError, UsageSnapshot, UsageTracker};

pub use tokio_util::sync::CancellationToken;
