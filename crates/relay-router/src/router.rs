//! Router facade: analyzer, escalation, decision engine and dispatcher wired together.

use crate::analyzer::{RequirementAnalyzer, RequirementProfile};
use crate::circuit_breaker::CircuitBreaker;
use crate::config::{RouterConfig, RouterConfigLoader};
use crate::dispatcher::{DispatchOptions, Dispatcher};
use crate::engine::{DecisionEngine, EngineSettings, RoutingDecision};
use crate::error::RouterError;
use crate::escalation::{EscalationSettings, MetaRouter};
use crate::health::{HealthProbe, HealthReport};
use crate::pool::BackendPool;
use crate::registry::{CapabilityRegistry, RegistrySnapshot};
use crate::request::{RouteResult, RoutingRequest};
use crate::stats::{RouterStats, StatisticsReporter};
use crate::types::BackendId;
use crate::usage::UsageTracker;
use relay_abstraction::{Backend, TokenUsage};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tunables swapped atomically on reload.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterSettings {
    pub engine: EngineSettings,
    pub call_timeout: Duration,
    pub escalation: Option<EscalationSettings>,
}

impl RouterSettings {
    fn from_config(config: &RouterConfig) -> Self {
        Self {
            engine: config.engine_settings(),
            call_timeout: config.call_timeout(),
            escalation: config.escalation_settings(),
        }
    }
}

/// Catalogue and settings a request is routed against. Reload swaps both at once.
#[derive(Debug)]
struct RouterState {
    snapshot: Arc<RegistrySnapshot>,
    settings: Arc<RouterSettings>,
}

/// How a request above the escalation threshold proceeds.
enum EscalationPlan {
    /// The selector is not consulted; route on the full budget.
    Skip(RoutingDecision),
    /// The selector chooses among the survivors of the reduced budget.
    Consult { budgeted: RoutingRequest, base: RoutingDecision },
}

/// Result of a dry run: what the router would do, without calling any backend.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionPreview {
    pub requirements: RequirementProfile,
    pub decision: RoutingDecision,
    /// Whether a live route would consult the escalation selector.
    pub escalates: bool,
}

/// Adaptive backend router.
pub struct BackendRouter {
    registry: Arc<CapabilityRegistry>,
    tracker: Arc<UsageTracker>,
    breaker: Arc<CircuitBreaker>,
    pool: Arc<BackendPool>,
    analyzer: RequirementAnalyzer,
    dispatcher: Dispatcher,
    reporter: StatisticsReporter,
    probe: HealthProbe,
    state: RwLock<Arc<RouterState>>,
}

impl BackendRouter {
    /// Builds a router from validated configuration, connecting every backend
    /// that declares a connection block.
    ///
    /// # Errors
    /// Returns `RouterError::Configuration` if validation fails or a connection
    /// cannot be built.
    pub fn from_config(config: &RouterConfig) -> Result<Self, RouterError> {
        RouterConfigLoader::validate(config)?;
        let snapshot = config.registry_snapshot()?;
        let connections = config.build_connections()?;

        let tracker = Arc::new(UsageTracker::with_window(config.usage_window()));
        tracker.sync_limits(&snapshot);
        let breaker = Arc::new(CircuitBreaker::with_settings(config.circuit_breaker));
        let pool = Arc::new(BackendPool::new());
        pool.replace(connections);
        let registry = Arc::new(CapabilityRegistry::new(snapshot));
        let state = RouterState {
            snapshot: registry.snapshot(),
            settings: Arc::new(RouterSettings::from_config(config)),
        };

        info!(
            backends = config.backends.len(),
            connected = pool.len(),
            escalation = config.escalation_settings().is_some(),
            "Backend router initialized"
        );

        let dispatcher =
            Dispatcher::new(Arc::clone(&pool), Arc::clone(&tracker), Arc::clone(&breaker));
        let reporter = StatisticsReporter::new(
            Arc::clone(&registry),
            Arc::clone(&tracker),
            Arc::clone(&breaker),
        );

        Ok(Self {
            dispatcher,
            reporter,
            probe: HealthProbe::new(Arc::clone(&registry), Arc::clone(&pool)),
            analyzer: RequirementAnalyzer::new(),
            state: RwLock::new(Arc::new(state)),
            registry,
            tracker,
            breaker,
            pool,
        })
    }

    /// Loads configuration from a TOML file and builds a router.
    ///
    /// # Errors
    /// Returns `RouterError::Configuration` if the file cannot be loaded.
    pub fn from_path(path: &Path) -> Result<Self, RouterError> {
        let config = RouterConfigLoader::load(path)?;
        Self::from_config(&config)
    }

    /// Replaces the requirement analyzer.
    #[must_use]
    pub fn with_analyzer(mut self, analyzer: RequirementAnalyzer) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// Registers (or replaces) the live connection for a backend.
    pub fn register_backend(&self, id: BackendId, backend: Arc<dyn Backend>) {
        if !self.registry.snapshot().contains(&id) {
            warn!(backend = %id, "Registering connection for a backend that is not catalogued");
        }
        debug!(backend = %id, model_id = backend.model_id(), "Backend connection registered");
        self.pool.insert(id, backend);
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> &Arc<UsageTracker> {
        &self.tracker
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Current settings.
    pub fn settings(&self) -> Arc<RouterSettings> {
        Arc::clone(&self.state().settings)
    }

    fn state(&self) -> Arc<RouterState> {
        Arc::clone(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Routes a request and returns the generated output.
    ///
    /// # Errors
    /// Returns `RouterError::AllBackendsFailed` when every backend in the chain failed.
    pub async fn route(&self, request: &RoutingRequest) -> Result<RouteResult, RouterError> {
        self.route_with_cancellation(request, &CancellationToken::new(), None).await
    }

    /// Routes a request, stopping when `cancel` fires or `deadline` passes.
    ///
    /// # Errors
    /// Returns `RouterError::Cancelled` or `RouterError::DeadlineExceeded` in
    /// addition to the errors of [`route`](Self::route).
    pub async fn route_with_cancellation(
        &self,
        request: &RoutingRequest,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<RouteResult, RouterError> {
        let state = self.state();
        let (snapshot, settings) = (&state.snapshot, &state.settings);
        let engine = self.engine(settings);
        let requirements = self.analyzer.analyze(request);

        let decision = match self.selector_for(snapshot, settings, &requirements) {
            Some(meta) => match plan_escalation(&engine, snapshot, &meta, request, &requirements) {
                EscalationPlan::Skip(decision) => decision,
                EscalationPlan::Consult { budgeted, base } => {
                    self.escalate(
                        &engine,
                        snapshot,
                        settings,
                        &meta,
                        &budgeted,
                        base,
                        &requirements,
                        cancel,
                        deadline,
                    )
                    .await?
                }
            },
            None => engine.decide(snapshot, request, &requirements),
        };

        let options = DispatchOptions {
            call_timeout: settings.call_timeout,
            buffer_ratio: settings.engine.buffer_ratio,
            deadline,
            parameters: None,
        };
        self.dispatcher.dispatch(snapshot, &decision, request, &options, cancel).await
    }

    /// Computes the decision for a request without calling any backend.
    pub fn decide(&self, request: &RoutingRequest) -> DecisionPreview {
        let state = self.state();
        let engine = self.engine(&state.settings);
        let requirements = self.analyzer.analyze(request);

        let plan = self
            .selector_for(&state.snapshot, &state.settings, &requirements)
            .map(|meta| plan_escalation(&engine, &state.snapshot, &meta, request, &requirements));

        let (decision, escalates) = match plan {
            Some(EscalationPlan::Consult { base, .. }) => (base, true),
            Some(EscalationPlan::Skip(decision)) => (decision, false),
            None => (engine.decide(&state.snapshot, request, &requirements), false),
        };
        DecisionPreview { requirements, decision, escalates }
    }

    /// Per-backend usage, cost and circuit statistics.
    pub fn stats(&self) -> RouterStats {
        self.reporter.snapshot()
    }

    /// Probes every catalogued backend concurrently.
    pub async fn health(&self, timeout: Duration) -> HealthReport {
        self.probe.check(timeout).await
    }

    /// Applies new configuration. Invalid configuration leaves the router untouched.
    ///
    /// Usage counters and circuit state survive the reload; capacity limits
    /// follow the new catalogue. The connection pool is rebuilt from the new
    /// configuration, so connections added with
    /// [`register_backend`](Self::register_backend) are dropped. Requests see
    /// either the old catalogue and settings or the new ones, never a mix.
    ///
    /// # Errors
    /// Returns `RouterError::Configuration` if the configuration is rejected.
    pub fn reload(&self, config: &RouterConfig) -> Result<(), RouterError> {
        RouterConfigLoader::validate(config)?;
        let snapshot = config.registry_snapshot()?;
        let connections = config.build_connections()?;
        let settings = Arc::new(RouterSettings::from_config(config));

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        self.tracker.sync_limits(&snapshot);
        self.pool.replace(connections);
        let snapshot = self.registry.reload(snapshot);
        *state = Arc::new(RouterState { snapshot, settings });
        drop(state);

        info!(
            backends = config.backends.len(),
            connected = self.pool.len(),
            "Router configuration reloaded"
        );
        Ok(())
    }

    /// Loads and applies configuration from a TOML file.
    ///
    /// # Errors
    /// Returns `RouterError::Configuration` if the file cannot be loaded or is rejected.
    pub fn reload_from_path(&self, path: &Path) -> Result<(), RouterError> {
        let config = RouterConfigLoader::load(path).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Configuration reload rejected");
            RouterError::Configuration(e)
        })?;
        self.reload(&config)
    }

    fn engine(&self, settings: &RouterSettings) -> DecisionEngine {
        DecisionEngine::new(settings.engine, Arc::clone(&self.tracker), Arc::clone(&self.breaker))
    }

    /// The meta-router for this request, if escalation applies.
    fn selector_for(
        &self,
        snapshot: &RegistrySnapshot,
        settings: &RouterSettings,
        requirements: &RequirementProfile,
    ) -> Option<MetaRouter> {
        let escalation = settings.escalation.as_ref()?;
        if requirements.complexity_score.score < escalation.threshold {
            return None;
        }

        let Some(backend) = self.pool.get(&escalation.selector) else {
            warn!(
                selector = %escalation.selector,
                "Escalation selector has no connection, using deterministic ranking"
            );
            return None;
        };

        if !snapshot.contains(&escalation.selector) {
            debug!(selector = %escalation.selector, "Escalation selector is not catalogued");
        }

        Some(MetaRouter::new(escalation.clone(), backend))
    }

    #[allow(clippy::too_many_arguments)]
    async fn escalate(
        &self,
        engine: &DecisionEngine,
        snapshot: &RegistrySnapshot,
        settings: &RouterSettings,
        meta: &MetaRouter,
        budgeted: &RoutingRequest,
        base: RoutingDecision,
        requirements: &RequirementProfile,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<RoutingDecision, RouterError> {
        let survivors: Vec<_> = base.evaluations.iter().filter(|e| e.passed()).collect();

        let selector = meta.settings().selector.clone();
        let timeout = deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
            .map_or(settings.call_timeout, |remaining| remaining.min(settings.call_timeout));

        info!(
            selector = %selector,
            complexity = requirements.complexity_score.score,
            candidates = survivors.len(),
            "Escalating to meta-router"
        );

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                warn!(selector = %selector, "Request cancelled during escalation");
                return Err(RouterError::Cancelled { attempts: Vec::new() });
            }
            outcome = meta.suggest(budgeted, &survivors, timeout) => outcome,
        };

        let suggestion = match outcome {
            Ok(suggestion) => suggestion,
            Err(e) => {
                warn!(
                    selector = %selector,
                    error = %e,
                    "Escalation failed, using deterministic ranking"
                );
                return Ok(base);
            }
        };

        self.record_selector_usage(snapshot, meta, suggestion.usage.as_ref());

        let suggested = &suggestion.backend_id;
        let applied =
            engine.apply_suggestion(snapshot, budgeted, requirements, &base, suggested, &selector);
        match applied {
            Ok(decision) => {
                info!(selector = %selector, selected = %decision.selected, "Meta-routed decision");
                Ok(decision)
            }
            Err(reason) => {
                warn!(
                    selector = %selector,
                    suggestion = %suggestion.backend_id,
                    reason = %reason,
                    "Rejected selector suggestion, using deterministic ranking"
                );
                Ok(base)
            }
        }
    }

    fn record_selector_usage(
        &self,
        snapshot: &RegistrySnapshot,
        meta: &MetaRouter,
        usage: Option<&TokenUsage>,
    ) {
        let settings = meta.settings();
        let (prompt, completion) = usage.map_or(
            (settings.estimated_input_tokens, settings.estimated_output_tokens),
            |u| (u.prompt_tokens, u.completion_tokens),
        );
        let cost =
            snapshot.get(&settings.selector).map_or(0.0, |p| p.projected_cost(prompt, completion));
        let tokens = u64::from(prompt) + u64::from(completion);

        if let Err(e) = self.tracker.record(&settings.selector, 1, tokens, cost) {
            warn!(selector = %settings.selector, error = %e, "Failed to record selector usage");
        }
    }
}

fn survivor_count(decision: &RoutingDecision) -> usize {
    decision.evaluations.iter().filter(|e| e.passed()).count()
}

/// Decides whether the selector is worth consulting.
///
/// The selector's cost comes out of the budget only when it will actually be
/// called: at least two candidates must survive both the full budget and the
/// reduced one. Otherwise the request routes on its full budget.
fn plan_escalation(
    engine: &DecisionEngine,
    snapshot: &RegistrySnapshot,
    meta: &MetaRouter,
    request: &RoutingRequest,
    requirements: &RequirementProfile,
) -> EscalationPlan {
    let full = engine.decide(snapshot, request, requirements);
    if survivor_count(&full) < 2 {
        debug!(survivors = survivor_count(&full), "Nothing for the selector to choose between");
        return EscalationPlan::Skip(full);
    }

    let budgeted = deduct_selector_cost(engine, snapshot, meta, request);
    let base = engine.decide(snapshot, &budgeted, requirements);
    if survivor_count(&base) < 2 {
        debug!(
            survivors = survivor_count(&base),
            "Selector cost leaves nothing to choose between, routing on the full budget"
        );
        return EscalationPlan::Skip(full);
    }

    EscalationPlan::Consult { budgeted, base }
}

/// The request with the selector's projected cost taken out of its budget.
fn deduct_selector_cost(
    engine: &DecisionEngine,
    snapshot: &RegistrySnapshot,
    meta: &MetaRouter,
    request: &RoutingRequest,
) -> RoutingRequest {
    let budget = engine.effective_budget(request);
    let selector_cost = meta.projected_cost(snapshot);
    let remaining = (budget - selector_cost).max(0.0);
    debug!(
        budget = budget,
        selector_cost = selector_cost,
        remaining = remaining,
        "Reserved budget for escalation"
    );
    request.clone().with_cost_budget(remaining)
}

impl std::fmt::Debug for BackendRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRouter")
            .field("registry_version", &self.state().snapshot.version())
            .field("pool", &self.pool)
            .field("settings", &self.settings())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DecisionKind;
    use crate::types::TaskCategory;

    const CONFIG: &str = r#"
[[backends]]
id = "local:echo"
context_window = 8192
input_price_per_1k = 0.0
output_price_per_1k = 0.0
requests_per_minute = 10
tokens_per_minute = 100000
quality = 0.6
speed = 0.9
connection = { kind = "mock" }
"#;

    #[tokio::test]
    async fn test_route_survives_poisoned_usage_window() {
        let config = RouterConfigLoader::parse(CONFIG).unwrap();
        let router = BackendRouter::from_config(&config).unwrap();
        let echo = BackendId::new("local", "echo");
        // Nine of ten requests used: near the limit while the window is readable.
        router.tracker().record(&echo, 9, 0, 0.0).unwrap();
        router.tracker().poison(&echo);

        let request = RoutingRequest::from_prompt(TaskCategory::General, "hello");
        assert_eq!(router.decide(&request).decision.kind, DecisionKind::Scored);

        let result = router.route(&request).await.unwrap();
        assert_eq!(result.backend_id, echo);
        assert_eq!(result.output_text, "Mock response from echo: hello");
    }
}
