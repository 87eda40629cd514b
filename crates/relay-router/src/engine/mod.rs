//! Decision engine: filters, scores and ranks candidate backends.
//!
//! The engine is deterministic. For a fixed registry snapshot, usage state
//! and request it always returns the same decision, and it always returns
//! one: when nothing survives the filters it force-selects the category's
//! first preference.

pub mod scoring;

pub use scoring::{ScoreBreakdown, score};

use crate::analyzer::RequirementProfile;
use crate::circuit_breaker::CircuitBreaker;
use crate::registry::RegistrySnapshot;
use crate::request::RoutingRequest;
use crate::types::{BackendId, ScoringWeights};
use crate::usage::UsageTracker;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt::{self, Write as _};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Confidence reported for forced fallback decisions.
pub const FORCED_FALLBACK_CONFIDENCE: f64 = 0.5;

/// A candidate filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    Registered,
    Capabilities,
    ContextWindow,
    CircuitBreaker,
    Capacity,
    Budget,
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Registered => "registered",
            Self::Capabilities => "capabilities",
            Self::ContextWindow => "context_window",
            Self::CircuitBreaker => "circuit",
            Self::Capacity => "capacity",
            Self::Budget => "budget",
        };
        f.write_str(name)
    }
}

/// Outcome of one filter for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterCheck {
    pub filter: Filter,
    pub passed: bool,
    pub detail: Option<String>,
}

impl FilterCheck {
    fn pass(filter: Filter) -> Self {
        Self { filter, passed: true, detail: None }
    }

    fn fail(filter: Filter, detail: impl Into<String>) -> Self {
        Self { filter, passed: false, detail: Some(detail.into()) }
    }

    fn check(filter: Filter, passed: bool, detail: impl FnOnce() -> String) -> Self {
        if passed { Self::pass(filter) } else { Self::fail(filter, detail()) }
    }
}

/// Filter results and score for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateEvaluation {
    pub backend_id: BackendId,
    /// Position in the category's preference list.
    pub preference_rank: usize,
    pub projected_cost: Option<f64>,
    pub checks: Vec<FilterCheck>,
    /// Present only when every filter passed.
    pub score: Option<ScoreBreakdown>,
}

impl CandidateEvaluation {
    /// Whether every filter passed.
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    /// Filters that failed.
    pub fn failed_filters(&self) -> Vec<Filter> {
        self.checks.iter().filter(|c| !c.passed).map(|c| c.filter).collect()
    }

    fn total(&self) -> f64 {
        self.score.map_or(0.0, |s| s.total)
    }

    /// One-line summary used in rationales.
    pub fn summary(&self) -> String {
        let mut line = self.backend_id.to_string();
        for check in &self.checks {
            let _ = match (check.passed, &check.detail) {
                (true, _) => write!(line, " {}=pass", check.filter),
                (false, Some(detail)) => write!(line, " {}=fail({})", check.filter, detail),
                (false, None) => write!(line, " {}=fail", check.filter),
            };
        }
        if let Some(cost) = self.projected_cost {
            let _ = write!(line, " cost=${:.4}", cost);
        }
        if let Some(score) = self.score {
            let _ = write!(line, " score={:.3}", score.total);
        }
        line
    }
}

/// How a decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    /// Highest weighted score.
    Scored,
    /// Chosen by the escalation selector and re-validated.
    MetaRouted,
    /// No candidate survived the filters.
    ForcedFallback,
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Scored => "scored",
            Self::MetaRouted => "meta_routed",
            Self::ForcedFallback => "forced_fallback",
        };
        f.write_str(name)
    }
}

/// The engine's choice for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingDecision {
    pub selected: BackendId,
    pub estimated_cost: f64,
    pub confidence: f64,
    /// Remaining candidates in descending score order.
    pub fallback_chain: Vec<BackendId>,
    pub rationale: String,
    pub kind: DecisionKind,
    /// Budget the candidates were filtered against.
    pub budget: f64,
    pub evaluations: Vec<CandidateEvaluation>,
}

impl RoutingDecision {
    /// Whether this decision bypassed the filters.
    pub fn is_forced(&self) -> bool {
        self.kind == DecisionKind::ForcedFallback
    }

    /// Backends in dispatch order: the selection followed by the fallback chain.
    pub fn dispatch_order(&self) -> Vec<BackendId> {
        std::iter::once(self.selected.clone()).chain(self.fallback_chain.iter().cloned()).collect()
    }

    /// The decision as served by `backend_id` after `failed_attempts` failures.
    #[must_use]
    pub fn served_by(
        &self,
        backend_id: &BackendId,
        estimated_cost: f64,
        failed_attempts: usize,
    ) -> Self {
        if *backend_id == self.selected {
            return self.clone();
        }

        let fallback_chain = self
            .fallback_chain
            .iter()
            .skip_while(|id| *id != backend_id)
            .skip(1)
            .cloned()
            .collect();

        let mut rationale = self.rationale.clone();
        let _ = write!(
            rationale,
            "\nserved by fallback {} after {} failed attempt(s)",
            backend_id, failed_attempts
        );

        Self {
            selected: backend_id.clone(),
            estimated_cost,
            fallback_chain,
            rationale,
            ..self.clone()
        }
    }
}

/// Tunables for the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EngineSettings {
    pub weights: ScoringWeights,
    pub buffer_ratio: f64,
    pub default_cost_budget: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self { weights: ScoringWeights::default(), buffer_ratio: 0.8, default_cost_budget: 0.10 }
    }
}

/// Selects a backend for a request.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    settings: EngineSettings,
    tracker: Arc<UsageTracker>,
    breaker: Arc<CircuitBreaker>,
}

impl DecisionEngine {
    #[must_use]
    pub fn new(
        settings: EngineSettings,
        tracker: Arc<UsageTracker>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self { settings, tracker, breaker }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// The request's budget override, or the configured default.
    pub fn effective_budget(&self, request: &RoutingRequest) -> f64 {
        request.cost_budget.unwrap_or(self.settings.default_cost_budget)
    }

    /// Runs every filter against one candidate and scores it if it survives.
    pub fn evaluate_candidate(
        &self,
        snapshot: &RegistrySnapshot,
        id: &BackendId,
        preference_rank: usize,
        request: &RoutingRequest,
        requirements: &RequirementProfile,
        budget: f64,
    ) -> CandidateEvaluation {
        let Ok(profile) = snapshot.get(id) else {
            return CandidateEvaluation {
                backend_id: id.clone(),
                preference_rank,
                projected_cost: None,
                checks: vec![FilterCheck::fail(Filter::Registered, "not in registry")],
                score: None,
            };
        };

        let input_tokens = request.input_tokens();
        let output_tokens = request.output_tokens();
        let projected_cost = profile.projected_cost(input_tokens, output_tokens);
        let needed_context = request.total_tokens();

        let capable = profile.supports(&requirements.required_capabilities);
        let fits_context = u64::from(profile.context_window) >= needed_context;
        let circuit_closed = !self.breaker.should_skip(id);
        let has_capacity = !self.tracker.is_near_limit(id, self.settings.buffer_ratio);

        let checks = vec![
            FilterCheck::pass(Filter::Registered),
            FilterCheck::check(Filter::Capabilities, capable, || {
                let missing: Vec<String> = profile
                    .missing_capabilities(&requirements.required_capabilities)
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                format!("missing {}", missing.join(", "))
            }),
            FilterCheck::check(Filter::ContextWindow, fits_context, || {
                format!("needs {} tokens, window {}", needed_context, profile.context_window)
            }),
            FilterCheck::check(Filter::CircuitBreaker, circuit_closed, || {
                "circuit open".to_string()
            }),
            FilterCheck::check(Filter::Capacity, has_capacity, || {
                format!("near limit (buffer {})", self.settings.buffer_ratio)
            }),
            FilterCheck::check(Filter::Budget, within_budget(projected_cost, budget), || {
                format!("${:.4} over budget ${:.4}", projected_cost, budget)
            }),
        ];

        let passed = checks.iter().all(|c| c.passed);
        let weights = &self.settings.weights;
        let score = passed.then(|| score(profile, requirements, projected_cost, budget, weights));

        debug!(
            backend = %id,
            passed = passed,
            projected_cost = projected_cost,
            score = ?score.map(|s| s.total),
            "Evaluated candidate"
        );

        CandidateEvaluation {
            backend_id: id.clone(),
            preference_rank,
            projected_cost: Some(projected_cost),
            checks,
            score,
        }
    }

    /// Evaluates every candidate in the category's preference list.
    pub fn evaluate(
        &self,
        snapshot: &RegistrySnapshot,
        request: &RoutingRequest,
        requirements: &RequirementProfile,
    ) -> Vec<CandidateEvaluation> {
        let budget = self.effective_budget(request);
        snapshot
            .preference_order(request.task_category)
            .iter()
            .enumerate()
            .map(|(rank, id)| {
                self.evaluate_candidate(snapshot, id, rank, request, requirements, budget)
            })
            .collect()
    }

    /// Selects a backend and fallback chain for the request.
    pub fn decide(
        &self,
        snapshot: &RegistrySnapshot,
        request: &RoutingRequest,
        requirements: &RequirementProfile,
    ) -> RoutingDecision {
        let budget = self.effective_budget(request);
        let evaluations = self.evaluate(snapshot, request, requirements);

        let mut survivors: Vec<&CandidateEvaluation> =
            evaluations.iter().filter(|e| e.passed()).collect();
        survivors.sort_by(|a, b| rank_order(a, b));

        let Some((winner, rest)) = survivors.split_first() else {
            return self.forced_fallback(snapshot, request, budget, evaluations);
        };

        let selected = winner.backend_id.clone();
        let estimated_cost = winner.projected_cost.unwrap_or_default();
        let confidence = winner.total().clamp(0.0, 1.0);
        let fallback_chain: Vec<BackendId> = rest.iter().map(|e| e.backend_id.clone()).collect();

        let rationale = build_rationale(
            &format!("selected {} (score {:.3})", selected, winner.total()),
            request,
            budget,
            &evaluations,
        );

        info!(
            category = %request.task_category,
            selected = %selected,
            confidence = confidence,
            estimated_cost = estimated_cost,
            fallbacks = fallback_chain.len(),
            "Routing decision"
        );

        RoutingDecision {
            selected,
            estimated_cost,
            confidence,
            fallback_chain,
            rationale,
            kind: DecisionKind::Scored,
            budget,
            evaluations,
        }
    }

    fn forced_fallback(
        &self,
        snapshot: &RegistrySnapshot,
        request: &RoutingRequest,
        budget: f64,
        evaluations: Vec<CandidateEvaluation>,
    ) -> RoutingDecision {
        let selected = snapshot.first_preference(request.task_category).clone();
        let estimated_cost = snapshot
            .get(&selected)
            .map(|p| p.projected_cost(request.input_tokens(), request.output_tokens()))
            .unwrap_or_default();

        warn!(
            category = %request.task_category,
            selected = %selected,
            candidates = evaluations.len(),
            "No candidate passed every filter, using forced fallback"
        );

        let rationale = build_rationale(
            &format!("forced fallback: no candidate passed every filter, selected {}", selected),
            request,
            budget,
            &evaluations,
        );

        RoutingDecision {
            selected,
            estimated_cost,
            confidence: FORCED_FALLBACK_CONFIDENCE,
            fallback_chain: Vec::new(),
            rationale,
            kind: DecisionKind::ForcedFallback,
            budget,
            evaluations,
        }
    }

    /// Replaces the selection with an externally suggested backend after re-validating it.
    ///
    /// The suggestion must be one of the decision's candidates and must still pass
    /// every filter against current usage. The previous selection moves to the
    /// head of the fallback chain.
    ///
    /// # Errors
    /// Returns the reason the suggestion was rejected.
    pub fn apply_suggestion(
        &self,
        snapshot: &RegistrySnapshot,
        request: &RoutingRequest,
        requirements: &RequirementProfile,
        base: &RoutingDecision,
        suggestion: &BackendId,
        selector: &BackendId,
    ) -> Result<RoutingDecision, String> {
        if base.is_forced() {
            return Err("no candidate passed the filters".to_string());
        }

        let Some(original) = base.evaluations.iter().find(|e| e.backend_id == *suggestion) else {
            return Err(format!("{} is not a candidate for {}", suggestion, request.task_category));
        };

        let evaluation = self.evaluate_candidate(
            snapshot,
            suggestion,
            original.preference_rank,
            request,
            requirements,
            base.budget,
        );
        if !evaluation.passed() {
            return Err(format!("{} failed re-validation: {}", suggestion, evaluation.summary()));
        }

        if *suggestion == base.selected {
            let mut decision = base.clone();
            decision.kind = DecisionKind::MetaRouted;
            let _ = write!(
                decision.rationale,
                "\nmeta-routed: selector {} confirmed {}",
                selector, suggestion
            );
            return Ok(decision);
        }

        let fallback_chain =
            base.dispatch_order().into_iter().filter(|id| id != suggestion).collect();
        let mut rationale = base.rationale.clone();
        let _ = write!(
            rationale,
            "\nmeta-routed: selector {} chose {} over {}",
            selector, suggestion, base.selected
        );

        Ok(RoutingDecision {
            selected: suggestion.clone(),
            estimated_cost: evaluation.projected_cost.unwrap_or_default(),
            confidence: evaluation.total().clamp(0.0, 1.0),
            fallback_chain,
            rationale,
            kind: DecisionKind::MetaRouted,
            budget: base.budget,
            evaluations: base.evaluations.clone(),
        })
    }
}

/// A non-positive budget admits only free candidates.
fn within_budget(projected_cost: f64, budget: f64) -> bool {
    if budget <= 0.0 { projected_cost <= 0.0 } else { projected_cost <= budget }
}

/// Descending score; ties keep preference-list order.
fn rank_order(a: &CandidateEvaluation, b: &CandidateEvaluation) -> Ordering {
    b.total()
        .partial_cmp(&a.total())
        .unwrap_or(Ordering::Equal)
        .then(a.preference_rank.cmp(&b.preference_rank))
}

fn build_rationale(
    headline: &str,
    request: &RoutingRequest,
    budget: f64,
    evaluations: &[CandidateEvaluation],
) -> String {
    let mut rationale = format!(
        "{}\ncandidates for {} (budget ${:.4}):",
        headline, request.task_category, budget
    );
    for evaluation in evaluations {
        let _ = write!(rationale, "\n  {}", evaluation.summary());
    }
    rationale
}
