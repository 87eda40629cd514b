//! Meta-routing escalation through `BackendRouter`.

mod common;

use common::{backend, config, id, router, with_category};
use relay_abstraction::Backend;
use relay_models::MockBackend;
use relay_router::{
    BackendRouter, Capability, CandidateEvaluation, DecisionKind, DecisionPreview, EscalationConfig,
    Filter, RouterConfig, RoutingRequest, TaskCategory,
};
use std::sync::Arc;
use std::time::Duration;

const FC: &[Capability] = &[Capability::FunctionCalling];

fn escalating_config() -> RouterConfig {
    let mut config = with_category(
        config(vec![
            backend("local:router", 0.001, 0.4, 0.95, &[]),
            backend("acme:top", 0.0, 0.9, 0.9, FC),
            backend("acme:second", 0.0, 0.7, 0.7, FC),
            backend("acme:notools", 0.0, 0.95, 0.95, &[]),
        ]),
        TaskCategory::General,
        &["acme:top", "acme:second", "acme:notools"],
    );
    config.escalation_threshold = 0.0;
    config.escalation = Some(EscalationConfig {
        enabled: true,
        selector: id("local:router"),
        estimated_input_tokens: 400,
        estimated_output_tokens: 20,
    });
    config
}

fn with_selector(
    config: &RouterConfig,
    selector: MockBackend,
) -> (BackendRouter, Arc<MockBackend>) {
    let selector = Arc::new(selector);
    let router = router(
        config,
        vec![
            ("local:router", selector.clone() as Arc<dyn Backend>),
            ("acme:top", Arc::new(MockBackend::new("top")) as Arc<dyn Backend>),
            ("acme:second", Arc::new(MockBackend::new("second")) as Arc<dyn Backend>),
            ("acme:notools", Arc::new(MockBackend::new("notools")) as Arc<dyn Backend>),
        ],
    );
    (router, selector)
}

fn evaluation<'a>(preview: &'a DecisionPreview, backend_id: &str) -> &'a CandidateEvaluation {
    preview.decision.evaluations.iter().find(|e| e.backend_id == id(backend_id)).unwrap()
}

fn selecting(answer: &str) -> MockBackend {
    MockBackend::new("router").with_reply(answer)
}

fn request() -> RoutingRequest {
    RoutingRequest::from_prompt(TaskCategory::General, "draft a reply")
        .with_token_estimates(500, 500)
        .requiring_function_calling()
}

#[tokio::test]
async fn test_selector_choice_is_dispatched() {
    let (router, selector) =
        with_selector(&escalating_config(), selecting("acme:second").with_usage(380, 4));

    let result = router.route(&request()).await.unwrap();

    assert_eq!(selector.calls(), 1);
    assert_eq!(result.backend_id, id("acme:second"));
    assert_eq!(result.decision.kind, DecisionKind::MetaRouted);
    assert_eq!(result.decision.fallback_chain, vec![id("acme:top")]);
    assert_eq!(result.fallback_chain_used, vec![id("acme:second")]);
    assert!(
        result
            .decision_rationale
            .contains("meta-routed: selector local:router chose acme:second over acme:top")
    );

    let usage = router.tracker().snapshot(&id("local:router")).unwrap();
    assert_eq!(usage.requests_in_window, 1);
    assert_eq!(usage.tokens_in_window, 384);
    assert!((usage.cost_today - 0.000_384).abs() < 1e-12);
}

#[tokio::test]
async fn test_unusable_answers_fall_back_to_ranking() {
    for answer in ["whichever you like", "ghost:model", "acme:notools"] {
        let (router, selector) = with_selector(&escalating_config(), selecting(answer));

        let result = router.route(&request()).await.unwrap();

        assert_eq!(selector.calls(), 1, "answer {answer:?}");
        assert_eq!(result.backend_id, id("acme:top"), "answer {answer:?}");
        assert_eq!(result.decision.kind, DecisionKind::Scored, "answer {answer:?}");
    }
}

#[tokio::test]
async fn test_selector_timeout_falls_back_to_ranking() {
    let mut config = escalating_config();
    config.call_timeout_ms = 100;
    let (router, selector) = with_selector(
        &config,
        selecting("acme:second").with_delay(Duration::from_secs(5)),
    );

    let result = router.route(&request()).await.unwrap();

    assert_eq!(selector.calls(), 1);
    assert_eq!(result.backend_id, id("acme:top"));
    assert_eq!(router.tracker().snapshot(&id("local:router")).unwrap().requests_in_window, 0);
}

#[test]
fn test_selector_cost_is_reserved_from_the_budget() {
    let mut config = escalating_config();
    // Projected cost 0.0099, just inside a 0.01 budget.
    config.backends[2].input_price_per_1k = 0.0099;
    config.backends[2].output_price_per_1k = 0.0099;
    let request = RoutingRequest::from_prompt(TaskCategory::General, "draft a reply")
        .with_token_estimates(500, 500)
        .with_cost_budget(0.01);

    let (router, selector) = with_selector(&config, MockBackend::new("router"));
    let preview = router.decide(&request);
    assert!(preview.escalates);
    // Selector projection: 420 tokens at 0.001 per 1k.
    assert!((preview.decision.budget - (0.01 - 0.000_42)).abs() < 1e-12);
    let second = evaluation(&preview, "acme:second");
    assert_eq!(second.failed_filters(), vec![Filter::Budget]);
    assert_eq!(selector.calls(), 0);

    config.escalation = None;
    let (router, _) = with_selector(&config, MockBackend::new("router"));
    let preview = router.decide(&request);
    assert!(!preview.escalates);
    let second = evaluation(&preview, "acme:second");
    assert!(second.passed());
}

#[tokio::test]
async fn test_lone_affordable_backend_is_served_on_full_budget() {
    let mut config = escalating_config();
    // acme:top projects 0.05, acme:second 0.0099; only the latter fits 0.01.
    config.backends[1].input_price_per_1k = 0.05;
    config.backends[1].output_price_per_1k = 0.05;
    config.backends[2].input_price_per_1k = 0.0099;
    config.backends[2].output_price_per_1k = 0.0099;
    let request = request().with_cost_budget(0.01);

    let (router, selector) = with_selector(&config, selecting("acme:top"));

    let preview = router.decide(&request);
    assert!(!preview.escalates);
    assert_eq!(preview.decision.kind, DecisionKind::Scored);
    assert_eq!(preview.decision.selected, id("acme:second"));
    assert!((preview.decision.budget - 0.01).abs() < 1e-12);

    let result = router.route(&request).await.unwrap();
    assert_eq!(selector.calls(), 0);
    assert_eq!(result.backend_id, id("acme:second"));
    assert_eq!(result.decision.kind, DecisionKind::Scored);
    assert!((result.decision.budget - 0.01).abs() < 1e-12);
    assert_eq!(router.tracker().snapshot(&id("local:router")).unwrap().requests_in_window, 0);
}

#[tokio::test]
async fn test_selector_skipped_when_its_cost_leaves_one_candidate() {
    let mut config = escalating_config();
    config.backends[2].input_price_per_1k = 0.0099;
    config.backends[2].output_price_per_1k = 0.0099;
    let request = request().with_cost_budget(0.01);

    let (router, selector) = with_selector(&config, selecting("acme:second"));

    let preview = router.decide(&request);
    assert!(!preview.escalates);
    assert!((preview.decision.budget - 0.01).abs() < 1e-12);
    let second = evaluation(&preview, "acme:second");
    assert!(second.passed());

    let result = router.route(&request).await.unwrap();
    assert_eq!(selector.calls(), 0);
    assert_eq!(result.backend_id, id("acme:top"));
    assert_eq!(result.decision.kind, DecisionKind::Scored);
    assert_eq!(result.decision.fallback_chain, vec![id("acme:second")]);
}

#[tokio::test]
async fn test_no_escalation_below_threshold_or_without_choice() {
    let mut config = escalating_config();
    config.escalation_threshold = 0.9;
    let (router, selector) = with_selector(&config, selecting("acme:second"));
    let result = router.route(&request()).await.unwrap();
    assert_eq!(result.backend_id, id("acme:top"));
    assert_eq!(selector.calls(), 0);

    // A single survivor leaves nothing to choose between.
    let (router, selector) = with_selector(&escalating_config(), selecting("acme:second"));
    let single = request().requiring_vision();
    let result = router.route(&single).await.unwrap();
    assert_eq!(selector.calls(), 0);
    assert_eq!(result.decision.kind, DecisionKind::ForcedFallback);
    assert_eq!(result.backend_id, id("acme:top"));
}

#[test]
fn test_unconnected_selector_disables_escalation() {
    let config = escalating_config();
    let router = router(&config, Vec::new());
    assert!(!router.decide(&request()).escalates);
}
