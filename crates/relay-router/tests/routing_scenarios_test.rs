//! End-to-end routing scenarios through `BackendRouter`.

mod common;

use common::{backend, config, connection, id, router, with_category};
use relay_abstraction::{Backend, BackendError};
use relay_models::MockBackend;
use relay_router::{
    BackendId, Capability, DecisionKind, Filter, RouterError, RoutingRequest, TaskCategory,
};
use std::sync::Arc;
use std::time::Duration;

fn request(prompt: &str) -> RoutingRequest {
    RoutingRequest::from_prompt(TaskCategory::General, prompt).with_token_estimates(500, 500)
}

#[test]
fn test_capability_and_budget_exclusion() {
    let config = config(vec![
        backend("acme:cheap", 0.002, 0.7, 0.7, &[Capability::FunctionCalling]),
        backend("acme:plain", 0.02, 0.9, 0.9, &[]),
        backend("acme:premium", 0.03, 0.95, 0.9, &[Capability::FunctionCalling]),
    ]);
    let router = router(&config, Vec::new());

    let request = request("book a table for two")
        .with_cost_budget(0.01)
        .requiring_function_calling();
    let decision = router.decide(&request).decision;

    assert_eq!(decision.selected, id("acme:cheap"));
    assert_eq!(decision.kind, DecisionKind::Scored);
    assert!((decision.estimated_cost - 0.002).abs() < 1e-12);
    assert!(decision.fallback_chain.is_empty());

    let failed = |backend_id: &str| {
        let evaluation = decision.evaluations.iter().find(|e| e.backend_id == id(backend_id));
        evaluation.unwrap().failed_filters()
    };
    assert!(failed("acme:plain").contains(&Filter::Capabilities));
    assert_eq!(failed("acme:premium"), vec![Filter::Budget]);
    assert!(failed("acme:cheap").is_empty());
}

#[tokio::test]
async fn test_near_limit_single_backend_forced_fallback() {
    let config = with_category(
        config(vec![
            backend("acme:solo", 0.001, 0.8, 0.8, &[]),
            backend("acme:other", 0.001, 0.8, 0.8, &[]),
        ]),
        TaskCategory::Coding,
        &["acme:solo"],
    );
    let router = router(&config, vec![("acme:solo", connection(MockBackend::new("solo")))]);
    router.tracker().record(&id("acme:solo"), 95, 0, 0.0).unwrap();

    let request = RoutingRequest::from_prompt(TaskCategory::Coding, "fix the typo")
        .with_token_estimates(100, 100);
    let decision = router.decide(&request).decision;

    assert_eq!(decision.selected, id("acme:solo"));
    assert!(decision.is_forced());
    assert!((decision.confidence - 0.5).abs() < f64::EPSILON);
    assert!(decision.rationale.starts_with("forced fallback"));
    assert!(decision.rationale.contains("capacity=fail"));

    // The forced primary is still dispatched.
    let result = router.route(&request).await.unwrap();
    assert_eq!(result.backend_id, id("acme:solo"));
    assert_eq!(router.tracker().snapshot(&id("acme:solo")).unwrap().requests_in_window, 96);
}

#[test]
fn test_weighted_score_picks_higher_total() {
    // Budget $0.01: X costs 50% of it, Y costs 10%.
    let config = config(vec![
        backend("acme:x", 0.005, 0.9, 0.7, &[]),
        backend("acme:y", 0.001, 0.7, 0.9, &[]),
    ]);
    let router = router(&config, Vec::new());
    let request = request("hello").with_cost_budget(0.01).with_quality_floor(1.0);

    let x_score = 0.3 * 0.9 + 0.4 * (1.0 - 0.5) + 0.3 * 0.7;
    let y_score = 0.3 * 0.7 + 0.4 * (1.0 - 0.1) + 0.3 * 0.9;
    assert!(y_score > x_score);

    let decision = router.decide(&request).decision;
    assert_eq!(decision.selected, id("acme:y"));
    assert!((decision.confidence - y_score).abs() < 1e-9);
    assert_eq!(decision.fallback_chain, vec![id("acme:x")]);

    let x = decision.evaluations.iter().find(|e| e.backend_id == id("acme:x")).unwrap();
    assert!((x.score.unwrap().total - x_score).abs() < 1e-9);

    for _ in 0..20 {
        assert_eq!(router.decide(&request).decision, decision);
    }
}

#[tokio::test]
async fn test_failure_then_timeout_then_success() {
    let mut config = config(vec![
        backend("acme:a", 0.001, 0.8, 0.9, &[]),
        backend("acme:b", 0.001, 0.8, 0.6, &[]),
        backend("acme:c", 0.001, 0.8, 0.3, &[]),
    ]);
    config.call_timeout_ms = 200;

    let error = BackendError::ResponseError("HTTP 500".to_string());
    let a = Arc::new(MockBackend::new("a").failing_with(error));
    let b = Arc::new(MockBackend::new("b").with_delay(Duration::from_secs(5)));
    let c = Arc::new(MockBackend::new("c").with_reply("from c").with_usage(10, 5));
    let router = router(
        &config,
        vec![
            ("acme:a", a.clone() as Arc<dyn Backend>),
            ("acme:b", b.clone() as Arc<dyn Backend>),
            ("acme:c", c.clone() as Arc<dyn Backend>),
        ],
    );

    let result = router.route(&request("hello")).await.unwrap();

    assert_eq!(result.backend_id, id("acme:c"));
    assert_eq!(result.output_text, "from c");
    assert_eq!(result.fallback_chain_used, vec![id("acme:a"), id("acme:b"), id("acme:c")]);
    assert_eq!(result.tokens_used, 15);
    assert!((result.actual_cost - 15.0 / 1000.0 * 0.001).abs() < 1e-12);
    let rationale = &result.decision_rationale;
    assert!(rationale.contains("served by fallback acme:c after 2 failed attempt(s)"));
    assert_eq!(a.calls() + b.calls() + c.calls(), 3);

    let tracker = router.tracker();
    assert_eq!(tracker.snapshot(&id("acme:a")).unwrap().requests_in_window, 0);
    assert_eq!(tracker.snapshot(&id("acme:b")).unwrap().requests_in_window, 0);
    assert_eq!(tracker.snapshot(&id("acme:c")).unwrap().requests_in_window, 1);
    assert!((router.stats().total_cost_today - result.actual_cost).abs() < 1e-12);
}

#[tokio::test]
async fn test_all_backends_failed_lists_every_attempt() {
    let config = config(vec![
        backend("acme:a", 0.0, 0.8, 0.9, &[]),
        backend("acme:b", 0.0, 0.8, 0.5, &[]),
    ]);
    let refused = MockBackend::new("a")
        .failing_with(BackendError::RequestError("refused".to_string()));
    let router = router(&config, vec![("acme:a", connection(refused))]);

    let err = router.route(&request("hello")).await.unwrap_err();
    assert!(matches!(err, RouterError::AllBackendsFailed { .. }));
    assert_eq!(err.attempts().len(), 2);
    assert_eq!(
        err.to_string(),
        "All backends failed: acme:a: Request Error: refused; \
         acme:b: no backend connection registered"
    );
}

#[test]
fn test_vision_requests_never_select_non_vision_backends() {
    let catalogue = || {
        with_category(
            config(vec![
                backend("acme:v1", 0.001, 0.9, 0.5, &[Capability::Vision]),
                backend("acme:text", 0.0, 0.99, 0.99, &[]),
                backend(
                    "acme:v2",
                    0.001,
                    0.7,
                    0.9,
                    &[Capability::Vision, Capability::FunctionCalling],
                ),
            ]),
            TaskCategory::General,
            &["acme:v1", "acme:text", "acme:v2"],
        )
    };
    let ids = ["acme:v1", "acme:text", "acme:v2"];

    for mask in 0..8_u32 {
        let config = catalogue();
        let router = router(&config, Vec::new());
        for (bit, backend_id) in ids.iter().enumerate() {
            if mask & (1 << bit) != 0 {
                router.tracker().record(&id(backend_id), 80, 0, 0.0).unwrap();
            }
        }

        let request = request("what is in this picture?").requiring_vision();
        let decision = router.decide(&request).decision;
        let has_vision = |backend_id: &BackendId| {
            let profile = config.backends.iter().find(|b| b.id == *backend_id).unwrap();
            profile.capabilities.contains(&Capability::Vision)
        };
        assert!(has_vision(&decision.selected), "mask {mask}: selected {}", decision.selected);
        assert!(decision.fallback_chain.iter().all(has_vision), "mask {mask}");
    }
}

#[test]
fn test_admission_follows_recorded_usage() {
    let config = config(vec![
        backend("acme:busy", 0.0, 0.9, 0.9, &[]),
        backend("acme:idle", 0.0, 0.6, 0.6, &[]),
    ]);
    let router = router(&config, Vec::new());
    let busy = id("acme:busy");

    router.tracker().record(&busy, 79, 0, 0.0).unwrap();
    assert_eq!(router.decide(&request("hi")).decision.selected, busy);

    router.tracker().record(&busy, 1, 0, 0.0).unwrap();
    assert_eq!(router.decide(&request("hi")).decision.selected, id("acme:idle"));

    router.tracker().reset(&busy);
    assert_eq!(router.decide(&request("hi")).decision.selected, busy);
}

#[test]
fn test_decisions_are_deterministic() {
    let config = config(vec![
        backend("acme:a", 0.002, 0.8, 0.5, &[]),
        backend("acme:b", 0.001, 0.8, 0.5, &[]),
        backend("acme:c", 0.002, 0.8, 0.5, &[]),
        backend("beta:d", 0.004, 0.95, 0.2, &[]),
        backend("beta:e", 0.0, 0.3, 0.99, &[]),
    ]);
    let router = router(&config, Vec::new());
    router.tracker().record(&id("beta:d"), 40, 0, 0.0).unwrap();

    let first = router.decide(&request("summarize the meeting notes"));
    // Equal scores keep catalogue order.
    let order = first.decision.dispatch_order();
    let a = order.iter().position(|x| *x == id("acme:a")).unwrap();
    let c = order.iter().position(|x| *x == id("acme:c")).unwrap();
    assert!(a < c);

    for _ in 0..50 {
        let again = router.decide(&request("summarize the meeting notes"));
        assert_eq!(again.decision, first.decision);
        assert_eq!(again.requirements, first.requirements);
    }
}

#[tokio::test]
async fn test_fallback_chain_used_is_a_prefix_of_the_decision() {
    let scenarios: [&[bool]; 3] = [&[true], &[false, true], &[false, false, true]];

    for outcomes in scenarios {
        let config = config(vec![
            backend("acme:a", 0.0, 0.8, 0.9, &[]),
            backend("acme:b", 0.0, 0.8, 0.6, &[]),
            backend("acme:c", 0.0, 0.8, 0.3, &[]),
        ]);
        let connections: Vec<(&str, Arc<dyn Backend>)> = ["acme:a", "acme:b", "acme:c"]
            .into_iter()
            .enumerate()
            .map(|(i, backend_id)| {
                let mock = MockBackend::new(backend_id);
                let mock = if outcomes.get(i).copied().unwrap_or(true) {
                    mock
                } else {
                    mock.failing_with(BackendError::ResponseError("boom".to_string()))
                };
                (backend_id, Arc::new(mock) as Arc<dyn Backend>)
            })
            .collect();
        let router = router(&config, connections);

        let planned = router.decide(&request("hello")).decision.dispatch_order();
        let result = router.route(&request("hello")).await.unwrap();

        let used = &result.fallback_chain_used;
        assert_eq!(used.as_slice(), &planned[..outcomes.len()]);
        assert_eq!(used.last(), Some(&result.backend_id));
        assert_eq!(result.decision.selected, result.backend_id);
    }
}
