//! Dispatcher: executes a decision against live backends.
//!
//! Backends are tried in decision order (selection, then fallback chain).
//! Each attempt reserves capacity first, runs under the per-call timeout
//! (shortened to the caller's deadline), and either commits actual usage or
//! releases the reservation. Cancellation and deadline expiry stop the chain
//! immediately.

use crate::circuit_breaker::CircuitBreaker;
use crate::engine::RoutingDecision;
use crate::error::{AttemptError, AttemptFailure, RouterError};
use crate::pool::BackendPool;
use crate::registry::RegistrySnapshot;
use crate::request::{RouteResult, RoutingRequest};
use crate::usage::{UsageError, UsageTracker};
use relay_abstraction::{GenerationParameters, TokenUsage};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-request dispatch options.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Upper bound for a single backend call.
    pub call_timeout: Duration,
    /// Capacity buffer applied when reserving.
    pub buffer_ratio: f64,
    /// Absolute deadline for the whole request.
    pub deadline: Option<Instant>,
    /// Generation parameters passed to every attempt.
    pub parameters: Option<GenerationParameters>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            buffer_ratio: 0.8,
            deadline: None,
            parameters: None,
        }
    }
}

/// Runs routing decisions against the backend pool.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    pool: Arc<BackendPool>,
    tracker: Arc<UsageTracker>,
    breaker: Arc<CircuitBreaker>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        pool: Arc<BackendPool>,
        tracker: Arc<UsageTracker>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self { pool, tracker, breaker }
    }

    /// Dispatches `request` following `decision`.
    ///
    /// # Errors
    /// Returns `RouterError::AllBackendsFailed` when every backend in the chain
    /// failed, `RouterError::Cancelled` when `cancel` fires, and
    /// `RouterError::DeadlineExceeded` when the deadline passes first.
    pub async fn dispatch(
        &self,
        snapshot: &RegistrySnapshot,
        decision: &RoutingDecision,
        request: &RoutingRequest,
        options: &DispatchOptions,
        cancel: &CancellationToken,
    ) -> Result<RouteResult, RouterError> {
        let estimated_tokens = request.total_tokens();
        let mut failures: Vec<AttemptFailure> = Vec::new();
        let mut attempted = Vec::new();

        for (index, id) in decision.dispatch_order().into_iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(
                    backend = %id,
                    failed_attempts = failures.len(),
                    "Request cancelled before attempt"
                );
                return Err(RouterError::Cancelled { attempts: failures });
            }

            let remaining = match options.deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        warn!(
                            backend = %id,
                            failed_attempts = failures.len(),
                            "Deadline passed before attempt"
                        );
                        return Err(RouterError::DeadlineExceeded { attempts: failures });
                    }
                    Some(deadline - now)
                }
                None => None,
            };

            attempted.push(id.clone());

            let Ok(profile) = snapshot.get(&id) else {
                failures
                    .push(AttemptFailure { backend_id: id, error: AttemptError::NotRegistered });
                continue;
            };

            let Some(backend) = self.pool.get(&id) else {
                warn!(backend = %id, "No connection registered for backend");
                failures.push(AttemptFailure { backend_id: id, error: AttemptError::NotConnected });
                continue;
            };

            // The forced primary bypasses the capacity filter by definition.
            let enforce = !(decision.is_forced() && index == 0);
            let reserved =
                self.tracker.try_reserve(&id, estimated_tokens, options.buffer_ratio, enforce);
            let reservation = match reserved {
                Ok(reservation) => Some(reservation),
                Err(UsageError::CapacityExceeded(_)) => {
                    warn!(
                        backend = %id,
                        "Backend reached its capacity buffer after the decision, skipping"
                    );
                    failures.push(AttemptFailure {
                        backend_id: id,
                        error: AttemptError::CapacityExceeded,
                    });
                    continue;
                }
                Err(e) => {
                    warn!(
                        backend = %id,
                        error = %e,
                        "Usage reservation failed, dispatching without it"
                    );
                    None
                }
            };

            let attempt_timeout =
                remaining.map_or(options.call_timeout, |r| r.min(options.call_timeout));
            let bounded_by_deadline = remaining.is_some_and(|r| r <= options.call_timeout);

            debug!(
                backend = %id,
                attempt = index + 1,
                timeout_ms = attempt_timeout.as_millis(),
                "Dispatching to backend"
            );

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    drop(reservation);
                    warn!(
                        backend = %id,
                        failed_attempts = failures.len(),
                        "Request cancelled during attempt"
                    );
                    return Err(RouterError::Cancelled { attempts: failures });
                }
                result = tokio::time::timeout(
                    attempt_timeout,
                    backend.generate(&request.messages, options.parameters.clone()),
                ) => result,
            };

            let response = match outcome {
                Ok(Ok(response)) => response,
                Ok(Err(error)) => {
                    drop(reservation);
                    self.breaker.record_failure(&id);
                    warn!(
                        backend = %id,
                        error = %error,
                        "Backend call failed, trying next fallback"
                    );
                    failures.push(AttemptFailure {
                        backend_id: id,
                        error: AttemptError::Backend { error },
                    });
                    continue;
                }
                Err(_) => {
                    drop(reservation);
                    let after_ms = u64::try_from(attempt_timeout.as_millis()).unwrap_or(u64::MAX);
                    failures.push(AttemptFailure {
                        backend_id: id.clone(),
                        error: AttemptError::Timeout { after_ms },
                    });
                    if bounded_by_deadline {
                        warn!(backend = %id, "Deadline exceeded during attempt");
                        return Err(RouterError::DeadlineExceeded { attempts: failures });
                    }
                    self.breaker.record_failure(&id);
                    warn!(
                        backend = %id,
                        timeout_ms = after_ms,
                        "Backend call timed out, trying next fallback"
                    );
                    continue;
                }
            };

            let usage = response.usage.unwrap_or_else(|| {
                let chars = response.content.chars().count();
                let completion = u32::try_from(chars.div_ceil(4)).unwrap_or(u32::MAX);
                TokenUsage::new(request.input_tokens(), completion)
            });
            let tokens_used = u64::from(usage.total_tokens);
            let actual_cost = profile.projected_cost(usage.prompt_tokens, usage.completion_tokens);

            let recorded = match reservation {
                Some(reservation) => reservation.commit(tokens_used, actual_cost),
                None => self.tracker.record(&id, 1, tokens_used, actual_cost),
            };
            if let Err(e) = recorded {
                warn!(backend = %id, error = %e, "Failed to record usage");
            }
            self.breaker.record_success(&id);

            let estimated_cost =
                profile.projected_cost(request.input_tokens(), request.output_tokens());
            let served = decision.served_by(&id, estimated_cost, failures.len());

            info!(
                backend = %id,
                tokens_used = tokens_used,
                actual_cost = actual_cost,
                failed_attempts = failures.len(),
                "Request served"
            );

            return Ok(RouteResult {
                backend_id: id,
                model_id: response.model_id.unwrap_or_else(|| profile.id.model.clone()),
                output_text: response.content,
                estimated_cost,
                actual_cost,
                tokens_used,
                decision_rationale: served.rationale.clone(),
                fallback_chain_used: attempted,
                decision: served,
            });
        }

        warn!(attempts = failures.len(), "All backends in the fallback chain failed");
        Err(RouterError::AllBackendsFailed { attempts: failures })
    }
}
