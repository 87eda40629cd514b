//! Meta-routing escalation.
//!
//! For requests whose complexity score crosses the configured threshold, a
//! selector backend is shown the surviving candidates and asked to pick one.
//! Its answer is only a suggestion: the decision engine re-validates it, and
//! any failure falls back to the deterministic ranking.

use crate::engine::CandidateEvaluation;
use crate::registry::RegistrySnapshot;
use crate::request::RoutingRequest;
use crate::types::BackendId;
use relay_abstraction::{Backend, BackendError, ChatMessage, GenerationParameters, TokenUsage};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Characters of request content shown to the selector.
const MAX_EXCERPT_CHARS: usize = 2000;

/// Escalation settings resolved from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationSettings {
    /// Backend that answers selection prompts.
    pub selector: BackendId,
    /// Projected prompt size of a selection call.
    pub estimated_input_tokens: u32,
    /// Projected answer size of a selection call.
    pub estimated_output_tokens: u32,
    /// Complexity score at or above which requests escalate.
    pub threshold: f64,
}

/// Why the selector did not produce a usable suggestion.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EscalationError {
    #[error("selector timed out after {0:?}")]
    Timeout(Duration),

    #[error("selector call failed: {0}")]
    Backend(#[from] BackendError),

    #[error("selector answer did not name a backend: {0:?}")]
    Unparseable(String),
}

/// A backend suggested by the selector.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    pub backend_id: BackendId,
    /// Usage the selector reported for the selection call.
    pub usage: Option<TokenUsage>,
}

/// Asks a selector backend to choose among candidates.
pub struct MetaRouter {
    settings: EscalationSettings,
    backend: Arc<dyn Backend>,
}

impl MetaRouter {
    #[must_use]
    pub fn new(settings: EscalationSettings, backend: Arc<dyn Backend>) -> Self {
        Self { settings, backend }
    }

    pub fn settings(&self) -> &EscalationSettings {
        &self.settings
    }

    /// Projected cost of one selection call, or zero if the selector is not catalogued.
    pub fn projected_cost(&self, snapshot: &RegistrySnapshot) -> f64 {
        let (input, output) =
            (self.settings.estimated_input_tokens, self.settings.estimated_output_tokens);
        snapshot
            .get(&self.settings.selector)
            .map_or(0.0, |profile| profile.projected_cost(input, output))
    }

    /// Asks the selector to pick one of `candidates`.
    ///
    /// # Errors
    /// Returns an `EscalationError` on timeout, backend failure, or an answer
    /// that does not contain a `provider:model` id.
    pub async fn suggest(
        &self,
        request: &RoutingRequest,
        candidates: &[&CandidateEvaluation],
        timeout: Duration,
    ) -> Result<Suggestion, EscalationError> {
        let messages = build_prompt(request, candidates);
        let parameters = GenerationParameters {
            temperature: Some(0.0),
            max_tokens: Some(self.settings.estimated_output_tokens.max(16)),
            ..GenerationParameters::default()
        };

        debug!(
            selector = %self.settings.selector,
            candidates = candidates.len(),
            "Requesting meta-routing suggestion"
        );

        let response =
            tokio::time::timeout(timeout, self.backend.generate(&messages, Some(parameters)))
                .await
                .map_err(|_| EscalationError::Timeout(timeout))??;

        let backend_id = parse_suggestion(&response.content)
            .ok_or_else(|| EscalationError::Unparseable(response.content.clone()))?;

        Ok(Suggestion { backend_id, usage: response.usage })
    }
}

fn build_prompt(request: &RoutingRequest, candidates: &[&CandidateEvaluation]) -> Vec<ChatMessage> {
    let mut listing = String::new();
    for candidate in candidates {
        let _ = writeln!(listing, "- {}", candidate.summary());
    }

    let content = request.content();
    let excerpt: String = content.chars().take(MAX_EXCERPT_CHARS).collect();

    vec![
        ChatMessage::system(
            "You route requests to text-generation backends. Reply with exactly one backend id \
             from the candidate list, in the form provider:model, and nothing else.",
        ),
        ChatMessage::user(format!(
            "Task category: {}\n\nCandidates:\n{}\nRequest:\n{}",
            request.task_category, listing, excerpt
        )),
    ]
}

/// Extracts the first `provider:model` token from a selector answer.
pub fn parse_suggestion(answer: &str) -> Option<BackendId> {
    answer
        .split_whitespace()
        .map(|token| token.trim_matches(|c: char| !is_id_char(c)))
        .find_map(|token| token.parse::<BackendId>().ok())
}

fn is_id_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, ':' | '-' | '_' | '/')
}
