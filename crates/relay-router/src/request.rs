//! Routing requests and results.

use crate::engine::RoutingDecision;
use crate::types::{BackendId, TaskCategory};
use relay_abstraction::ChatMessage;
use serde::{Deserialize, Serialize};

/// A generation request submitted to the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRequest {
    /// Task category used for defaults and preference lists.
    pub task_category: TaskCategory,
    /// Conversation to send to the selected backend.
    pub messages: Vec<ChatMessage>,
    /// Estimated prompt tokens (0 means estimate from content).
    #[serde(default)]
    pub estimated_input_tokens: u32,
    /// Estimated completion tokens.
    #[serde(default)]
    pub estimated_output_tokens: u32,
    /// Overrides the analyzed quality floor.
    #[serde(default)]
    pub quality_floor: Option<f64>,
    /// Overrides the configured default cost budget (USD).
    #[serde(default)]
    pub cost_budget: Option<f64>,
    /// Overrides the analyzed speed floor.
    #[serde(default)]
    pub speed_floor: Option<f64>,
    /// Forces the function-calling capability requirement.
    #[serde(default)]
    pub require_function_calling: bool,
    /// Forces the vision capability requirement.
    #[serde(default)]
    pub require_vision: bool,
}

impl RoutingRequest {
    /// Creates a request with no overrides and content-derived token estimates.
    #[must_use]
    pub fn new(task_category: TaskCategory, messages: Vec<ChatMessage>) -> Self {
        Self {
            task_category,
            messages,
            estimated_input_tokens: 0,
            estimated_output_tokens: 0,
            quality_floor: None,
            cost_budget: None,
            speed_floor: None,
            require_function_calling: false,
            require_vision: false,
        }
    }

    /// Single user-message request.
    #[must_use]
    pub fn from_prompt(task_category: TaskCategory, prompt: impl Into<String>) -> Self {
        Self::new(task_category, vec![ChatMessage::user(prompt)])
    }

    #[must_use]
    pub fn with_token_estimates(mut self, input: u32, output: u32) -> Self {
        self.estimated_input_tokens = input;
        self.estimated_output_tokens = output;
        self
    }

    #[must_use]
    pub fn with_cost_budget(mut self, budget: f64) -> Self {
        self.cost_budget = Some(budget);
        self
    }

    #[must_use]
    pub fn with_quality_floor(mut self, floor: f64) -> Self {
        self.quality_floor = Some(floor);
        self
    }

    #[must_use]
    pub fn with_speed_floor(mut self, floor: f64) -> Self {
        self.speed_floor = Some(floor);
        self
    }

    #[must_use]
    pub fn requiring_function_calling(mut self) -> Self {
        self.require_function_calling = true;
        self
    }

    #[must_use]
    pub fn requiring_vision(mut self) -> Self {
        self.require_vision = true;
        self
    }

    /// All message contents joined by newlines.
    pub fn content(&self) -> String {
        self.messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join("\n")
    }

    /// Prompt token estimate, falling back to `ceil(chars / 4)` when none was given.
    pub fn input_tokens(&self) -> u32 {
        if self.estimated_input_tokens > 0 {
            return self.estimated_input_tokens;
        }
        let chars: usize = self.messages.iter().map(|m| m.content.chars().count()).sum();
        u32::try_from(chars.div_ceil(4)).unwrap_or(u32::MAX)
    }

    /// Completion token estimate.
    pub fn output_tokens(&self) -> u32 {
        self.estimated_output_tokens
    }

    /// Prompt plus completion estimate.
    pub fn total_tokens(&self) -> u64 {
        u64::from(self.input_tokens()) + u64::from(self.output_tokens())
    }
}

/// Result of a successfully dispatched request.
#[derive(Debug, Clone, Serialize)]
pub struct RouteResult {
    /// Backend that produced the output.
    pub backend_id: BackendId,
    /// Model reported by the backend, or the configured model name.
    pub model_id: String,
    /// Generated text.
    pub output_text: String,
    /// Projected cost of the serving backend at decision time.
    pub estimated_cost: f64,
    /// Cost computed from the usage the backend reported.
    pub actual_cost: f64,
    /// Total tokens consumed by the call.
    pub tokens_used: u64,
    /// Human-readable decision rationale.
    pub decision_rationale: String,
    /// Backends attempted, in order, ending with the one that served.
    pub fallback_chain_used: Vec<BackendId>,
    /// Decision as served (selected is the backend that answered).
    pub decision: RoutingDecision,
}
