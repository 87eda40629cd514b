//! Types shared across the routing pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a backend identifier is not of the form `provider:model`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid backend id '{0}', expected 'provider:model'")]
pub struct BackendIdParseError(pub String);

/// Identifies one backend as a `(provider, model)` pair.
///
/// The string form is `provider:model` with exactly one colon.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BackendId {
    /// Provider name (e.g., "openai").
    pub provider: String,
    /// Model identifier within the provider.
    pub model: String,
}

impl BackendId {
    /// Creates a backend id from its parts.
    #[must_use]
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self { provider: provider.into(), model: model.into() }
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

impl FromStr for BackendId {
    type Err = BackendIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [provider, model] if !provider.trim().is_empty() && !model.trim().is_empty() => {
                Ok(Self::new(provider.trim(), model.trim()))
            }
            _ => Err(BackendIdParseError(s.to_string())),
        }
    }
}

impl TryFrom<String> for BackendId {
    type Error = BackendIdParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BackendId> for String {
    fn from(id: BackendId) -> Self {
        id.to_string()
    }
}

/// Optional backend feature a request may depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Structured tool / function calling.
    FunctionCalling,
    /// Image understanding.
    Vision,
    /// Guaranteed JSON output mode.
    JsonMode,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FunctionCalling => write!(f, "function_calling"),
            Self::Vision => write!(f, "vision"),
            Self::JsonMode => write!(f, "json_mode"),
        }
    }
}

/// Caller-supplied task category, used to pick a preference list and defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    General,
    Coding,
    Reasoning,
    Creative,
    Summarization,
    Extraction,
    Conversation,
    Vision,
}

impl TaskCategory {
    /// Every category, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::General,
        Self::Coding,
        Self::Reasoning,
        Self::Creative,
        Self::Summarization,
        Self::Extraction,
        Self::Conversation,
        Self::Vision,
    ];

    /// Lowercase name used in configuration and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Coding => "coding",
            Self::Reasoning => "reasoning",
            Self::Creative => "creative",
            Self::Summarization => "summarization",
            Self::Extraction => "extraction",
            Self::Conversation => "conversation",
            Self::Vision => "vision",
        }
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
            .ok_or_else(|| format!("Unknown task category '{}'", s))
    }
}

/// Static description of one backend: limits, prices, quality and speed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendProfile {
    /// Backend identity.
    pub id: BackendId,
    /// Maximum prompt plus completion tokens per call.
    pub context_window: u32,
    /// USD per 1000 input tokens.
    pub input_price_per_1k: f64,
    /// USD per 1000 output tokens.
    pub output_price_per_1k: f64,
    /// Requests allowed per usage window.
    pub requests_per_minute: u32,
    /// Tokens allowed per usage window.
    pub tokens_per_minute: u64,
    /// Relative output quality in [0, 1].
    pub quality: f64,
    /// Relative response speed in [0, 1].
    pub speed: f64,
    /// Supported optional features.
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
}

impl BackendProfile {
    /// Projected USD cost of a call with the given token counts.
    #[must_use]
    pub fn projected_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (f64::from(input_tokens) / 1000.0) * self.input_price_per_1k
            + (f64::from(output_tokens) / 1000.0) * self.output_price_per_1k
    }

    /// Capabilities in `required` this backend lacks.
    #[must_use]
    pub fn missing_capabilities(&self, required: &BTreeSet<Capability>) -> Vec<Capability> {
        required.difference(&self.capabilities).copied().collect()
    }

    /// Whether this backend offers every capability in `required`.
    #[must_use]
    pub fn supports(&self, required: &BTreeSet<Capability>) -> bool {
        required.is_subset(&self.capabilities)
    }
}

/// Relative weights of quality, cost and speed in candidate scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub quality: f64,
    pub cost: f64,
    pub speed: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self { quality: 0.3, cost: 0.4, speed: 0.3 }
    }
}

impl ScoringWeights {
    /// Sum tolerance when validating weights.
    pub const TOLERANCE: f64 = 1e-6;

    /// Checks each weight is in [0, 1] and that they sum to 1.
    ///
    /// # Errors
    /// Returns a description of the first violated rule.
    pub fn validate(&self) -> Result<(), String> {
        let weights = [("quality", self.quality), ("cost", self.cost), ("speed", self.speed)];
        for (name, value) in weights {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("weight '{}' must be between 0.0 and 1.0, got {}", name, value));
            }
        }

        let sum = self.quality + self.cost + self.speed;
        if (sum - 1.0).abs() > Self::TOLERANCE {
            return Err(format!("weights must sum to 1.0, got {}", sum));
        }

        Ok(())
    }
}
