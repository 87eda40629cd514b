//! TOML configuration for the router: catalogue, preferences and tunables.

use crate::circuit_breaker::CircuitBreakerSettings;
use crate::engine::EngineSettings;
use crate::escalation::EscalationSettings;
use crate::registry::RegistrySnapshot;
use crate::types::{BackendId, BackendProfile, Capability, ScoringWeights, TaskCategory};
use relay_abstraction::{Backend, BackendError};
use relay_models::{BackendFactory, ConnectionConfig};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading the file.
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("Failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error.
    #[error("Invalid configuration: {0}")]
    Validation(String),

    /// A backend connection could not be built.
    #[error("Failed to create backend '{id}': {source}")]
    Backend {
        id: BackendId,
        #[source]
        source: BackendError,
    },
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Router configuration loaded from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Relative weights of quality, cost and speed.
    #[serde(default)]
    pub weights: ScoringWeights,

    /// Fraction of a capacity limit at which a backend counts as near its limit.
    #[serde(default = "default_buffer_ratio")]
    pub buffer_ratio: f64,

    /// Per-call timeout in milliseconds.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Budget applied when a request carries none, in USD.
    #[serde(default = "default_cost_budget")]
    pub default_cost_budget: f64,

    /// Length of the usage window in seconds.
    #[serde(default = "default_usage_window_secs")]
    pub usage_window_secs: u64,

    /// Complexity score at or above which a request escalates to the selector.
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: f64,

    /// Meta-routing selector (disabled when absent).
    #[serde(default)]
    pub escalation: Option<EscalationConfig>,

    /// Circuit breaker thresholds.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    /// Backend catalogue, in catalogue order.
    #[serde(default)]
    pub backends: Vec<BackendConfig>,

    /// Preference lists per task category.
    #[serde(default)]
    pub categories: BTreeMap<TaskCategory, Vec<BackendId>>,
}

fn default_buffer_ratio() -> f64 {
    0.8
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

fn default_cost_budget() -> f64 {
    0.10
}

fn default_usage_window_secs() -> u64 {
    60
}

fn default_escalation_threshold() -> f64 {
    0.7
}

fn default_true() -> bool {
    true
}

fn default_selector_input_tokens() -> u32 {
    400
}

fn default_selector_output_tokens() -> u32 {
    20
}

/// `[escalation]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Backend that answers selection prompts.
    pub selector: BackendId,

    #[serde(default = "default_selector_input_tokens")]
    pub estimated_input_tokens: u32,

    #[serde(default = "default_selector_output_tokens")]
    pub estimated_output_tokens: u32,
}

/// One `[[backends]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend id, e.g. `"openai:gpt-4o-mini"`.
    pub id: BackendId,
    pub context_window: u32,
    pub input_price_per_1k: f64,
    pub output_price_per_1k: f64,
    pub requests_per_minute: u32,
    pub tokens_per_minute: u64,
    pub quality: f64,
    pub speed: f64,
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,

    /// How to reach the backend. Entries without one are catalogued but
    /// need a connection registered at runtime.
    #[serde(default)]
    pub connection: Option<ConnectionConfig>,
}

impl BackendConfig {
    /// The static profile described by this entry.
    pub fn profile(&self) -> BackendProfile {
        BackendProfile {
            id: self.id.clone(),
            context_window: self.context_window,
            input_price_per_1k: self.input_price_per_1k,
            output_price_per_1k: self.output_price_per_1k,
            requests_per_minute: self.requests_per_minute,
            tokens_per_minute: self.tokens_per_minute,
            quality: self.quality,
            speed: self.speed,
            capabilities: self.capabilities.clone(),
        }
    }
}

impl RouterConfig {
    /// Per-call timeout.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Usage window length.
    pub fn usage_window(&self) -> Duration {
        Duration::from_secs(self.usage_window_secs)
    }

    /// Settings for the decision engine.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            weights: self.weights,
            buffer_ratio: self.buffer_ratio,
            default_cost_budget: self.default_cost_budget,
        }
    }

    /// Escalation settings, when escalation is configured and enabled.
    pub fn escalation_settings(&self) -> Option<EscalationSettings> {
        self.escalation.as_ref().filter(|e| e.enabled).map(|e| EscalationSettings {
            selector: e.selector.clone(),
            estimated_input_tokens: e.estimated_input_tokens,
            estimated_output_tokens: e.estimated_output_tokens,
            threshold: self.escalation_threshold,
        })
    }

    /// Builds a registry snapshot from the catalogue and preference lists.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` for an empty catalogue or duplicate ids.
    pub fn registry_snapshot(&self) -> Result<RegistrySnapshot> {
        let profiles = self.backends.iter().map(BackendConfig::profile).collect();
        let preferences: HashMap<TaskCategory, Vec<BackendId>> =
            self.categories.iter().map(|(category, ids)| (*category, ids.clone())).collect();
        RegistrySnapshot::new(profiles, preferences)
    }

    /// Builds live connections for every entry that declares one.
    ///
    /// # Errors
    /// Returns `ConfigError::Backend` for the first connection that cannot be built.
    pub fn build_connections(&self) -> Result<Vec<(BackendId, Arc<dyn Backend>)>> {
        self.backends
            .iter()
            .filter_map(|entry| entry.connection.as_ref().map(|connection| (entry, connection)))
            .map(|(entry, connection)| {
                debug!(backend = %entry.id, kind = ?connection.kind, "Creating backend connection");
                BackendFactory::create(&entry.id.provider, &entry.id.model, connection)
                    .map(|backend| (entry.id.clone(), backend))
                    .map_err(|source| ConfigError::Backend { id: entry.id.clone(), source })
            })
            .collect()
    }
}

/// Configuration loader for router settings.
pub struct RouterConfigLoader;

impl RouterConfigLoader {
    /// Loads and validates configuration from a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<RouterConfig> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses and validates configuration from a TOML string.
    ///
    /// # Errors
    /// Returns error if the content cannot be parsed or validated.
    pub fn parse(content: &str) -> Result<RouterConfig> {
        let config: RouterConfig = toml::from_str(content)?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Validates router configuration.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` describing the first violated rule.
    pub fn validate(config: &RouterConfig) -> Result<()> {
        config.weights.validate().map_err(ConfigError::Validation)?;

        if config.buffer_ratio.is_nan() || config.buffer_ratio <= 0.0 || config.buffer_ratio > 1.0 {
            return Err(ConfigError::Validation(format!(
                "Invalid buffer_ratio: {}. Must be in (0.0, 1.0]",
                config.buffer_ratio
            )));
        }

        if config.call_timeout_ms == 0 {
            return Err(ConfigError::Validation("call_timeout_ms must be positive".to_string()));
        }

        if config.usage_window_secs == 0 {
            return Err(ConfigError::Validation("usage_window_secs must be positive".to_string()));
        }

        if config.default_cost_budget.is_nan() || config.default_cost_budget < 0.0 {
            return Err(ConfigError::Validation(format!(
                "Invalid default_cost_budget: {}. Must not be negative",
                config.default_cost_budget
            )));
        }

        if !(0.0..=1.0).contains(&config.escalation_threshold) {
            return Err(ConfigError::Validation(format!(
                "Invalid escalation_threshold: {}. Must be between 0.0 and 1.0",
                config.escalation_threshold
            )));
        }

        if !(0.0..=1.0).contains(&config.circuit_breaker.failure_threshold) {
            return Err(ConfigError::Validation(format!(
                "Invalid circuit_breaker.failure_threshold: {}. Must be between 0.0 and 1.0",
                config.circuit_breaker.failure_threshold
            )));
        }

        if config.backends.is_empty() {
            return Err(ConfigError::Validation(
                "At least one backend must be configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for backend in &config.backends {
            Self::validate_backend(backend)?;
            if !seen.insert(&backend.id) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate backend id '{}'",
                    backend.id
                )));
            }
        }

        for (category, ids) in &config.categories {
            if ids.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Category '{}' must list at least one backend",
                    category
                )));
            }
        }

        if let Some(escalation) = config.escalation.as_ref().filter(|e| e.enabled) {
            if !seen.contains(&escalation.selector) {
                return Err(ConfigError::Validation(format!(
                    "Escalation selector '{}' is not in the backend catalogue",
                    escalation.selector
                )));
            }
        }

        Ok(())
    }

    fn validate_backend(backend: &BackendConfig) -> Result<()> {
        let id = &backend.id;
        for (name, value) in [("quality", backend.quality), ("speed", backend.speed)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Validation(format!(
                    "Backend '{}': {} must be between 0.0 and 1.0, got {}",
                    id, name, value
                )));
            }
        }

        for (name, value) in [
            ("input_price_per_1k", backend.input_price_per_1k),
            ("output_price_per_1k", backend.output_price_per_1k),
        ] {
            if value.is_nan() || value < 0.0 {
                return Err(ConfigError::Validation(format!(
                    "Backend '{}': {} must not be negative, got {}",
                    id, name, value
                )));
            }
        }

        if backend.context_window == 0 {
            return Err(ConfigError::Validation(format!(
                "Backend '{}': context_window must be positive",
                id
            )));
        }

        if backend.requests_per_minute == 0 || backend.tokens_per_minute == 0 {
            return Err(ConfigError::Validation(format!(
                "Backend '{}': requests_per_minute and tokens_per_minute must be positive",
                id
            )));
        }

        Ok(())
    }
}
