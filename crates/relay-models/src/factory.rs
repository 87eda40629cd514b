//! Backend factory for creating backend instances from configuration.
//!
//! Connection details live next to each catalogue entry in the router
//! configuration; this module turns them into live `Backend` objects and
//! resolves API keys from environment variables.

use crate::{MockBackend, OpenAiCompatibleBackend};
use relay_abstraction::{Backend, BackendError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Backend implementation to instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// In-process mock backend.
    Mock,
    /// Any OpenAI Chat Completions compatible server.
    OpenaiCompatible,
}

impl FromStr for BackendKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "openai_compatible" | "openai-compatible" | "openai" => Ok(Self::OpenaiCompatible),
            _ => Err(()),
        }
    }
}

/// Connection block for one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Which implementation to build.
    pub kind: BackendKind,
    /// Base URL (required for OpenAI-compatible backends).
    #[serde(default)]
    pub base_url: Option<String>,
    /// Name of the environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Artificial latency for mock backends, in milliseconds.
    #[serde(default)]
    pub latency_ms: Option<u64>,
}

impl ConnectionConfig {
    /// Connection block for an in-process mock backend.
    #[must_use]
    pub fn mock() -> Self {
        Self { kind: BackendKind::Mock, base_url: None, api_key_env: None, latency_ms: None }
    }

    /// Connection block for an OpenAI-compatible server.
    #[must_use]
    pub fn openai_compatible(base_url: impl Into<String>, api_key_env: Option<String>) -> Self {
        Self {
            kind: BackendKind::OpenaiCompatible,
            base_url: Some(base_url.into()),
            api_key_env,
            latency_ms: None,
        }
    }
}

/// Factory for creating backend instances.
pub struct BackendFactory;

impl BackendFactory {
    /// Creates a backend serving `model_id` for `provider`.
    ///
    /// # Errors
    /// Returns a `BackendError` if the connection block is incomplete or the
    /// named API key variable is not set.
    #[allow(clippy::disallowed_methods)] // env::var is needed for API key loading
    pub fn create(
        provider: &str,
        model_id: &str,
        connection: &ConnectionConfig,
    ) -> Result<Arc<dyn Backend>, BackendError> {
        debug!(
            provider = %provider,
            model_id = %model_id,
            kind = ?connection.kind,
            "Creating backend instance"
        );

        match connection.kind {
            BackendKind::Mock => {
                let mut backend = MockBackend::new(model_id);
                if let Some(latency) = connection.latency_ms {
                    backend = backend.with_delay(Duration::from_millis(latency));
                }
                Ok(Arc::new(backend))
            }
            BackendKind::OpenaiCompatible => {
                let base_url = connection.base_url.clone().ok_or_else(|| {
                    BackendError::UnsupportedProvider(format!(
                        "base_url is required for OpenAI-compatible backend '{}:{}'",
                        provider, model_id
                    ))
                })?;

                let backend = match connection.api_key_env {
                    Some(ref var) => {
                        let api_key = std::env::var(var).map_err(|_| {
                            error!(
                                provider = %provider,
                                env_var = %var,
                                "API key environment variable not set"
                            );
                            BackendError::UnsupportedProvider(format!(
                                "Environment variable {} is not set for backend '{}:{}'",
                                var, provider, model_id
                            ))
                        })?;
                        OpenAiCompatibleBackend::with_api_key(
                            model_id.to_string(),
                            base_url,
                            api_key,
                        )
                    }
                    None => OpenAiCompatibleBackend::without_auth(model_id.to_string(), base_url),
                };

                Ok(Arc::new(backend.with_provider(provider)))
            }
        }
    }
}
