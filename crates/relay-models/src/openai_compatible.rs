//! OpenAI-compatible backend implementation.
//!
//! Works with any server that implements the OpenAI Chat Completions API:
//! hosted OpenAI, vLLM, LocalAI, LM Studio, or a gateway in front of another
//! provider.
//!
//! ```no_run
//! use relay_models::OpenAiCompatibleBackend;
//! use relay_abstraction::{Backend, ChatMessage};
//!
//! # async fn example() -> Result<(), relay_abstraction::BackendError> {
//! let backend = OpenAiCompatibleBackend::without_auth(
//!     "llama-3-8b".to_string(),
//!     "http://localhost:1234/v1".to_string(),
//! );
//!
//! let response = backend.generate(&[ChatMessage::user("Say hello")], None).await?;
//! println!("{}", response.content);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use relay_abstraction::{
    Backend, BackendError, ChatMessage, GenerationParameters, GenerationResponse, TokenUsage,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

/// Backend for servers speaking the OpenAI Chat Completions protocol.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleBackend {
    /// The model identifier sent in every request.
    model_id: String,
    /// Base URL for the API endpoint (e.g., "http://localhost:8000/v1").
    base_url: String,
    /// Optional API key (local servers usually don't require auth).
    api_key: Option<String>,
    /// Provider label used in quota errors.
    provider: String,
    /// HTTP client for requests.
    client: Client,
}

impl OpenAiCompatibleBackend {
    /// Creates a backend that authenticates with a bearer token.
    #[must_use]
    pub fn with_api_key(model_id: String, base_url: String, api_key: String) -> Self {
        Self {
            model_id,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: Some(api_key),
            provider: "openai-compatible".to_string(),
            client: Self::build_client(),
        }
    }

    /// Creates a backend without authentication.
    #[must_use]
    pub fn without_auth(model_id: String, base_url: String) -> Self {
        Self {
            model_id,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
            provider: "openai-compatible".to_string(),
            client: Self::build_client(),
        }
    }

    /// Sets the provider label reported in quota errors.
    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    /// Returns the configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // The router applies its own per-call timeout; this one only guards against hung sockets.
    fn build_client() -> Client {
        Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| Client::new())
    }

    fn map_status_error(&self, status: reqwest::StatusCode, error_text: String) -> BackendError {
        if status == 401 || status == 403 {
            return BackendError::UnsupportedProvider(format!(
                "Authentication failed ({}): {}",
                status, error_text
            ));
        }

        if status == 402 || status == 429 {
            return BackendError::QuotaExceeded {
                provider: self.provider.clone(),
                message: Some(error_text),
            };
        }

        if status.is_server_error() {
            return BackendError::ResponseError(format!(
                "Server error ({}): {}",
                status, error_text
            ));
        }

        BackendError::ResponseError(format!("API error ({}): {}", status, error_text))
    }
}

#[async_trait]
impl Backend for OpenAiCompatibleBackend {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        parameters: Option<GenerationParameters>,
    ) -> Result<GenerationResponse, BackendError> {
        debug!(
            model_id = %self.model_id,
            message_count = messages.len(),
            parameters = ?parameters,
            "OpenAiCompatibleBackend generating chat completion"
        );

        let url = format!("{}/chat/completions", self.base_url);

        let mut request_body = ChatRequest {
            model: self.model_id.clone(),
            messages: messages
                .iter()
                .map(|msg| WireMessage { role: msg.role.clone(), content: msg.content.clone() })
                .collect(),
            temperature: None,
            top_p: None,
            max_tokens: None,
            stop: None,
        };

        if let Some(params) = parameters {
            request_body.temperature = params.temperature;
            request_body.top_p = params.top_p;
            request_body.max_tokens = params.max_tokens;
            request_body.stop = params.stop_sequences;
        }

        let mut request = self.client.post(&url).json(&request_body);
        if let Some(ref api_key) = self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| {
            error!(error = %e, url = %url, "Failed to send request to OpenAI-compatible API");
            BackendError::RequestError(format!("Network error: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                status = %status,
                error = %error_text,
                url = %url,
                "OpenAI-compatible API returned error status"
            );
            return Err(self.map_status_error(status, error_text));
        }

        let body: ChatResponse = response.json().await.map_err(|e| {
            error!(error = %e, url = %url, "Failed to parse OpenAI-compatible API response");
            BackendError::SerializationError(format!("Failed to parse response: {}", e))
        })?;

        let content = body
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| BackendError::ResponseError("No content in API response".to_string()))?;

        let usage = body.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(GenerationResponse { content, model_id: Some(self.model_id.clone()), usage })
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        let url = format!("{}/models", self.base_url);
        let mut request = self.client.get(&url);
        if let Some(ref api_key) = self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BackendError::RequestError(format!("Network error: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let error_text = response.text().await.unwrap_or_default();
            Err(self.map_status_error(status, error_text))
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
#[allow(clippy::struct_field_names)] // Matches API naming
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
