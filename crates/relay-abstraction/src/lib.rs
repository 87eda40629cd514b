//! Backend abstraction layer for relay.
//!
//! This module defines the core trait and value types shared by every
//! text-generation backend the router can dispatch to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Represents an error that can occur when calling a generation backend.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendError {
    /// The request could not be delivered (network issues, invalid request).
    #[error("Request Error: {0}")]
    RequestError(String),

    /// The backend answered with a non-success response.
    #[error("Backend Response Error: {0}")]
    ResponseError(String),

    /// An error occurred during serialization or deserialization.
    #[error("Serialization Error: {0}")]
    SerializationError(String),

    /// The backend provider is not supported or not configured.
    #[error("Unsupported Backend Provider: {0}")]
    UnsupportedProvider(String),

    /// Provider quota exceeded or rate limit hit.
    #[error(
        "Provider '{provider}' quota exceeded{}",
        message.as_ref().map(|m| format!(": {}", m)).unwrap_or_default()
    )]
    QuotaExceeded {
        /// The provider name (e.g., "openai").
        provider: String,
        /// Optional error message from the provider.
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Other unexpected errors.
    #[error("Other Backend Error: {0}")]
    Other(String),
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message sender (e.g., "user", "assistant", "system").
    pub role: String,
    /// The content of the message.
    pub content: String,
}

impl ChatMessage {
    /// Creates a message with an arbitrary role.
    #[must_use]
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: role.into(), content: content.into() }
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    /// Creates a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }
}

/// Parameters for controlling generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    /// Sampling temperature, between 0 and 2.
    pub temperature: Option<f32>,

    /// Nucleus sampling probability mass.
    pub top_p: Option<f32>,

    /// The maximum number of tokens to generate.
    pub max_tokens: Option<u32>,

    /// Sequences where the backend will stop generating further tokens.
    pub stop_sequences: Option<Vec<String>>,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            temperature: Some(0.7),
            top_p: Some(1.0),
            max_tokens: Some(512),
            stop_sequences: None,
        }
    }
}

/// Token usage reported by a backend for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the prompt.
    pub prompt_tokens: u32,

    /// Number of tokens in the completion.
    pub completion_tokens: u32,

    /// Total number of tokens used.
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Creates usage from prompt and completion counts.
    #[must_use]
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// The response from a generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// The generated content.
    pub content: String,

    /// Optional: the model that actually produced the response.
    pub model_id: Option<String>,

    /// Optional: usage statistics for the call.
    pub usage: Option<TokenUsage>,
}

/// A trait for interacting with an interchangeable text-generation backend.
///
/// All backends must be `Send + Sync` so one instance can serve concurrent requests.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Generates a completion for the given conversation history.
    ///
    /// # Errors
    /// Returns a `BackendError` if generation fails.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        parameters: Option<GenerationParameters>,
    ) -> Result<GenerationResponse, BackendError>;

    /// Returns the model identifier served by this backend.
    fn model_id(&self) -> &str;

    /// Checks whether the backend is reachable.
    ///
    /// # Errors
    /// Returns a `BackendError` describing why the backend is unreachable.
    async fn health_check(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoBackend;

    #[async_trait]
    impl Backend for EchoBackend {
        async fn generate(
            &self,
            messages: &[ChatMessage],
            _parameters: Option<GenerationParameters>,
        ) -> Result<GenerationResponse, BackendError> {
            let content = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(GenerationResponse { content, model_id: Some("echo".to_string()), usage: None })
        }

        fn model_id(&self) -> &str {
            "echo"
        }
    }

    #[test]
    fn test_quota_exceeded_display() {
        let with_message = BackendError::QuotaExceeded {
            provider: "openai".to_string(),
            message: Some("Rate limit exceeded".to_string()),
        };
        assert_eq!(
            with_message.to_string(),
            "Provider 'openai' quota exceeded: Rate limit exceeded"
        );

        let without_message =
            BackendError::QuotaExceeded { provider: "gemini".to_string(), message: None };
        assert_eq!(without_message.to_string(), "Provider 'gemini' quota exceeded");
    }

    #[test]
    fn test_token_usage_total() {
        let usage = TokenUsage::new(120, 30);
        assert_eq!(usage.total_tokens, 150);
    }

    #[test]
    fn test_chat_message_constructors() {
        assert_eq!(ChatMessage::user("hi").role, "user");
        assert_eq!(ChatMessage::system("be brief").role, "system");
    }

    #[tokio::test]
    async fn test_default_health_check_is_ok() {
        let backend = EchoBackend;
        assert!(backend.health_check().await.is_ok());

        let response = backend.generate(&[ChatMessage::user("ping")], None).await.unwrap();
        assert_eq!(response.content, "ping");
    }
}
