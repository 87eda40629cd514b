//! Backend implementations for relay.
//!
//! This crate provides concrete implementations of the `Backend` trait.
//!
//! # Supported Backends
//!
//! - **Mock**: Testing, demos and dry runs
//! - **OpenAI-compatible**: Any server implementing the Chat Completions API

pub mod factory;
pub mod openai_compatible;

use async_trait::async_trait;
use relay_abstraction::{
    Backend, BackendError, ChatMessage, GenerationParameters, GenerationResponse, TokenUsage,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

pub use factory::{BackendFactory, BackendKind, ConnectionConfig};
pub use openai_compatible::OpenAiCompatibleBackend;

/// A scriptable implementation of the `Backend` trait for tests and demos.
///
/// By default it answers every call with a short echo of the last message and
/// reports word-count usage. Builders switch it to failing, slow, or fixed-usage
/// behaviour.
#[derive(Debug, Default)]
pub struct MockBackend {
    id: String,
    reply: Option<String>,
    failure: Option<BackendError>,
    health_failure: Option<BackendError>,
    delay: Option<Duration>,
    usage: Option<TokenUsage>,
    calls: AtomicUsize,
}

impl MockBackend {
    /// Creates a new `MockBackend` with the given model ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), ..Self::default() }
    }

    /// Always answers with the given text.
    #[must_use]
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    /// Fails every generation call with the given error.
    #[must_use]
    pub fn failing_with(mut self, error: BackendError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Fails health checks with the given error.
    #[must_use]
    pub fn unhealthy(mut self, error: BackendError) -> Self {
        self.health_failure = Some(error);
        self
    }

    /// Sleeps for `delay` before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Reports fixed usage instead of word counts.
    #[must_use]
    pub fn with_usage(mut self, prompt_tokens: u32, completion_tokens: u32) -> Self {
        self.usage = Some(TokenUsage::new(prompt_tokens, completion_tokens));
        self
    }

    /// Number of generation calls received so far, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        parameters: Option<GenerationParameters>,
    ) -> Result<GenerationResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        debug!(
            model_id = %self.id,
            message_count = messages.len(),
            parameters = ?parameters,
            "MockBackend generating"
        );

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(ref error) = self.failure {
            return Err(error.clone());
        }

        let content = self.reply.clone().unwrap_or_else(|| {
            let last = messages.last().map(|m| m.content.as_str()).unwrap_or_default();
            format!("Mock response from {}: {last}", self.id)
        });

        let usage = self.usage.unwrap_or_else(|| {
            let prompt_tokens = messages.iter().map(|m| count_tokens(&m.content)).sum::<u32>();
            TokenUsage::new(prompt_tokens, count_tokens(&content))
        });

        Ok(GenerationResponse { content, model_id: Some(self.id.clone()), usage: Some(usage) })
    }

    fn model_id(&self) -> &str {
        &self.id
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        match self.health_failure {
            Some(ref error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

/// Count tokens in a string (simplified: word count).
#[allow(clippy::cast_possible_truncation)]
fn count_tokens(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}
