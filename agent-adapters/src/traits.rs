//! Shared model adapter traits and data structures.

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::throttle::ThrottleError;

/// Result alias used by model adapters.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Streaming response emitted by [`ModelAdapter::infer`].
pub type AdapterStream = Pin<Box<dyn Stream<Item = AdapterResult<InferenceChunk>> + Send>>;

/// Error type shared by adapter implementations.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Adapter is misconfigured or missing credentials.
    #[error("adapter not configured: {reason}")]
    Configuration {
        /// Additional context for the failure.
        reason: String,
    },

    /// The supplied request was invalid for the target model.
    #[error("invalid inference request: {reason}")]
    InvalidRequest {
        /// Reason describing why the request could not be processed.
        reason: String,
    },

    /// Transport-level failures (network, protocol, etc.).
    #[error("adapter transport error: {reason}")]
    Transport {
        /// Additional context about the error.
        reason: String,
    },

    /// The provider rejected the request due to rate limiting.
    #[error("adapter rate limited (retry after {retry_after:?})")]
    RateLimited {
        /// Suggested delay before retrying.
        retry_after: Option<Duration>,
    },

    /// The provider returned a malformed response.
    #[error("adapter response error: {reason}")]
    Response {
        /// Additional context about the response failure.
        reason: String,
    },

    /// The request could not be admitted by the rate governor.
    #[error(transparent)]
    Throttle(#[from] ThrottleError),
}

impl AdapterError {
    /// Convenience constructor for invalid requests.
    #[must_use]
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for configuration issues.
    #[must_use]
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for transport failures.
    #[must_use]
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }
}

/// Minimal metadata describing a model adapter instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdapterMetadata {
    provider: &'static str,
    model: String,
}

impl AdapterMetadata {
    /// Creates metadata for the supplied provider and model identifier.
    #[must_use]
    pub fn new(provider: &'static str, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Returns the provider identifier (e.g., "openai").
    #[must_use]
    pub const fn provider(&self) -> &'static str {
        self.provider
    }

    /// Returns the configured model name.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Roles supported in chat-style prompts.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System messages steer the assistant behaviour.
    System,
    /// User-authored content.
    User,
    /// Assistant (model) responses.
    Assistant,
    /// Tool messages returned to the planner loop.
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        })
    }
}

/// Represents an instruction or message in a chat-style prompt.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct PromptMessage {
    role: MessageRole,
    content: String,
}

impl PromptMessage {
    /// Creates a new prompt message.
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Returns the message role.
    #[must_use]
    pub const fn role(&self) -> MessageRole {
        self.role
    }

    /// Returns the message content.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Request submitted to a model adapter.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct InferenceRequest {
    /// Optional system prompt, sent ahead of the conversation messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    system_prompt: Option<String>,
    /// Conversation messages (user, assistant, tool).
    messages: Vec<PromptMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

impl InferenceRequest {
    /// Creates a request with the supplied messages.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::InvalidRequest`] if the message list is empty.
    pub fn new(messages: Vec<PromptMessage>) -> AdapterResult<Self> {
        if messages.is_empty() {
            return Err(AdapterError::invalid_request(
                "inference request requires at least one message",
            ));
        }

        Ok(Self {
            system_prompt: None,
            messages,
            max_output_tokens: None,
            temperature: None,
        })
    }

    /// Sets the system prompt that guides model behavior.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Sets the maximum output token budget.
    #[must_use]
    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Returns the system prompt if configured.
    #[must_use]
    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// Returns the prompt messages.
    #[must_use]
    pub fn messages(&self) -> &[PromptMessage] {
        &self.messages
    }

    /// Returns the configured maximum output tokens.
    #[must_use]
    pub const fn max_output_tokens(&self) -> Option<u32> {
        self.max_output_tokens
    }

    /// Returns the configured sampling temperature.
    #[must_use]
    pub const fn temperature(&self) -> Option<f32> {
        self.temperature
    }

    /// Concatenates the system prompt and every message body.
    ///
    /// This is the text the rate governor prices before dispatch.
    #[must_use]
    pub fn prompt_text(&self) -> String {
        let mut text = self.system_prompt.clone().unwrap_or_default();
        for message in &self.messages {
            text.push_str(message.content());
        }
        text
    }
}

/// Token accounting reported by the provider for one request.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Tokens generated in the response.
    #[serde(default)]
    pub completion_tokens: u64,
    /// Total tokens billed.
    #[serde(default)]
    pub total_tokens: u64,
}

/// Streaming chunk returned by the adapter.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct InferenceChunk {
    /// Partial token delta emitted by the provider.
    pub delta: String,
    /// Whether the generation is complete.
    pub done: bool,
    /// Usage reported by the provider, usually on the final chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl InferenceChunk {
    /// Creates a new chunk.
    #[must_use]
    pub fn new(delta: impl Into<String>, done: bool) -> Self {
        Self {
            delta: delta.into(),
            done,
            usage: None,
        }
    }

    /// Attaches provider usage to the chunk.
    #[must_use]
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Fully collected model response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Completion {
    /// Concatenated response text.
    pub content: String,
    /// Usage reported by the provider, if any.
    pub usage: Option<TokenUsage>,
}

/// Drains a response stream into a single [`Completion`].
///
/// # Errors
///
/// Returns the first error yielded by the stream.
pub async fn collect_stream(mut stream: AdapterStream) -> AdapterResult<Completion> {
    let mut completion = Completion::default();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        completion.content.push_str(&chunk.delta);
        if chunk.usage.is_some() {
            completion.usage = chunk.usage;
        }
        if chunk.done {
            break;
        }
    }
    Ok(completion)
}

/// Trait implemented by all model adapters.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Returns basic metadata describing the adapter instance.
    fn metadata(&self) -> &AdapterMetadata;

    /// Executes the inference request, returning a streaming response.
    async fn infer(&self, request: InferenceRequest) -> AdapterResult<AdapterStream>;
}

/// Synchronous one-shot completion, for callers running on plain threads.
pub trait BlockingModelAdapter: Send + Sync {
    /// Returns basic metadata describing the adapter instance.
    fn metadata(&self) -> &AdapterMetadata;

    /// Executes the request and blocks the calling thread until it completes.
    ///
    /// # Errors
    ///
    /// Returns any [`AdapterError`] raised while admitting or executing the
    /// request.
    fn complete_blocking(&self, request: InferenceRequest) -> AdapterResult<Completion>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_request_messages() {
        let err = InferenceRequest::new(Vec::new()).expect_err("messages required");
        assert!(matches!(err, AdapterError::InvalidRequest { .. }));
    }

    #[test]
    fn builds_request() {
        let request = InferenceRequest::new(vec![PromptMessage::new(MessageRole::User, "ping")])
            .unwrap()
            .with_max_output_tokens(256)
            .with_temperature(0.7);

        assert_eq!(request.messages().len(), 1);
        assert_eq!(request.max_output_tokens(), Some(256));
        assert_eq!(request.temperature(), Some(0.7));
    }

    #[test]
    fn prompt_text_includes_system_prompt() {
        let request = InferenceRequest::new(vec![
            PromptMessage::new(MessageRole::User, "ping "),
            PromptMessage::new(MessageRole::Assistant, "pong"),
        ])
        .unwrap()
        .with_system_prompt("be brief. ");

        assert_eq!(request.prompt_text(), "be brief. ping pong");
    }

    #[tokio::test]
    async fn collect_stream_keeps_last_usage() {
        let usage = TokenUsage {
            prompt_tokens: 3,
            completion_tokens: 2,
            total_tokens: 5,
        };
        let chunks = vec![
            Ok(InferenceChunk::new("hel", false)),
            Ok(InferenceChunk::new("lo", true).with_usage(usage)),
        ];
        let stream: AdapterStream = Box::pin(futures::stream::iter(chunks));

        let completion = collect_stream(stream).await.unwrap();
        assert_eq!(completion.content, "hello");
        assert_eq!(completion.usage, Some(usage));
    }
}
