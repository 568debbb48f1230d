//! LLM Provider Abstraction Layer
//!
//! This module provides a common interface for chat-completion backends used by
//! the summarizer, the prompted NLI classifier and the hypothesis generator.
//! The `LLMProvider` trait defines the contract; `OpenAIProvider` talks to any
//! OpenAI-compatible endpoint (OpenAI, OpenRouter) and `OllamaProvider` to a
//! local Ollama server.

use async_trait::async_trait;
use regex::Regex;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

pub mod ollama;
pub mod openai;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl LLMError {
    /// Classify a non-success HTTP status
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 | 403 => LLMError::AuthenticationFailed(body),
            429 => LLMError::RateLimitExceeded,
            _ => LLMError::InvalidRequest(format!("{}: {}", status, body)),
        }
    }

    /// Classify a request that never produced a response
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LLMError::Timeout
        } else if err.is_connect() {
            LLMError::ProviderUnavailable(err.to_string())
        } else {
            LLMError::NetworkError(err.to_string())
        }
    }
}

impl From<LLMError> for EngineError {
    fn from(err: LLMError) -> Self {
        match err {
            LLMError::AuthenticationFailed(_) | LLMError::RateLimitExceeded => {
                EngineError::Backend(err.to_string())
            }
            _ => EngineError::Transport(err.to_string()),
        }
    }
}

/// Message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender
    pub role: MessageRole,

    /// Content of the message
    pub content: String,
}

impl Message {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// LLM Provider trait that all providers must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "ollama", "openai")
    fn name(&self) -> &str;

    /// Returns true if this is a local provider (e.g., Ollama), false for cloud providers
    fn is_local(&self) -> bool;

    /// Run one chat completion and return the assistant text
    ///
    /// # Arguments
    /// * `messages` - System prompt and user content
    /// * `temperature` - Sampling temperature, provider default when `None`
    ///
    /// # Errors
    /// Non-success statuses, transport failures and responses without
    /// message content.
    async fn complete(&self, messages: &[Message], temperature: Option<f32>) -> Result<String>;

    /// Check if the provider is currently healthy and available
    async fn check_health(&self) -> bool {
        true
    }
}

/// Markdown code fence with an optional language tag, compiled once.
static FENCE_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

fn fence_pattern() -> Option<&'static Regex> {
    FENCE_PATTERN
        .get_or_init(|| Regex::new(r"(?s)```[^\n]*\n(.*?)```").ok())
        .as_ref()
}

/// Extract the body of the first markdown code fence in the text.
///
/// Works even when there is trailing prose after the closing fence.
pub fn extract_fenced_block(content: &str) -> Option<&str> {
    let captures = fence_pattern()?.captures(content)?;
    captures
        .get(1)
        .map(|body| body.as_str())
        .filter(|body| !body.is_empty())
}

/// Slice from the first `open` to the last `close` delimiter, inclusive.
pub fn outermost_span(content: &str, open: char, close: char) -> Option<&str> {
    let start = content.find(open)?;
    let end = content.rfind(close)?;
    if end > start {
        Some(&content[start..=end])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let user_msg = Message::user("Hello");
        assert_eq!(user_msg.role, MessageRole::User);
        assert_eq!(user_msg.content, "Hello");

        let system_msg = Message::system("Summarize");
        assert_eq!(system_msg.role, MessageRole::System);
        assert_eq!(Message::assistant("ok").role.to_string(), "assistant");
    }

    #[test]
    fn test_message_serialization() {
        let msg = Message::user("test");
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"test"}"#);
    }

    #[test]
    fn test_status_classification() {
        let auth = LLMError::from_status(reqwest::StatusCode::UNAUTHORIZED, "bad key".into());
        assert!(matches!(auth, LLMError::AuthenticationFailed(_)));

        let limited = LLMError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, String::new());
        assert!(matches!(limited, LLMError::RateLimitExceeded));

        let server = LLMError::from_status(reqwest::StatusCode::BAD_GATEWAY, "upstream".into());
        assert!(matches!(server, LLMError::InvalidRequest(_)));
    }

    #[test]
    fn test_engine_error_conversion() {
        let err: EngineError = LLMError::ParseError("no content".into()).into();
        assert!(matches!(err, EngineError::Transport(_)));

        let err: EngineError = LLMError::RateLimitExceeded.into();
        assert!(matches!(err, EngineError::Backend(_)));
    }

    #[test]
    fn test_extract_fenced_block() {
        let text = "Here you go:\n```json\n{\"label\": \"NEUTRAL\"}\n```\nthanks";
        assert_eq!(extract_fenced_block(text), Some("{\"label\": \"NEUTRAL\"}\n"));
        assert_eq!(extract_fenced_block("no fences"), None);
        assert_eq!(extract_fenced_block("```\n```"), None);
    }

    #[test]
    fn test_outermost_span() {
        assert_eq!(outermost_span("x [1, [2]] y", '[', ']'), Some("[1, [2]]"));
        assert_eq!(outermost_span("] backwards [", '[', ']'), None);
        assert_eq!(outermost_span("none", '{', '}'), None);
    }
}
