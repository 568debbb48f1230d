//! Summarization backends
//!
//! A summarizer turns structured or plain data into summary text, optionally
//! steered by extra guidance appended to its instructions. The overseer calls
//! it once per attempt.

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::Paper;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::llm::{LLMProvider, Message};

/// Full-text characters included in a paper prompt
pub const MAX_CONTENT_CHARS: usize = 30_000;

const SYSTEM_PROMPT: &str = "Summarize whatever content you receive. The input may be messy, \
partial, or inconsistently structured. Return a plain text summary.";

const MOCK_SUMMARY: &str = "This is a mock summary for testing purposes.";

/// Pluggable summarization capability
#[async_trait]
pub trait Summarizer: Send + Sync {
    fn name(&self) -> &str;

    /// # Errors
    /// Backend failures and empty replies.
    async fn generate_summary(&self, data: &Value, guidance: Option<&str>) -> Result<String, EngineError>;
}

/// Summarizer backed by a chat model
pub struct LlmSummarizer {
    provider: Arc<dyn LLMProvider>,
    temperature: Option<f32>,
}

impl LlmSummarizer {
    pub fn new(provider: Arc<dyn LLMProvider>, temperature: Option<f32>) -> Self {
        Self {
            provider,
            temperature,
        }
    }

    fn system_prompt(guidance: Option<&str>) -> String {
        match guidance {
            Some(g) if !g.is_empty() => format!("{} {}", SYSTEM_PROMPT, g),
            _ => SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Strings pass through, anything else is sent as JSON
fn payload_text(data: &Value) -> String {
    match data {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    fn name(&self) -> &str {
        self.provider.name()
    }

    async fn generate_summary(&self, data: &Value, guidance: Option<&str>) -> Result<String, EngineError> {
        let messages = [
            Message::system(Self::system_prompt(guidance)),
            Message::user(payload_text(data)),
        ];

        let reply = self.provider.complete(&messages, self.temperature).await?;
        let summary = reply.trim();
        if summary.is_empty() {
            return Err(EngineError::Transport(
                "Summarizer response missing summary content".to_string(),
            ));
        }

        Ok(summary.to_string())
    }
}

/// Scripted summarizer for tests and dry runs
///
/// Returns queued summaries in order, then a fixed text. Every call's
/// guidance is recorded.
#[derive(Default)]
pub struct MockSummarizer {
    script: Mutex<VecDeque<String>>,
    guidance_log: Mutex<Vec<Option<String>>>,
}

impl MockSummarizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted<I, S>(summaries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(summaries.into_iter().map(Into::into).collect()),
            guidance_log: Mutex::new(Vec::new()),
        }
    }

    /// Guidance received by each call, in call order
    pub fn guidance_seen(&self) -> Vec<Option<String>> {
        self.guidance_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.guidance_seen().len()
    }
}

#[async_trait]
impl Summarizer for MockSummarizer {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate_summary(&self, _data: &Value, guidance: Option<&str>) -> Result<String, EngineError> {
        self.guidance_log
            .lock()
            .map_err(|_| EngineError::Backend("mock summarizer log poisoned".to_string()))?
            .push(guidance.map(str::to_string));

        let next = self
            .script
            .lock()
            .map_err(|_| EngineError::Backend("mock summarizer script poisoned".to_string()))?
            .pop_front();

        Ok(next.unwrap_or_else(|| MOCK_SUMMARY.to_string()))
    }
}

/// Paper content used for summarization: full text, else abstract.
///
/// Truncated at [`MAX_CONTENT_CHARS`] characters.
pub fn paper_content(paper: &Paper) -> String {
    let content = paper
        .full_text
        .as_deref()
        .filter(|t| !t.is_empty())
        .or_else(|| paper.abstract_text.as_deref().filter(|t| !t.is_empty()))
        .unwrap_or("No content available");

    if content.chars().count() > MAX_CONTENT_CHARS {
        let truncated: String = content.chars().take(MAX_CONTENT_CHARS).collect();
        format!("{}\n\n[Content truncated...]", truncated)
    } else {
        content.to_string()
    }
}

/// Build the prompt that asks for a summary of one paper
pub fn paper_prompt(paper: &Paper) -> String {
    let authors = paper
        .authors
        .iter()
        .take(5)
        .map(|a| a.display_name())
        .collect::<Vec<_>>()
        .join(", ");
    let year = paper
        .year
        .map(|y| y.to_string())
        .unwrap_or_else(|| "Unknown".to_string());

    format!(
        "Paper: {}\nAuthors: {}\nYear: {}\n\nContent:\n{}\n\nProvide a concise summary.",
        paper.display_title(),
        authors,
        year,
        paper_content(paper)
    )
}
