//! Prompted NLI classifier
//!
//! Uses a chat model as the NLI backend. The model is told to answer with a
//! JSON object; prose or code fences around that object are tolerated.

use async_trait::async_trait;
use sdk::errors::EngineError;
use std::sync::Arc;

use super::{NliBackend, NliPrediction};
use crate::llm::{extract_fenced_block, outermost_span, LLMProvider, Message};

const SYSTEM_PROMPT: &str = "You are an NLI classifier. Given a premise and a hypothesis, return a JSON \
object with keys: label (ENTAILMENT, CONTRADICTION, or NEUTRAL) and \
confidence (0 to 1). Output JSON only.";

pub struct LlmNliBackend {
    provider: Arc<dyn LLMProvider>,
}

impl LlmNliBackend {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }
}

/// Parse the classifier reply into a JSON object
fn parse_reply(text: &str) -> Result<serde_json::Value, EngineError> {
    let text = text.trim();

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
        return Ok(value);
    }

    let candidates = [extract_fenced_block(text), outermost_span(text, '{', '}')];
    candidates
        .into_iter()
        .flatten()
        .find_map(|candidate| serde_json::from_str(candidate.trim()).ok())
        .ok_or_else(|| EngineError::Transport("NLI reply is not valid JSON".to_string()))
}

#[async_trait]
impl NliBackend for LlmNliBackend {
    fn name(&self) -> &str {
        "llm"
    }

    async fn infer(&self, premise: &str, hypothesis: &str) -> Result<NliPrediction, EngineError> {
        let messages = [
            Message::system(SYSTEM_PROMPT),
            Message::user(format!("Premise:\n{}\n\nHypothesis:\n{}", premise, hypothesis)),
        ];

        let reply = self.provider.complete(&messages, Some(0.0)).await?;
        let value = parse_reply(&reply)?;

        NliPrediction::from_json(&value)
    }
}
