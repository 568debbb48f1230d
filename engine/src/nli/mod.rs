//! Natural language inference
//!
//! An NLI backend classifies whether a premise (a chunk of source context)
//! entails, contradicts or is neutral towards a hypothesis (a flagged span of
//! generated text). The grounding validator asks it about every span and keeps
//! the most confident answer across chunks, see [`aggregator`].

use async_trait::async_trait;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod aggregator;
pub mod http;
pub mod llm;
pub mod mock;

pub use aggregator::{best_prediction, chunk_contexts};
pub use http::HttpNliBackend;
pub use llm::LlmNliBackend;
pub use mock::MockNliBackend;

/// NLI relation between premise and hypothesis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NliLabel {
    Entailment,
    Neutral,
    Contradiction,
}

impl NliLabel {
    /// Severity used when reporting a span: 0, 2 or 4
    pub fn severity(self) -> u8 {
        match self {
            NliLabel::Entailment => 0,
            NliLabel::Neutral => 2,
            NliLabel::Contradiction => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NliLabel::Entailment => "ENTAILMENT",
            NliLabel::Neutral => "NEUTRAL",
            NliLabel::Contradiction => "CONTRADICTION",
        }
    }
}

impl fmt::Display for NliLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for NliLabel {
    type Err = EngineError;

    /// Case-insensitive
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ENTAILMENT" => Ok(NliLabel::Entailment),
            "NEUTRAL" => Ok(NliLabel::Neutral),
            "CONTRADICTION" => Ok(NliLabel::Contradiction),
            other => Err(EngineError::Transport(format!("Unknown NLI label '{}'", other))),
        }
    }
}

/// One NLI answer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NliPrediction {
    pub label: NliLabel,
    pub confidence: f64,
}

impl NliPrediction {
    pub fn new(label: NliLabel, confidence: f64) -> Self {
        Self { label, confidence }
    }

    /// Build from loosely typed JSON fields `label` and `confidence`
    ///
    /// # Errors
    /// `EngineError::Transport` when either field is missing or mistyped.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, EngineError> {
        let label = value.get("label").and_then(|v| v.as_str());
        let confidence = value.get("confidence").and_then(|v| v.as_f64());

        match (label, confidence) {
            (Some(label), Some(confidence)) => Ok(Self::new(label.parse()?, confidence)),
            _ => Err(EngineError::Transport(
                "NLI response missing label or confidence".to_string(),
            )),
        }
    }
}

/// Pluggable NLI capability
#[async_trait]
pub trait NliBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Classify `hypothesis` against `premise`
    async fn infer(&self, premise: &str, hypothesis: &str) -> Result<NliPrediction, EngineError>;
}
