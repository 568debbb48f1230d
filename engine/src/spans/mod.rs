//! Hallucination span detection
//!
//! A span detector flags substrings of a generated answer that the source
//! contexts may not support. Detectors return raw JSON predictions; the
//! grounding validator coerces them into typed spans, tolerating noisy fields
//! but rejecting anything that is not an object.

use async_trait::async_trait;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Pluggable span detection capability
#[async_trait]
pub trait SpanDetector: Send + Sync {
    fn name(&self) -> &str;

    /// Return raw predictions `{text, start, end, hallucination_score}` for `answer`
    async fn detect(
        &self,
        contexts: &[String],
        question: &str,
        answer: &str,
    ) -> Result<Vec<Value>, EngineError>;
}

/// A span prediction after defensive coercion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSpan {
    pub text: String,
    pub start: i64,
    pub end: i64,
    pub hallucination_score: f64,
}

impl RawSpan {
    /// Coerce one raw prediction.
    ///
    /// Missing or mistyped fields fall back to `""`, `0` and `0.0`. Offsets
    /// given as digit-only strings and scores given as numeric strings are
    /// parsed.
    ///
    /// # Errors
    /// `EngineError::MalformedPrediction` when `item` is not a JSON object.
    pub fn coerce(item: &Value) -> Result<Self, EngineError> {
        let obj = item.as_object().ok_or_else(|| {
            EngineError::MalformedPrediction(format!(
                "span prediction must be an object, got {}",
                json_kind(item)
            ))
        })?;

        let text = match obj.get("text") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };

        Ok(Self {
            text,
            start: coerce_offset(obj.get("start")),
            end: coerce_offset(obj.get("end")),
            hallucination_score: coerce_score(obj.get("hallucination_score")),
        })
    }
}

fn coerce_offset(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) => {
            s.parse().unwrap_or(0)
        }
        _ => 0,
    }
}

fn coerce_score(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Remote detector speaking the LettuceDetect span API
pub struct HttpSpanDetector {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSpanDetector {
    /// # Errors
    /// `EngineError::Config` when `base_url` is empty.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, EngineError> {
        let base_url = base_url.into();
        if base_url.trim().is_empty() {
            return Err(EngineError::Config(
                "Span detector URL is required".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/lettucedetect/spans", self.base_url)
    }
}

#[async_trait]
impl SpanDetector for HttpSpanDetector {
    fn name(&self) -> &str {
        "http"
    }

    async fn detect(
        &self,
        contexts: &[String],
        question: &str,
        answer: &str,
    ) -> Result<Vec<Value>, EngineError> {
        let payload = json!({
            "contexts": contexts,
            "question": question,
            "answer": answer,
        });

        let response = self
            .client
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|e| EngineError::Transport(format!("Span detection request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::Transport(format!(
                "Span detection request failed: {} {}",
                status, text
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            EngineError::Transport(format!("Span detection response is not JSON: {}", e))
        })?;

        // An absent field means no spans. A present field must be a list.
        match body.get("predictions") {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(other) => Err(EngineError::MalformedPrediction(format!(
                "expected a list of predictions, got {}",
                other
            ))),
        }
    }
}

/// Returns the same predictions for every call; empty detects nothing
#[derive(Debug, Clone, Default)]
pub struct StaticSpanDetector {
    predictions: Vec<Value>,
}

impl StaticSpanDetector {
    pub fn new(predictions: Vec<Value>) -> Self {
        Self { predictions }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SpanDetector for StaticSpanDetector {
    fn name(&self) -> &str {
        "mock"
    }

    async fn detect(
        &self,
        _contexts: &[String],
        _question: &str,
        _answer: &str,
    ) -> Result<Vec<Value>, EngineError> {
        Ok(self.predictions.clone())
    }
}
