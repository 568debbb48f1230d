//! Grounding validator
//!
//! Composes span detection, cross-chunk NLI and the grounding math into one
//! `validate` call. Backend failures propagate; nothing is retried here.

use async_trait::async_trait;
use sdk::errors::EngineError;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use super::math::{grounded_pct, should_block};
use super::{SpanDetection, ValidationResult};
use crate::config::ValidatorConfig;
use crate::nli::{best_prediction, chunk_contexts, NliBackend};
use crate::spans::{RawSpan, SpanDetector};

pub const GROUNDED_MIN_ENV: &str = "GROUNDED_MIN";
pub const SPAN_CONF_ENV: &str = "SPAN_CONF";
pub const CONTRADICTION_CONF_ENV: &str = "CONTRADICTION_CONF";
pub const CHUNK_SIZE_ENV: &str = "NLI_CHUNK_SIZE";

/// Older names, read when the primary variable is unset
pub const GROUNDED_MIN_ENV_ALIAS: &str = "LETTUCE_GROUNDED_MIN";
pub const SPAN_CONF_ENV_ALIAS: &str = "LETTUCE_SPAN_CONF";
pub const CONTRADICTION_CONF_ENV_ALIAS: &str = "NLI_CONTRADICTION_CONF";

/// Thresholds applied by [`GroundingValidator`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidatorThresholds {
    /// Minimum grounded percentage
    pub grounded_min: f64,
    /// Hallucination score that blocks a non-entailed span
    pub span_conf: f64,
    /// NLI confidence that blocks a contradiction
    pub contradiction_conf: f64,
    /// Context chunk size in characters, `<= 0` disables chunking
    pub chunk_size: i64,
}

impl Default for ValidatorThresholds {
    fn default() -> Self {
        Self {
            grounded_min: 0.85,
            span_conf: 0.90,
            contradiction_conf: 0.90,
            chunk_size: 2000,
        }
    }
}

impl ValidatorThresholds {
    /// Explicit value > process environment > default
    pub fn resolve(overrides: &ValidatorConfig) -> Self {
        Self::resolve_with(overrides, |name| std::env::var(name).ok())
    }

    /// Same as [`resolve`](Self::resolve) with a custom environment lookup.
    /// Unparseable environment values fall back to the default.
    pub fn resolve_with<F>(overrides: &ValidatorConfig, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parse = |name: &str| env(name).and_then(|v| v.trim().parse::<f64>().ok());
        let from_env = |name: &str, alias: &str| parse(name).or_else(|| parse(alias));

        Self {
            grounded_min: overrides
                .grounded_min
                .or_else(|| from_env(GROUNDED_MIN_ENV, GROUNDED_MIN_ENV_ALIAS))
                .unwrap_or(defaults.grounded_min),
            span_conf: overrides
                .span_conf
                .or_else(|| from_env(SPAN_CONF_ENV, SPAN_CONF_ENV_ALIAS))
                .unwrap_or(defaults.span_conf),
            contradiction_conf: overrides
                .contradiction_conf
                .or_else(|| from_env(CONTRADICTION_CONF_ENV, CONTRADICTION_CONF_ENV_ALIAS))
                .unwrap_or(defaults.contradiction_conf),
            chunk_size: overrides
                .chunk_size
                .or_else(|| env(CHUNK_SIZE_ENV).and_then(|v| v.trim().parse::<i64>().ok()))
                .unwrap_or(defaults.chunk_size),
        }
    }
}

/// Turn loosely shaped context into an ordered list of strings.
///
/// `null` becomes one empty context, an array is normalized element-wise,
/// strings pass through and any other value is serialized as JSON.
pub fn normalize_contexts(context: &Value) -> Vec<String> {
    match context {
        Value::Null => vec![String::new()],
        Value::Array(items) => items.iter().map(serialize_item).collect(),
        other => vec![serialize_item(other)],
    }
}

fn serialize_item(item: &Value) -> String {
    match item {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Anything that can validate a summary against its source
#[async_trait]
pub trait Validator: Send + Sync {
    /// # Errors
    /// Transport failures of the backends and malformed span predictions.
    async fn validate(
        &self,
        summary: &str,
        context: &Value,
        question: Option<&str>,
    ) -> Result<ValidationResult, EngineError>;
}

/// Span detection + NLI grounding validator
pub struct GroundingValidator {
    detector: Arc<dyn SpanDetector>,
    nli: Arc<dyn NliBackend>,
    thresholds: ValidatorThresholds,
}

impl GroundingValidator {
    pub fn new(
        detector: Arc<dyn SpanDetector>,
        nli: Arc<dyn NliBackend>,
        thresholds: ValidatorThresholds,
    ) -> Self {
        Self {
            detector,
            nli,
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &ValidatorThresholds {
        &self.thresholds
    }
}

#[async_trait]
impl Validator for GroundingValidator {
    async fn validate(
        &self,
        summary: &str,
        context: &Value,
        question: Option<&str>,
    ) -> Result<ValidationResult, EngineError> {
        let contexts = normalize_contexts(context);

        let predictions = self
            .detector
            .detect(&contexts, question.unwrap_or(""), summary)
            .await?;

        let raw_spans = predictions
            .iter()
            .map(RawSpan::coerce)
            .collect::<Result<Vec<_>, _>>()?;

        let chunks = chunk_contexts(&contexts, self.thresholds.chunk_size);
        debug!(
            detector = self.detector.name(),
            nli = self.nli.name(),
            spans = raw_spans.len(),
            chunks = chunks.len(),
            "checking flagged spans"
        );

        let mut spans = Vec::with_capacity(raw_spans.len());
        for raw in raw_spans {
            let verdict = best_prediction(self.nli.as_ref(), &raw.text, &chunks).await?;
            spans.push(SpanDetection::new(
                raw.text,
                raw.start,
                raw.end,
                raw.hallucination_score,
                verdict.label,
                verdict.confidence,
            ));
        }

        let grounded = grounded_pct(summary, &spans);
        let blocked = should_block(grounded, &spans, &self.thresholds);

        info!(
            grounded_pct = grounded,
            blocked,
            spans = spans.len(),
            "validated summary"
        );

        Ok(ValidationResult {
            grounded_pct: grounded,
            needs_fact_check: !spans.is_empty(),
            blocked,
            spans,
            raw: json!({ "predictions": predictions }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nli::{MockNliBackend, NliLabel, NliPrediction};
    use crate::spans::StaticSpanDetector;
    use std::collections::HashMap;

    #[test]
    fn test_normalize_contexts() {
        assert_eq!(normalize_contexts(&Value::Null), vec![""]);
        assert_eq!(normalize_contexts(&json!("plain")), vec!["plain"]);
        assert_eq!(normalize_contexts(&json!(42)), vec!["42"]);
        assert_eq!(
            normalize_contexts(&json!(["a", {"k": 1}, null])),
            vec!["a", r#"{"k":1}"#, "null"]
        );
        assert!(normalize_contexts(&json!([])).is_empty());
    }

    #[test]
    fn test_threshold_precedence() {
        let env: HashMap<&str, &str> = [
            (GROUNDED_MIN_ENV, "0.6"),
            (SPAN_CONF_ENV, "not-a-number"),
            (CHUNK_SIZE_ENV, "500"),
        ]
        .into_iter()
        .collect();
        let lookup = |name: &str| env.get(name).map(|v| v.to_string());

        let overrides = ValidatorConfig {
            contradiction_conf: Some(0.7),
            chunk_size: Some(0),
            ..Default::default()
        };
        let resolved = ValidatorThresholds::resolve_with(&overrides, lookup);

        assert_eq!(resolved.grounded_min, 0.6);
        assert_eq!(resolved.span_conf, 0.90);
        assert_eq!(resolved.contradiction_conf, 0.7);
        assert_eq!(resolved.chunk_size, 0);
    }

    #[test]
    fn test_threshold_env_aliases() {
        let env: HashMap<&str, &str> = [
            (GROUNDED_MIN_ENV_ALIAS, "0.5"),
            (SPAN_CONF_ENV, "0.95"),
            (SPAN_CONF_ENV_ALIAS, "0.4"),
            (CONTRADICTION_CONF_ENV_ALIAS, "0.8"),
        ]
        .into_iter()
        .collect();
        let lookup = |name: &str| env.get(name).map(|v| v.to_string());

        let resolved = ValidatorThresholds::resolve_with(&ValidatorConfig::default(), lookup);

        assert_eq!(resolved.grounded_min, 0.5);
        assert_eq!(resolved.span_conf, 0.95);
        assert_eq!(resolved.contradiction_conf, 0.8);
        assert_eq!(resolved.chunk_size, 2000);
    }

    #[tokio::test]
    async fn test_validate_without_spans_is_grounded() {
        let validator = GroundingValidator::new(
            Arc::new(StaticSpanDetector::empty()),
            Arc::new(MockNliBackend::new()),
            ValidatorThresholds::default(),
        );

        let result = validator
            .validate("Anything at all.", &json!("source"), None)
            .await
            .unwrap();

        assert_eq!(result.grounded_pct, 1.0);
        assert!(!result.blocked);
        assert!(!result.needs_fact_check);
    }

    #[tokio::test]
    async fn test_malformed_prediction_fails_call() {
        let nli = Arc::new(MockNliBackend::new());
        let validator = GroundingValidator::new(
            Arc::new(StaticSpanDetector::new(vec![json!({"text": "ok"}), json!("bad")])),
            nli.clone(),
            ValidatorThresholds::default(),
        );

        let err = validator.validate("ok", &json!("src"), None).await.unwrap_err();

        assert!(matches!(err, EngineError::MalformedPrediction(_)));
        assert_eq!(nli.call_count(), 0);
    }

    #[tokio::test]
    async fn test_validate_labels_every_span() {
        let summary = "Water boils at 50 degrees at sea level.";
        let validator = GroundingValidator::new(
            Arc::new(StaticSpanDetector::new(vec![json!({
                "text": "50 degrees",
                "start": 15,
                "end": 25,
                "hallucination_score": 0.4
            })])),
            Arc::new(MockNliBackend::fixed(NliPrediction::new(NliLabel::Contradiction, 0.92))),
            ValidatorThresholds::default(),
        );

        let result = validator
            .validate(summary, &json!(["Water boils at 100 degrees Celsius at sea level."]), None)
            .await
            .unwrap();

        assert_eq!(result.spans.len(), 1);
        assert_eq!(result.spans[0].severity, 4);
        assert!(result.needs_fact_check);
        assert!(result.blocked);
        assert_eq!(result.raw["predictions"].as_array().map(Vec::len), Some(1));
    }
}
