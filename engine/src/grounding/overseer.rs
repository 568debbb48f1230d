//! Retry-escalation overseer
//!
//! Generates a summary, validates it, and regenerates with strict guidance
//! while the result stays blocked. After `max_retries` retries the last
//! summary is returned as-is with `blocked = true`; the caller decides what
//! to do with it.

use sdk::errors::EngineError;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::validator::Validator;
use super::ValidationResult;
use crate::summarize::Summarizer;

/// Guidance used for every retry after a blocked attempt
pub const STRICT_GUIDANCE: &str = "Only include claims supported by the provided data. \
Prefer omission over speculation. If something is not stated, say it is not stated.";

pub struct Overseer {
    validator: Arc<dyn Validator>,
    max_retries: u32,
}

impl Overseer {
    pub fn new(validator: Arc<dyn Validator>, max_retries: u32) -> Self {
        Self {
            validator,
            max_retries,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Validate an existing summary without regenerating it
    pub async fn validate(
        &self,
        summary: &str,
        context: &Value,
        question: Option<&str>,
    ) -> Result<ValidationResult, EngineError> {
        self.validator.validate(summary, context, question).await
    }

    /// Summarize `data` until the summary passes validation or retries run out.
    ///
    /// Attempt 0 uses the caller's `guidance`; every later attempt uses
    /// [`STRICT_GUIDANCE`]. Exactly one validation runs per attempt.
    ///
    /// # Errors
    /// Summarizer and validator failures propagate immediately and are not
    /// retried.
    pub async fn summarise_with_validation(
        &self,
        summarizer: &dyn Summarizer,
        data: &Value,
        context: &Value,
        question: Option<&str>,
        guidance: Option<&str>,
    ) -> Result<(String, ValidationResult), EngineError> {
        let mut current_guidance = guidance;
        let mut attempt = 0;

        loop {
            let summary = summarizer.generate_summary(data, current_guidance).await?;
            let result = self.validator.validate(&summary, context, question).await?;

            if !result.blocked {
                debug!(attempt, grounded_pct = result.grounded_pct, "summary accepted");
                return Ok((summary, result));
            }

            if attempt >= self.max_retries {
                warn!(
                    attempts = attempt + 1,
                    grounded_pct = result.grounded_pct,
                    "summary still blocked after final attempt"
                );
                return Ok((summary, result));
            }

            warn!(
                attempt,
                grounded_pct = result.grounded_pct,
                spans = result.spans.len(),
                "summary blocked, retrying with strict guidance"
            );
            current_guidance = Some(STRICT_GUIDANCE);
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summarize::MockSummarizer;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Returns queued block decisions in order, then unblocked
    struct ScriptedValidator {
        blocked: Mutex<VecDeque<bool>>,
        calls: Mutex<usize>,
    }

    impl ScriptedValidator {
        fn new(blocked: Vec<bool>) -> Self {
            Self {
                blocked: Mutex::new(blocked.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Validator for ScriptedValidator {
        async fn validate(
            &self,
            _summary: &str,
            _context: &Value,
            _question: Option<&str>,
        ) -> Result<ValidationResult, EngineError> {
            *self.calls.lock().unwrap() += 1;
            let blocked = self.blocked.lock().unwrap().pop_front().unwrap_or(false);
            Ok(ValidationResult {
                grounded_pct: if blocked { 0.5 } else { 1.0 },
                needs_fact_check: blocked,
                blocked,
                spans: Vec::new(),
                raw: Value::Null,
            })
        }
    }

    #[tokio::test]
    async fn test_returns_first_unblocked_attempt() {
        let validator = Arc::new(ScriptedValidator::new(vec![false]));
        let overseer = Overseer::new(validator.clone(), 2);
        let summarizer = MockSummarizer::scripted(["good"]);

        let (summary, result) = overseer
            .summarise_with_validation(&summarizer, &json!("data"), &json!("ctx"), None, Some("caller"))
            .await
            .unwrap();

        assert_eq!(summary, "good");
        assert!(!result.blocked);
        assert_eq!(validator.calls(), 1);
        assert_eq!(summarizer.guidance_seen(), vec![Some("caller".to_string())]);
    }

    #[tokio::test]
    async fn test_escalates_guidance_after_block() {
        let validator = Arc::new(ScriptedValidator::new(vec![true, false]));
        let overseer = Overseer::new(validator.clone(), 2);
        let summarizer = MockSummarizer::scripted(["speculative", "careful"]);

        let (summary, result) = overseer
            .summarise_with_validation(&summarizer, &json!("data"), &json!("ctx"), None, None)
            .await
            .unwrap();

        assert_eq!(summary, "careful");
        assert!(!result.blocked);
        assert_eq!(
            summarizer.guidance_seen(),
            vec![None, Some(STRICT_GUIDANCE.to_string())]
        );
    }

    #[tokio::test]
    async fn test_returns_blocked_result_after_budget() {
        let validator = Arc::new(ScriptedValidator::new(vec![true; 10]));
        let overseer = Overseer::new(validator.clone(), 2);
        let summarizer = MockSummarizer::scripted(["a", "b", "c", "d"]);

        let (summary, result) = overseer
            .summarise_with_validation(&summarizer, &json!("data"), &json!("ctx"), None, None)
            .await
            .unwrap();

        assert_eq!(summary, "c");
        assert!(result.blocked);
        assert_eq!(validator.calls(), 3);
        assert_eq!(summarizer.call_count(), 3);
    }

    #[tokio::test]
    async fn test_zero_retries_means_single_attempt() {
        let validator = Arc::new(ScriptedValidator::new(vec![true]));
        let overseer = Overseer::new(validator.clone(), 0);
        let summarizer = MockSummarizer::new();

        let (_, result) = overseer
            .summarise_with_validation(&summarizer, &json!("data"), &Value::Null, None, None)
            .await
            .unwrap();

        assert!(result.blocked);
        assert_eq!(validator.calls(), 1);
    }
}
