//! Hypothesis validation against supporting evidence

use sdk::types::{ResearchHypothesis, ValidatedSummary};
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{error, info};

use crate::grounding::Validator;

const QUESTION: &str = "Is this hypothesis supported by the research evidence?";

const QUESTION_INDICATORS: [&str; 8] = ["?", "whether", "how", "what", "why", "could", "would", "might"];
const CLAIM_INDICATORS: [&str; 5] = ["suggests", "indicates", "shows", "demonstrates", "reveals"];

const MIN_TEXT_CHARS: usize = 20;
const MAX_TEXT_CHARS: usize = 1000;
const MIN_CONFIDENCE: f64 = 0.3;

/// Outcome of validating one hypothesis
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HypothesisVerdict {
    pub valid: bool,
    pub groundedness: f64,
    pub explanation: String,
}

impl HypothesisVerdict {
    fn invalid(explanation: impl Into<String>) -> Self {
        Self {
            valid: false,
            groundedness: 0.0,
            explanation: explanation.into(),
        }
    }
}

pub struct HypothesisValidator {
    validator: Arc<dyn Validator>,
    groundedness_threshold: f64,
}

impl HypothesisValidator {
    pub fn new(validator: Arc<dyn Validator>, groundedness_threshold: f64) -> Self {
        Self {
            validator,
            groundedness_threshold,
        }
    }

    /// Cheap screening before grounding validation
    pub fn quick_check(
        &self,
        hypothesis: &ResearchHypothesis,
        supporting: &[ValidatedSummary],
    ) -> Result<(), &'static str> {
        if supporting.is_empty() {
            return Err("No supporting summaries");
        }

        let chars = hypothesis.text.chars().count();
        if chars < MIN_TEXT_CHARS {
            return Err("Hypothesis too short");
        }
        if chars > MAX_TEXT_CHARS {
            return Err("Hypothesis too long");
        }
        if hypothesis.confidence < MIN_CONFIDENCE {
            return Err("Very low confidence");
        }

        let text = hypothesis.text.to_lowercase();
        let has_indicator = QUESTION_INDICATORS
            .iter()
            .chain(CLAIM_INDICATORS.iter())
            .any(|indicator| text.contains(indicator));
        if !has_indicator {
            return Err("Hypothesis doesn't appear to be a question or claim");
        }

        Ok(())
    }

    /// Validate a hypothesis against the summaries that support it.
    ///
    /// Valid iff grounded percentage reaches the threshold and no span is
    /// contradicted. Backend failures yield an invalid verdict.
    pub async fn validate(
        &self,
        hypothesis: &ResearchHypothesis,
        supporting: &[ValidatedSummary],
    ) -> HypothesisVerdict {
        if supporting.is_empty() {
            return HypothesisVerdict::invalid("No supporting summaries provided");
        }

        let context = supporting
            .iter()
            .map(|s| format!("Paper: {}\nSummary: {}\n", s.paper_title, s.summary))
            .collect::<Vec<_>>()
            .join("\n---\n");

        let result = match self
            .validator
            .validate(&hypothesis.text, &Value::String(context), Some(QUESTION))
            .await
        {
            Ok(result) => result,
            Err(e) => {
                error!(hypothesis_id = %hypothesis.id, "Failed to validate hypothesis: {}", e);
                return HypothesisVerdict::invalid(format!("Validation error: {}", e));
            }
        };

        let groundedness = result.grounded_pct;
        let contradictions = result.contradictions().count();
        let valid = groundedness >= self.groundedness_threshold && contradictions == 0;

        let explanation = if valid {
            format!("Hypothesis is well-grounded ({:.2}%) with no contradictions", groundedness * 100.0)
        } else {
            let mut issues = Vec::new();
            if groundedness < self.groundedness_threshold {
                issues.push(format!("Low groundedness ({:.2}%)", groundedness * 100.0));
            }
            if contradictions > 0 {
                issues.push(format!("{} contradictions detected", contradictions));
            }
            if !result.spans.is_empty() {
                issues.push(format!("{} potentially hallucinated spans", result.spans.len()));
            }
            issues.join("; ")
        };

        info!(
            hypothesis_id = %hypothesis.id,
            valid,
            groundedness,
            contradictions,
            "Validated hypothesis"
        );

        HypothesisVerdict {
            valid,
            groundedness,
            explanation,
        }
    }

    /// Validate each hypothesis against the summaries it cites
    pub async fn validate_batch(
        &self,
        hypotheses: &[ResearchHypothesis],
        summaries: &[ValidatedSummary],
    ) -> Vec<HypothesisVerdict> {
        let mut verdicts = Vec::with_capacity(hypotheses.len());
        for hypothesis in hypotheses {
            let supporting = supporting_summaries(hypothesis, summaries);
            verdicts.push(self.validate(hypothesis, &supporting).await);
        }
        verdicts
    }

    pub async fn filter_valid(
        &self,
        hypotheses: &[ResearchHypothesis],
        summaries: &[ValidatedSummary],
    ) -> Vec<ResearchHypothesis> {
        let verdicts = self.validate_batch(hypotheses, summaries).await;
        hypotheses
            .iter()
            .zip(verdicts)
            .filter(|(_, verdict)| verdict.valid)
            .map(|(h, _)| h.clone())
            .collect()
    }

    /// Valid hypotheses scored `0.7 * groundedness + 0.3 * confidence`, best first
    pub async fn rank(
        &self,
        hypotheses: &[ResearchHypothesis],
        summaries: &[ValidatedSummary],
    ) -> Vec<(ResearchHypothesis, f64)> {
        let verdicts = self.validate_batch(hypotheses, summaries).await;
        let mut scored: Vec<(ResearchHypothesis, f64)> = hypotheses
            .iter()
            .zip(verdicts)
            .filter(|(_, verdict)| verdict.valid)
            .map(|(h, verdict)| (h.clone(), verdict.groundedness * 0.7 + h.confidence * 0.3))
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored
    }
}

/// Summaries for the papers a hypothesis cites, in citation order
pub fn supporting_summaries(
    hypothesis: &ResearchHypothesis,
    summaries: &[ValidatedSummary],
) -> Vec<ValidatedSummary> {
    hypothesis
        .supporting_paper_ids
        .iter()
        .filter_map(|id| summaries.iter().find(|s| &s.paper_id == id))
        .cloned()
        .collect()
}
