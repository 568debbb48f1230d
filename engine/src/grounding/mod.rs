//! Grounding validation
//!
//! Decides whether a generated summary is supported by its source before it
//! is released:
//!
//! 1. a span detector flags suspicious substrings of the summary,
//! 2. every span is checked against the source with NLI ([`crate::nli`]),
//! 3. [`math`] turns the labelled spans into a grounded percentage and a
//!    block decision,
//! 4. the [`overseer`] regenerates blocked summaries with stricter guidance.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::nli::NliLabel;

pub mod math;
pub mod overseer;
pub mod validator;

pub use math::{grounded_pct, merge_intervals, should_block};
pub use overseer::{Overseer, STRICT_GUIDANCE};
pub use validator::{normalize_contexts, GroundingValidator, Validator, ValidatorThresholds};

/// A flagged span with its NLI verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanDetection {
    pub text: String,
    /// Character offset into the summary, inclusive
    pub start: i64,
    /// Character offset into the summary, exclusive
    pub end: i64,
    pub hallucination_score: f64,
    pub label: NliLabel,
    pub confidence: f64,
    pub severity: u8,
}

impl SpanDetection {
    /// Severity is derived from the label
    pub fn new(
        text: impl Into<String>,
        start: i64,
        end: i64,
        hallucination_score: f64,
        label: NliLabel,
        confidence: f64,
    ) -> Self {
        Self {
            text: text.into(),
            start,
            end,
            hallucination_score,
            label,
            confidence,
            severity: label.severity(),
        }
    }

    pub fn is_entailed(&self) -> bool {
        self.label == NliLabel::Entailment
    }
}

/// Outcome of one validation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Fraction of summary characters not covered by unsupported spans
    pub grounded_pct: f64,
    pub needs_fact_check: bool,
    pub blocked: bool,
    pub spans: Vec<SpanDetection>,
    /// Detector response, kept for diagnostics
    #[serde(default)]
    pub raw: Value,
}

impl ValidationResult {
    pub fn contradictions(&self) -> impl Iterator<Item = &SpanDetection> {
        self.spans
            .iter()
            .filter(|s| s.label == NliLabel::Contradiction)
    }
}

/// Replace every non-entailed span in `text` with `[UNVERIFIED]`.
///
/// Overlapping spans are merged first and replaced from the end of the text
/// backwards so earlier offsets stay valid. Spans whose range is empty or
/// falls outside the text are skipped.
pub fn redact_unverified(text: &str, spans: &[SpanDetection]) -> String {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len() as i64;

    let ranges: Vec<(i64, i64)> = spans
        .iter()
        .filter(|s| !s.is_entailed())
        .filter(|s| s.start >= 0 && s.end > s.start && s.end <= len)
        .map(|s| (s.start, s.end))
        .collect();

    let mut result = chars;
    for (start, end) in merge_intervals(ranges).into_iter().rev() {
        result.splice(start as usize..end as usize, "[UNVERIFIED]".chars());
    }
    result.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_severity_follows_label() {
        let span = SpanDetection::new("London", 0, 6, 0.9, NliLabel::Contradiction, 0.95);
        assert_eq!(span.severity, 4);
        assert!(!span.is_entailed());
    }

    #[test]
    fn test_redact_replaces_unsupported_spans() {
        let text = "The tower is in London, England. It opened in 1889.";
        let spans = vec![
            SpanDetection::new("London, England", 16, 31, 0.97, NliLabel::Contradiction, 0.95),
            SpanDetection::new("1889", 46, 50, 0.1, NliLabel::Entailment, 0.99),
        ];

        assert_eq!(
            redact_unverified(text, &spans),
            "The tower is in [UNVERIFIED]. It opened in 1889."
        );
    }

    #[test]
    fn test_redact_merges_overlaps_and_skips_invalid() {
        let text = "abcdefghij";
        let spans = vec![
            SpanDetection::new("cde", 2, 5, 0.5, NliLabel::Neutral, 0.5),
            SpanDetection::new("def", 3, 6, 0.5, NliLabel::Neutral, 0.5),
            SpanDetection::new("bad", 8, 40, 0.5, NliLabel::Neutral, 0.5),
            SpanDetection::new("neg", -2, 1, 0.5, NliLabel::Neutral, 0.5),
        ];

        assert_eq!(redact_unverified(text, &spans), "ab[UNVERIFIED]ghij");
    }

    #[test]
    fn test_redact_without_spans_is_identity() {
        assert_eq!(redact_unverified("unchanged", &[]), "unchanged");
    }
}
