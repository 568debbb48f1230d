//! Grounded percentage and block decision
//!
//! Pure functions over labelled spans. Offsets are character positions in
//! the summary.

use super::validator::ValidatorThresholds;
use super::SpanDetection;
use crate::nli::NliLabel;

/// Union of half-open intervals, sorted by start.
///
/// Touching intervals (`[0,5)` and `[5,8)`) merge into one.
pub fn merge_intervals(mut intervals: Vec<(i64, i64)>) -> Vec<(i64, i64)> {
    intervals.sort_unstable();

    let mut merged: Vec<(i64, i64)> = Vec::with_capacity(intervals.len());
    for (start, end) in intervals {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// Intervals covered by spans that are not entailed by the source.
///
/// A span without a usable range (`end <= start`) is anchored at 0 with the
/// length of its text; one without text is ignored.
fn unsupported_intervals(spans: &[SpanDetection]) -> Vec<(i64, i64)> {
    spans
        .iter()
        .filter(|span| !span.is_entailed())
        .filter_map(|span| {
            if span.end > span.start {
                Some((span.start, span.end))
            } else {
                let len = span.text.chars().count() as i64;
                (len > 0).then_some((0, len))
            }
        })
        .collect()
}

/// Fraction of `summary` not covered by unsupported spans, in [0, 1].
///
/// An empty summary or no unsupported spans is fully grounded.
pub fn grounded_pct(summary: &str, spans: &[SpanDetection]) -> f64 {
    if summary.is_empty() {
        return 1.0;
    }

    let intervals = unsupported_intervals(spans);
    if intervals.is_empty() {
        return 1.0;
    }

    let hallucinated: i64 = merge_intervals(intervals)
        .iter()
        .map(|(start, end)| end - start)
        .sum();
    let summary_len = summary.chars().count().max(1) as f64;

    (1.0 - hallucinated as f64 / summary_len).clamp(0.0, 1.0)
}

/// Whether a summary must be held back.
///
/// Blocks when the grounded percentage is under `grounded_min`, when any
/// contradiction reaches `contradiction_conf`, or when any non-entailed span
/// has a hallucination score at or above `span_conf`.
pub fn should_block(grounded_pct: f64, spans: &[SpanDetection], thresholds: &ValidatorThresholds) -> bool {
    if grounded_pct < thresholds.grounded_min {
        return true;
    }

    spans.iter().any(|span| {
        (span.label == NliLabel::Contradiction && span.confidence >= thresholds.contradiction_conf)
            || (!span.is_entailed() && span.hallucination_score >= thresholds.span_conf)
    })
}
