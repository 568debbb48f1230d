//! Token estimation for branch context budgets

use sdk::types::{Paper, ValidatedSummary};

use super::tokenizer::{CharRatioTokenizer, TiktokenTokenizer, Tokenizer};

/// Full-text characters counted per paper, same ceiling the summarizer uses
pub const MAX_FULL_TEXT_CHARS: usize = crate::summarize::MAX_CONTENT_CHARS;

/// Default fraction of the window a branch may fill
pub const DEFAULT_THRESHOLD: f64 = 0.8;

pub struct ContextEstimator {
    tokenizer: Box<dyn Tokenizer>,
}

impl Default for ContextEstimator {
    fn default() -> Self {
        Self::new(Box::new(CharRatioTokenizer::default()))
    }
}

impl ContextEstimator {
    pub fn new(tokenizer: Box<dyn Tokenizer>) -> Self {
        Self { tokenizer }
    }

    /// Estimator using exact cl100k_base counts
    pub fn tiktoken() -> Self {
        Self::new(Box::new(TiktokenTokenizer::new()))
    }

    pub fn tokenizer_name(&self) -> &str {
        self.tokenizer.name()
    }

    pub fn estimate_tokens(&self, text: &str) -> u64 {
        self.tokenizer.count_tokens(text)
    }

    /// Title, abstract, authors and truncated full text of a paper
    pub fn estimate_paper_tokens(&self, paper: &Paper) -> u64 {
        let mut parts: Vec<String> = Vec::new();

        if let Some(title) = paper.title.as_deref().filter(|t| !t.is_empty()) {
            parts.push(title.to_string());
        }
        if let Some(abstract_text) = paper.abstract_text.as_deref().filter(|t| !t.is_empty()) {
            parts.push(abstract_text.to_string());
        }
        if !paper.authors.is_empty() {
            let names: Vec<&str> = paper.authors.iter().map(|a| a.display_name()).collect();
            parts.push(format!("Authors: {}", names.join(", ")));
        }
        if let Some(full_text) = paper.full_text.as_deref().filter(|t| !t.is_empty()) {
            parts.push(full_text.chars().take(MAX_FULL_TEXT_CHARS).collect());
        }

        self.estimate_tokens(&parts.join("\n\n"))
    }

    pub fn estimate_summary_tokens(&self, summary: &ValidatedSummary) -> u64 {
        self.estimate_tokens(&format!("{}\n\n{}", summary.paper_title, summary.summary))
    }

    pub fn estimate_papers_tokens<'a, I>(&self, papers: I) -> u64
    where
        I: IntoIterator<Item = &'a Paper>,
    {
        papers.into_iter().map(|p| self.estimate_paper_tokens(p)).sum()
    }

    pub fn estimate_summaries_tokens<'a, I>(&self, summaries: I) -> u64
    where
        I: IntoIterator<Item = &'a ValidatedSummary>,
    {
        summaries
            .into_iter()
            .map(|s| self.estimate_summary_tokens(s))
            .sum()
    }
}

fn budget(max_context: u64, threshold: f64) -> u64 {
    (max_context as f64 * threshold) as u64
}

/// True iff `current + additional` is strictly over `max_context * threshold`
pub fn will_exceed_context(current: u64, additional: u64, max_context: u64, threshold: f64) -> bool {
    current.saturating_add(additional) > budget(max_context, threshold)
}

/// Tokens left before `max_context * threshold`, never negative
pub fn remaining_capacity(current: u64, max_context: u64, threshold: f64) -> u64 {
    budget(max_context, threshold).saturating_sub(current)
}

/// `current / max_context`; not clamped so overshoot stays visible
pub fn context_utilization(current: u64, max_context: u64) -> f64 {
    if max_context == 0 {
        return 0.0;
    }
    current as f64 / max_context as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_will_exceed_context() {
        assert!(will_exceed_context(100_000, 30_000, 128_000, DEFAULT_THRESHOLD));
        assert!(!will_exceed_context(100_000, 2_400, 128_000, DEFAULT_THRESHOLD));
        assert!(will_exceed_context(100_000, 2_401, 128_000, DEFAULT_THRESHOLD));
    }

    #[test]
    fn test_remaining_capacity() {
        assert_eq!(remaining_capacity(50_000, 128_000, 0.8), 52_400);
        assert_eq!(remaining_capacity(120_000, 128_000, 0.8), 0);
    }

    #[test]
    fn test_context_utilization_unclamped() {
        assert_eq!(context_utilization(64_000, 128_000), 0.5);
        assert_eq!(context_utilization(256_000, 128_000), 2.0);
        assert_eq!(context_utilization(10, 0), 0.0);
    }

    #[test]
    fn test_paper_tokens_compose_fields() {
        let estimator = ContextEstimator::default();
        let paper = Paper::new("p1", "abcd")
            .with_abstract("efgh")
            .with_authors(["Ann"]);

        // "abcd\n\nefgh\n\nAuthors: Ann" is 24 chars
        assert_eq!(estimator.estimate_paper_tokens(&paper), 6);
        assert_eq!(estimator.estimate_paper_tokens(&Paper::default()), 0);
    }

    #[test]
    fn test_paper_tokens_truncate_full_text() {
        let estimator = ContextEstimator::default();
        let paper = Paper {
            paper_id: "p1".into(),
            full_text: Some("x".repeat(MAX_FULL_TEXT_CHARS * 2)),
            ..Default::default()
        };
        assert_eq!(estimator.estimate_paper_tokens(&paper), (MAX_FULL_TEXT_CHARS / 4) as u64);
    }

    #[test]
    fn test_summary_tokens() {
        let estimator = ContextEstimator::default();
        let summary = ValidatedSummary::new("p1", "Title", "Body text!", 1.0);
        // "Title\n\nBody text!" is 17 chars
        assert_eq!(estimator.estimate_summary_tokens(&summary), 4);
        assert_eq!(estimator.estimate_summaries_tokens([&summary, &summary]), 8);
    }
}
