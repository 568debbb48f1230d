//! Token counting backends

use std::sync::OnceLock;
use tiktoken_rs::CoreBPE;
use tracing::{info, warn};

/// Average characters per token for English text
pub const CHARS_PER_TOKEN: f64 = 4.0;

pub trait Tokenizer: Send + Sync {
    fn name(&self) -> &str;

    fn count_tokens(&self, text: &str) -> u64;
}

/// Character-count heuristic
#[derive(Debug, Clone, Copy)]
pub struct CharRatioTokenizer {
    chars_per_token: f64,
}

impl CharRatioTokenizer {
    pub fn new(chars_per_token: f64) -> Self {
        Self { chars_per_token }
    }
}

impl Default for CharRatioTokenizer {
    fn default() -> Self {
        Self::new(CHARS_PER_TOKEN)
    }
}

impl Tokenizer for CharRatioTokenizer {
    fn name(&self) -> &str {
        "chars"
    }

    fn count_tokens(&self, text: &str) -> u64 {
        if text.is_empty() || self.chars_per_token <= 0.0 {
            return 0;
        }
        (text.chars().count() as f64 / self.chars_per_token) as u64
    }
}

/// Exact cl100k_base counts
///
/// The encoding tables are loaded on first use. If loading fails the
/// tokenizer falls back to the character heuristic.
#[derive(Default)]
pub struct TiktokenTokenizer {
    bpe: OnceLock<Option<CoreBPE>>,
    fallback: CharRatioTokenizer,
}

impl TiktokenTokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn bpe(&self) -> Option<&CoreBPE> {
        self.bpe
            .get_or_init(|| match tiktoken_rs::cl100k_base() {
                Ok(bpe) => {
                    info!("Loaded cl100k_base tokenizer");
                    Some(bpe)
                }
                Err(e) => {
                    warn!("Failed to load cl100k_base, using character estimate: {}", e);
                    None
                }
            })
            .as_ref()
    }

    /// Whether the encoding has been loaded yet
    pub fn is_loaded(&self) -> bool {
        matches!(self.bpe.get(), Some(Some(_)))
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn name(&self) -> &str {
        "cl100k_base"
    }

    fn count_tokens(&self, text: &str) -> u64 {
        if text.is_empty() {
            return 0;
        }
        match self.bpe() {
            Some(bpe) => bpe.encode_ordinary(text).len() as u64,
            None => self.fallback.count_tokens(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_ratio() {
        let tokenizer = CharRatioTokenizer::default();
        assert_eq!(tokenizer.count_tokens(""), 0);
        assert_eq!(tokenizer.count_tokens("abc"), 0);
        assert_eq!(tokenizer.count_tokens("abcdefghi"), 2);
        assert_eq!(CharRatioTokenizer::new(2.0).count_tokens("abcd"), 2);
    }

    #[test]
    fn test_tiktoken_loads_lazily() {
        let tokenizer = TiktokenTokenizer::new();
        assert!(!tokenizer.is_loaded());
        assert_eq!(tokenizer.count_tokens(""), 0);
        assert!(!tokenizer.is_loaded());

        let count = tokenizer.count_tokens("The Eiffel Tower is located in Paris.");
        assert!(count > 0);
        assert!(tokenizer.is_loaded());
    }
}
