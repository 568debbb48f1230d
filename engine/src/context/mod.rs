//! Context budget management
//!
//! Estimates how many tokens a branch's evidence occupies and partitions an
//! over-budget branch into narrower ones.

pub mod estimator;
pub mod splitter;
pub mod tokenizer;

pub use estimator::{
    context_utilization, remaining_capacity, will_exceed_context, ContextEstimator,
    DEFAULT_THRESHOLD, MAX_FULL_TEXT_CHARS,
};
pub use splitter::{BranchSplitter, SplitAnalysis, SplitGroup, SplitResult, SplitStrategy};
pub use tokenizer::{CharRatioTokenizer, TiktokenTokenizer, Tokenizer};
