//! Grounded SDK
//!
//! Shared library providing error and record types for Grounded components.
//! This crate is used by the engine and by anything that consumes its
//! persisted loop state.

/// Error types and handling
pub mod errors;

/// Evidence records (papers, validated summaries, hypotheses)
pub mod types;

// Re-export commonly used types
pub use errors::{EngineError, GroundedErrorExt};
pub use types::{Author, Paper, ResearchHypothesis, ValidatedSummary};
