//! Grounded Engine Library
//!
//! Grounded summarization and branching literature research.
//! It is used by both the main binary and integration tests.

/// Backend construction from configuration
pub mod backends;

/// CLI interface module
pub mod cli;

/// Configuration management module
pub mod config;

/// Token counting and context budgeting
pub mod context;

/// Database persistence module
pub mod db;

/// Summary grounding validation
pub mod grounding;

/// Command handlers module
pub mod handlers;

/// Hypothesis generation and validation
pub mod hypothesis;

/// LLM provider abstraction layer
pub mod llm;

/// Natural language inference backends
pub mod nli;

/// Research branch orchestration
pub mod orchestration;

/// Paper search sources
pub mod papers;

/// Hallucinated span detection
pub mod spans;

/// Summary generation
pub mod summarize;

/// Telemetry and Observability
pub mod telemetry;
