//! Error types and handling
//!
//! This module provides the error types used throughout the Grounded engine.
//! All errors implement the `GroundedErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! # Failure classes
//!
//! - **Configuration**: a required backend parameter is missing or invalid.
//!   Raised when a backend is constructed, never at call time.
//! - **Transport**: a backend answered with a non-success status or an
//!   unparseable body. Fails the enclosing call and is never retried by the
//!   validator; the orchestration loop records it and moves on.
//! - **Malformed prediction**: span-detector output that is not record-shaped.
//!   Field-level noise inside a record is tolerated, shape violations are not.
//! - **Hypothesis parsing**: recovered locally as an empty result set.

use thiserror::Error;

/// Trait for Grounded error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait GroundedErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and does not contain
    /// API keys, backend response bodies or other internal details.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors may succeed when the enclosing operation is run
    /// again later. Non-recoverable errors need a configuration or backend fix.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, GroundedErrorExt};
///
/// let error = EngineError::Transport("span detector returned 503".to_string());
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal_error = EngineError::MalformedPrediction("expected an object".to_string());
/// assert!(!fatal_error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Backend errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed span prediction: {0}")]
    MalformedPrediction(String),

    #[error("Backend error: {0}")]
    Backend(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(String),

    // Branch lifecycle errors
    #[error("Invalid branch transition for {branch_id}: {from} -> {to}")]
    InvalidTransition {
        branch_id: String,
        from: String,
        to: String,
    },

    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    #[error("Branch already exists: {0}")]
    DuplicateBranch(String),

    #[error("Loop not found: {0}")]
    LoopNotFound(String),

    // Hypothesis errors
    #[error("Hypothesis parse error: {0}")]
    HypothesisParse(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GroundedErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file and backend environment variables",

            Self::Transport(_) => "A model backend did not answer correctly. Check that it is running",
            Self::MalformedPrediction(_) => {
                "The span detector returned data in an unexpected shape. Check its version"
            }
            Self::Backend(_) => "A model backend rejected the request. Check its logs",

            Self::Database(_) => "Loop state storage failed. Check the data directory",

            Self::InvalidTransition { .. } => "This branch cannot move to the requested status",
            Self::BranchNotFound(_) => "The requested branch does not exist",
            Self::DuplicateBranch(_) => "A branch with this id is already part of the loop",
            Self::LoopNotFound(_) => "The requested research loop does not exist",

            Self::HypothesisParse(_) => "The model did not return structured hypotheses",

            Self::Serialization(_) => "Failed to encode or decode a record",

            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable errors
            Self::Config(_)
            | Self::MalformedPrediction(_)
            | Self::InvalidTransition { .. }
            | Self::DuplicateBranch(_)
            | Self::Serialization(_) => false,

            // All other errors are potentially recoverable
            _ => true,
        }
    }
}
