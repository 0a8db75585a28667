//! Error types for source analysis and validation.

use thiserror::Error;

/// Result type for analysis operations.
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Errors raised while analyzing or validating code.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The parser could not be initialized or produced no tree.
    #[error("parse failed: {0}")]
    Parse(String),

    /// A validation tool could not be run at all.
    #[error("validation tool `{tool}` failed to run: {message}")]
    Tool { tool: String, message: String },

    /// Validation exceeded its time budget.
    #[error("validation timed out after {0}s")]
    Timeout(u64),

    /// Filesystem access failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
