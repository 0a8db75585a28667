//! Error types for LLM access.

use thiserror::Error;

/// Result type for LLM operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors that can occur when talking to the model backend.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend not running or refusing connections.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Requested model is not installed on the backend.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// Backend returned a malformed or unexpected body.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Call exceeded its time budget.
    #[error("request timeout after {0}s")]
    Timeout(u64),

    /// Schema validation failed after all retries.
    #[error("structured output failed after {attempts} attempts: {message}")]
    StructuredOutput { attempts: u32, message: String },

    /// The backend answered with an error status.
    #[error("provider error: {0}")]
    Provider(String),

    /// Unrecoverable failure (model refuses, fatal configuration).
    #[error("fatal LLM error: {0}")]
    Fatal(String),
}

impl LlmError {
    /// Whether a retry may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Http(_)
                | LlmError::ServiceUnavailable(_)
                | LlmError::Timeout(_)
                | LlmError::Provider(_)
        )
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::InvalidResponse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability() {
        assert!(LlmError::ServiceUnavailable("down".into()).is_retryable());
        assert!(LlmError::Timeout(60).is_retryable());
        assert!(!LlmError::Fatal("refused".into()).is_retryable());
        assert!(!LlmError::StructuredOutput {
            attempts: 3,
            message: "bad".into()
        }
        .is_retryable());
    }
}
