//! Error types for example retrieval.

use thiserror::Error;

/// Result type for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Errors raised by the embedder, the vector store, or indexing.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding backend returned invalid data: {0}")]
    InvalidEmbedding(String),

    #[error("vector store error: {0}")]
    Store(String),

    #[error("indexing I/O error: {0}")]
    Io(#[from] std::io::Error),
}
