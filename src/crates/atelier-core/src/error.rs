//! Error types for the workflow engine and its collaborators.

use thiserror::Error;

/// Result type for engine-level operations.
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Errors raised by the workflow engine.
///
/// Stage-level failures are recoverable: the engine converts them into
/// `stage_error` events and substitutes the stage's fallback value. The
/// remaining variants are fatal to the run.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// A stage failed with an unhandled error.
    #[error("stage `{stage}` failed: {message}")]
    Stage { stage: String, message: String },

    /// A stage exceeded its time budget.
    #[error("stage `{stage}` timed out after {seconds}s")]
    StageTimeout { stage: String, seconds: u64 },

    /// The run was cancelled cooperatively.
    #[error("task cancelled")]
    Cancelled,

    /// Durable persistence failed.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// AgentState ownership rules were violated or the state is corrupt.
    #[error("state error: {0}")]
    State(String),

    /// The stage graph is malformed.
    #[error("graph error: {0}")]
    Graph(String),

    /// Unknown task id.
    #[error("task not found: {0}")]
    TaskNotFound(String),
}

impl WorkflowError {
    /// Build a stage error from any displayable cause.
    pub fn stage(stage: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        WorkflowError::Stage {
            stage: stage.into(),
            message: cause.to_string(),
        }
    }

    /// Whether the engine may continue the run after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            WorkflowError::Stage { .. } | WorkflowError::StageTimeout { .. }
        )
    }
}

/// Errors raised by checkpoint stores.
///
/// Defined here so the [`CheckpointStore`](crate::checkpoint::CheckpointStore)
/// trait can live next to the engine that drives it; concrete backends are
/// provided by the `atelier-checkpoint` crate.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("checkpoint not found: {0}")]
    NotFound(String),

    #[error("checkpoint corrupt: {0}")]
    Corrupt(String),
}
