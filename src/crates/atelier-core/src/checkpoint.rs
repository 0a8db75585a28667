//! Checkpoint store seam used by the engine.
//!
//! Concrete backends (atomic file store, in-memory store) live in the
//! `atelier-checkpoint` crate; the engine only depends on this trait.

use crate::error::CheckpointError;
use crate::state::AgentState;
use crate::task::TaskStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-task checkpoint metadata, persisted as `metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub task_id: String,
    pub task_text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_stage: String,
    pub status: TaskStatus,
    pub iteration: u32,
    pub model: String,
}

impl CheckpointMetadata {
    /// Fresh metadata for the first save of a task.
    pub fn initial(task_id: &str, state: &AgentState) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.to_string(),
            task_text: state.task.clone(),
            created_at: now,
            updated_at: now,
            last_stage: String::new(),
            status: TaskStatus::Running,
            iteration: state.iteration(),
            model: state.model.clone(),
        }
    }
}

/// Durable per-task persistence.
///
/// Implementations serialize concurrent saves for the same task and must
/// guarantee that a reader never observes a torn write: after a crash
/// mid-save, `load` returns the prior version.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Atomically persist `state.json` and `metadata.json` for the task.
    async fn save(
        &self,
        task_id: &str,
        state: &AgentState,
        last_stage: &str,
        status: TaskStatus,
    ) -> Result<(), CheckpointError>;

    /// Load the checkpoint, or `None` when the task is unknown.
    async fn load(
        &self,
        task_id: &str,
    ) -> Result<Option<(CheckpointMetadata, AgentState)>, CheckpointError>;

    /// Metadata of tasks with status `running` or `paused`, newest first.
    async fn list_active(&self) -> Result<Vec<CheckpointMetadata>, CheckpointError>;

    /// Metadata of every stored task, newest first.
    async fn list_history(&self) -> Result<Vec<CheckpointMetadata>, CheckpointError>;

    /// Update only the lifecycle status, bumping `updated_at`.
    async fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<(), CheckpointError>;

    /// Remove both files atomically.
    async fn delete(&self, task_id: &str) -> Result<(), CheckpointError>;
}
