//! In-memory checkpoint store, for tests and ephemeral deployments.

use atelier_core::checkpoint::{CheckpointMetadata, CheckpointStore};
use atelier_core::error::CheckpointError;
use atelier_core::state::AgentState;
use atelier_core::task::TaskStatus;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Checkpoints held in process memory; nothing survives a restart.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    inner: RwLock<HashMap<String, (CheckpointMetadata, AgentState)>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(
        &self,
        task_id: &str,
        state: &AgentState,
        last_stage: &str,
        status: TaskStatus,
    ) -> Result<(), CheckpointError> {
        let mut inner = self.inner.write();
        let meta = match inner.get(task_id) {
            Some((existing, _)) => CheckpointMetadata {
                updated_at: Utc::now().max(existing.updated_at),
                last_stage: last_stage.to_string(),
                status,
                iteration: state.iteration(),
                model: state.model.clone(),
                ..existing.clone()
            },
            None => {
                let mut meta = CheckpointMetadata::initial(task_id, state);
                meta.last_stage = last_stage.to_string();
                meta.status = status;
                meta
            }
        };
        inner.insert(task_id.to_string(), (meta, state.clone()));
        Ok(())
    }

    async fn load(
        &self,
        task_id: &str,
    ) -> Result<Option<(CheckpointMetadata, AgentState)>, CheckpointError> {
        Ok(self.inner.read().get(task_id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<CheckpointMetadata>, CheckpointError> {
        let mut metas: Vec<CheckpointMetadata> = self
            .inner
            .read()
            .values()
            .filter(|(m, _)| m.status.is_active())
            .map(|(m, _)| m.clone())
            .collect();
        metas.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(metas)
    }

    async fn list_history(&self) -> Result<Vec<CheckpointMetadata>, CheckpointError> {
        let mut metas: Vec<CheckpointMetadata> =
            self.inner.read().values().map(|(m, _)| m.clone()).collect();
        metas.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(metas)
    }

    async fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<(), CheckpointError> {
        let mut inner = self.inner.write();
        match inner.get_mut(task_id) {
            Some((meta, _)) => {
                meta.status = status;
                meta.updated_at = Utc::now().max(meta.updated_at);
                Ok(())
            }
            None => Err(CheckpointError::NotFound(task_id.to_string())),
        }
    }

    async fn delete(&self, task_id: &str) -> Result<(), CheckpointError> {
        self.inner.write().remove(task_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::task::{Task, TaskOptions};

    fn state() -> AgentState {
        let task = Task::new("demo", TaskOptions::default());
        AgentState::for_task(&task, "m", false)
    }

    #[tokio::test]
    async fn basic_lifecycle() {
        let store = InMemoryCheckpointStore::new();
        let s = state();
        store.save("t", &s, "intent", TaskStatus::Running).await.unwrap();
        assert_eq!(store.len(), 1);

        store.set_status("t", TaskStatus::Paused).await.unwrap();
        let (meta, _) = store.load("t").await.unwrap().unwrap();
        assert_eq!(meta.status, TaskStatus::Paused);

        store.delete("t").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn set_status_on_missing_task_errors() {
        let store = InMemoryCheckpointStore::new();
        let err = store.set_status("missing", TaskStatus::Failed).await.unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(_)));
    }
}
