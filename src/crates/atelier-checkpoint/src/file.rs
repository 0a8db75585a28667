//! File-backed checkpoint store.
//!
//! Layout: one directory per task under the store root, holding
//! `metadata.json` and `state.json`. Writes go to a temp file in the same
//! directory and are renamed into place, so a crash mid-write leaves the
//! prior version intact. Metadata is written last and acts as the commit
//! point for readers.

use atelier_core::checkpoint::{CheckpointMetadata, CheckpointStore};
use atelier_core::error::CheckpointError;
use atelier_core::state::AgentState;
use atelier_core::task::TaskStatus;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const METADATA_FILE: &str = "metadata.json";
const STATE_FILE: &str = "state.json";

/// Checkpoints persisted as JSON files under a root directory.
pub struct FileCheckpointStore {
    root: PathBuf,
    // Serializes concurrent saves per task.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FileCheckpointStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            locks: DashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn task_dir(&self, task_id: &str) -> Result<PathBuf, CheckpointError> {
        validate_task_id(task_id)?;
        Ok(self.root.join(task_id))
    }

    fn lock_for(&self, task_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(task_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn read_metadata(dir: &Path) -> Result<Option<CheckpointMetadata>, CheckpointError> {
        let path = dir.join(METADATA_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let meta = serde_json::from_slice(&bytes).map_err(|e| {
                    CheckpointError::Corrupt(format!("{}: {e}", path.display()))
                })?;
                Ok(Some(meta))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<(), CheckpointError> {
        let tmp = dir.join(format!(".{name}.tmp"));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, dir.join(name)).await?;
        Ok(())
    }

    async fn list_metadata(&self) -> Result<Vec<CheckpointMetadata>, CheckpointError> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut metas = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match Self::read_metadata(&entry.path()).await {
                Ok(Some(meta)) => metas.push(meta),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), %e, "skipping unreadable checkpoint");
                }
            }
        }
        metas.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(metas)
    }

    /// Remove checkpoints older than `ttl`, except running tasks.
    pub async fn sweep(&self, ttl: Duration) -> Result<usize, CheckpointError> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(ttl)
                .map_err(|e| CheckpointError::Corrupt(format!("bad TTL: {e}")))?;
        let mut removed = 0;
        for meta in self.list_metadata().await? {
            if meta.status != TaskStatus::Running && meta.updated_at < cutoff {
                self.delete(&meta.task_id).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, "swept expired checkpoints");
        }
        Ok(removed)
    }

    /// Spawn the periodic sweeper; the handle aborts it on drop by the caller.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        ttl: Duration,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = store.sweep(ttl).await {
                    tracing::warn!(%e, "checkpoint sweep failed");
                }
            }
        })
    }
}

fn validate_task_id(task_id: &str) -> Result<(), CheckpointError> {
    let ok = !task_id.is_empty()
        && task_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(CheckpointError::Corrupt(format!(
            "invalid task id `{task_id}`"
        )))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(
        &self,
        task_id: &str,
        state: &AgentState,
        last_stage: &str,
        status: TaskStatus,
    ) -> Result<(), CheckpointError> {
        let dir = self.task_dir(task_id)?;
        let lock = self.lock_for(task_id);
        let _guard = lock.lock().await;

        tokio::fs::create_dir_all(&dir).await?;

        let now = Utc::now();
        let meta = match Self::read_metadata(&dir).await? {
            Some(existing) => CheckpointMetadata {
                // updated_at is monotone even across clock hiccups.
                updated_at: now.max(existing.updated_at),
                last_stage: last_stage.to_string(),
                status,
                iteration: state.iteration(),
                model: state.model.clone(),
                ..existing
            },
            None => {
                let mut meta = CheckpointMetadata::initial(task_id, state);
                meta.last_stage = last_stage.to_string();
                meta.status = status;
                meta
            }
        };

        let state_bytes = serde_json::to_vec_pretty(state)?;
        let meta_bytes = serde_json::to_vec_pretty(&meta)?;
        Self::write_atomic(&dir, STATE_FILE, &state_bytes).await?;
        Self::write_atomic(&dir, METADATA_FILE, &meta_bytes).await?;
        Ok(())
    }

    async fn load(
        &self,
        task_id: &str,
    ) -> Result<Option<(CheckpointMetadata, AgentState)>, CheckpointError> {
        let dir = self.task_dir(task_id)?;
        let Some(meta) = Self::read_metadata(&dir).await? else {
            return Ok(None);
        };
        let state_path = dir.join(STATE_FILE);
        let bytes = tokio::fs::read(&state_path).await?;
        let state = serde_json::from_slice(&bytes)
            .map_err(|e| CheckpointError::Corrupt(format!("{}: {e}", state_path.display())))?;
        Ok(Some((meta, state)))
    }

    async fn list_active(&self) -> Result<Vec<CheckpointMetadata>, CheckpointError> {
        Ok(self
            .list_metadata()
            .await?
            .into_iter()
            .filter(|m| m.status.is_active())
            .collect())
    }

    async fn list_history(&self) -> Result<Vec<CheckpointMetadata>, CheckpointError> {
        self.list_metadata().await
    }

    async fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<(), CheckpointError> {
        let dir = self.task_dir(task_id)?;
        let lock = self.lock_for(task_id);
        let _guard = lock.lock().await;

        let Some(mut meta) = Self::read_metadata(&dir).await? else {
            return Err(CheckpointError::NotFound(task_id.to_string()));
        };
        meta.status = status;
        meta.updated_at = Utc::now().max(meta.updated_at);
        let bytes = serde_json::to_vec_pretty(&meta)?;
        Self::write_atomic(&dir, METADATA_FILE, &bytes).await
    }

    async fn delete(&self, task_id: &str) -> Result<(), CheckpointError> {
        let dir = self.task_dir(task_id)?;
        let lock = self.lock_for(task_id);
        let _guard = lock.lock().await;

        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                self.locks.remove(task_id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
