//! The workflow engine: drives a task through the stage graph.
//!
//! Stages execute strictly sequentially for a given task. After every stage
//! the engine persists a checkpoint and resolves the next edge from the
//! updated state. Stage failures are recoverable (the stage's fallback value
//! is installed and the run continues); checkpoint failures, state
//! corruption, and cancellation are fatal.

use crate::checkpoint::CheckpointStore;
use crate::domain::StageRecord;
use crate::error::WorkflowError;
use crate::event::WorkflowEvent;
use crate::graph::{StageContext, StageGraph, END};
use crate::state::AgentState;
use crate::stream::EventStreamManager;
use crate::task::{Task, TaskStatus};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-stage wall-clock budget.
    pub stage_timeout: Duration,
    /// Stages with a different budget (the debate stage runs several
    /// 180-second rounds).
    pub stage_timeout_overrides: std::collections::HashMap<String, Duration>,
    /// Pause the task when its last stream subscriber disconnects.
    pub auto_pause_on_disconnect: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stage_timeout: Duration::from_secs(120),
            stage_timeout_overrides: std::collections::HashMap::new(),
            auto_pause_on_disconnect: true,
        }
    }
}

impl EngineConfig {
    fn timeout_for(&self, stage: &str) -> Duration {
        self.stage_timeout_overrides
            .get(stage)
            .copied()
            .unwrap_or(self.stage_timeout)
    }
}

enum RunOutcome {
    Finished,
    Cancelled,
    Paused,
    Fatal(WorkflowError),
}

/// Drives tasks through the stage graph.
pub struct WorkflowEngine {
    graph: Arc<StageGraph>,
    events: Arc<EventStreamManager>,
    checkpoints: Arc<dyn CheckpointStore>,
    config: EngineConfig,
    cancels: DashMap<String, watch::Sender<bool>>,
}

impl WorkflowEngine {
    pub fn new(
        graph: Arc<StageGraph>,
        events: Arc<EventStreamManager>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: EngineConfig,
    ) -> Result<Self, WorkflowError> {
        graph.validate()?;
        Ok(Self {
            graph,
            events,
            checkpoints,
            config,
            cancels: DashMap::new(),
        })
    }

    pub fn events(&self) -> &Arc<EventStreamManager> {
        &self.events
    }

    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    /// Spawn a run in the background and return its task id immediately.
    pub fn start_task(self: &Arc<Self>, task: Task, state: AgentState) -> String {
        let task_id = task.id.clone();
        self.events.register(&task_id);
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(error) = engine.run(&task, state).await {
                tracing::error!(task_id = %task.id, %error, "workflow run failed");
            }
        });
        task_id
    }

    /// Request cooperative termination of a running task.
    pub fn cancel(&self, task_id: &str) {
        if let Some(tx) = self.cancels.get(task_id) {
            let _ = tx.send(true);
        }
    }

    /// Drive the task from the entry stage to a terminal event.
    pub async fn run(&self, task: &Task, mut state: AgentState) -> Result<(), WorkflowError> {
        let task_id = task.id.as_str();
        self.events.register(task_id);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.cancels.insert(task_id.to_string(), cancel_tx);

        let initial_save = self
            .checkpoints
            .save(task_id, &state, "", TaskStatus::Running)
            .await;
        let outcome = match initial_save {
            Ok(()) => {
                let mut current = self.graph.entry().to_string();
                self.drive(task_id, &mut state, &mut current, cancel_rx)
                    .await
            }
            Err(e) => RunOutcome::Fatal(e.into()),
        };
        self.cancels.remove(task_id);

        match outcome {
            RunOutcome::Finished => {
                let succeeded = state.validation().map(|v| v.all_passed).unwrap_or(true);
                let status = if succeeded {
                    TaskStatus::Completed
                } else {
                    TaskStatus::Failed
                };
                let last_stage = state
                    .stage_log()
                    .last()
                    .map(|r| r.stage.clone())
                    .unwrap_or_default();
                self.checkpoints
                    .save(task_id, &state, &last_stage, status)
                    .await?;

                let mut results = state.results();
                results["success"] = json!(succeeded);
                self.events
                    .publish(task_id, WorkflowEvent::FinalResult { results })
                    .await;
                self.events.close(task_id);
                Ok(())
            }
            RunOutcome::Cancelled => {
                // The stage's partial output is not committed; the last
                // successful checkpoint remains authoritative.
                let _ = self
                    .checkpoints
                    .set_status(task_id, TaskStatus::Paused)
                    .await;
                self.events
                    .publish(
                        task_id,
                        WorkflowEvent::WorkflowError {
                            error: "task cancelled".to_string(),
                        },
                    )
                    .await;
                self.events.close(task_id);
                Ok(())
            }
            RunOutcome::Paused => {
                let _ = self
                    .checkpoints
                    .set_status(task_id, TaskStatus::Paused)
                    .await;
                self.events.close(task_id);
                Ok(())
            }
            RunOutcome::Fatal(error) => {
                let _ = self
                    .checkpoints
                    .set_status(task_id, TaskStatus::Failed)
                    .await;
                self.events
                    .publish(
                        task_id,
                        WorkflowEvent::WorkflowError {
                            error: error.to_string(),
                        },
                    )
                    .await;
                self.events.close(task_id);
                Err(error)
            }
        }
    }

    async fn drive(
        &self,
        task_id: &str,
        state: &mut AgentState,
        current: &mut String,
        cancel_rx: watch::Receiver<bool>,
    ) -> RunOutcome {
        loop {
            if *cancel_rx.borrow() {
                return RunOutcome::Cancelled;
            }

            let Some(agent) = self.graph.agent(current) else {
                return RunOutcome::Fatal(WorkflowError::Graph(format!(
                    "stage `{current}` is not registered"
                )));
            };

            self.events
                .publish(
                    task_id,
                    WorkflowEvent::StageStart {
                        stage: current.clone(),
                        message: format!("Running stage `{current}`"),
                    },
                )
                .await;

            let ctx = StageContext::new(
                self.events.emitter(task_id, current),
                cancel_rx.clone(),
            );
            let mut cancel = cancel_rx.clone();
            let stage_budget = self.config.timeout_for(current);
            let stage_outcome = tokio::select! {
                _ = cancel.changed() => None,
                res = tokio::time::timeout(stage_budget, agent.execute(state, &ctx)) => {
                    Some(res)
                }
            };

            let summary: Option<Value> = match stage_outcome {
                None => return RunOutcome::Cancelled,
                Some(Err(_elapsed)) => {
                    let error = WorkflowError::StageTimeout {
                        stage: current.clone(),
                        seconds: stage_budget.as_secs(),
                    };
                    self.fail_stage(task_id, current, state, agent.as_ref(), &error)
                        .await;
                    None
                }
                Some(Ok(Err(error))) if error.is_recoverable() => {
                    self.fail_stage(task_id, current, state, agent.as_ref(), &error)
                        .await;
                    None
                }
                Some(Ok(Err(error))) => return RunOutcome::Fatal(error),
                Some(Ok(Ok(summary))) => Some(summary),
            };

            if let Some(summary) = summary {
                self.events
                    .publish(
                        task_id,
                        WorkflowEvent::StageEnd {
                            stage: current.clone(),
                            result: summary.clone(),
                        },
                    )
                    .await;
                state.record_stage(StageRecord {
                    stage: current.clone(),
                    result: summary,
                    completed_at: Utc::now(),
                    error: None,
                });
            }

            if let Err(e) = self
                .checkpoints
                .save(task_id, state, current, TaskStatus::Running)
                .await
            {
                return RunOutcome::Fatal(e.into());
            }

            if self.config.auto_pause_on_disconnect
                && state.enable_sse
                && self.events.subscriber_lost(task_id)
            {
                tracing::info!(task_id, stage = %current, "subscriber lost, pausing task");
                return RunOutcome::Paused;
            }

            let next = match self.graph.next_stage(current, state) {
                Ok(next) => next,
                Err(e) => return RunOutcome::Fatal(e),
            };
            if next == END {
                return RunOutcome::Finished;
            }
            *current = next;
        }
    }

    async fn fail_stage(
        &self,
        task_id: &str,
        stage: &str,
        state: &mut AgentState,
        agent: &dyn crate::graph::StageAgent,
        error: &WorkflowError,
    ) {
        tracing::warn!(task_id, stage, %error, "stage failed, applying fallback");
        self.events
            .publish(
                task_id,
                WorkflowEvent::StageError {
                    stage: stage.to_string(),
                    error: error.to_string(),
                },
            )
            .await;
        agent.fallback(state);
        state.record_stage(StageRecord {
            stage: stage.to_string(),
            result: Value::Null,
            completed_at: Utc::now(),
            error: Some(error.to_string()),
        });
    }

    /// Replay a checkpointed task's recorded stage events.
    ///
    /// Prior stages are not re-executed: the stage log is replayed as
    /// synthetic `stage_start`/`stage_end` pairs, followed by the terminal
    /// event the checkpoint status implies.
    pub async fn resume(&self, task_id: &str) -> Result<(), WorkflowError> {
        let Some((meta, state)) = self.checkpoints.load(task_id).await? else {
            return Err(WorkflowError::TaskNotFound(task_id.to_string()));
        };

        self.events.register(task_id);
        for record in state.stage_log() {
            self.events
                .publish(
                    task_id,
                    WorkflowEvent::StageStart {
                        stage: record.stage.clone(),
                        message: format!("Replaying stage `{}`", record.stage),
                    },
                )
                .await;
            match &record.error {
                Some(error) => {
                    self.events
                        .publish(
                            task_id,
                            WorkflowEvent::StageError {
                                stage: record.stage.clone(),
                                error: error.clone(),
                            },
                        )
                        .await;
                }
                None => {
                    self.events
                        .publish(
                            task_id,
                            WorkflowEvent::StageEnd {
                                stage: record.stage.clone(),
                                result: record.result.clone(),
                            },
                        )
                        .await;
                }
            }
        }

        if meta.status == TaskStatus::Failed && state.reflection().is_none() {
            self.events
                .publish(
                    task_id,
                    WorkflowEvent::WorkflowError {
                        error: format!("task failed at stage `{}`", meta.last_stage),
                    },
                )
                .await;
        } else {
            let mut results = state.results();
            results["status"] = serde_json::to_value(meta.status)
                .map_err(|e| WorkflowError::State(e.to_string()))?;
            results["success"] = json!(meta.status == TaskStatus::Completed);
            self.events
                .publish(task_id, WorkflowEvent::FinalResult { results })
                .await;
        }
        self.events.close(task_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointMetadata;
    use crate::error::CheckpointError;
    use crate::graph::StageAgent;
    use crate::task::TaskOptions;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemStore {
        inner: Mutex<HashMap<String, (CheckpointMetadata, AgentState)>>,
    }

    #[async_trait]
    impl CheckpointStore for MemStore {
        async fn save(
            &self,
            task_id: &str,
            state: &AgentState,
            last_stage: &str,
            status: TaskStatus,
        ) -> Result<(), CheckpointError> {
            let mut inner = self.inner.lock();
            let meta = match inner.get(task_id) {
                Some((existing, _)) => CheckpointMetadata {
                    updated_at: Utc::now(),
                    last_stage: last_stage.to_string(),
                    status,
                    iteration: state.iteration(),
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
            Ok(self.inner.lock().get(task_id).cloned())
        }

        async fn list_active(&self) -> Result<Vec<CheckpointMetadata>, CheckpointError> {
            Ok(self
                .inner
                .lock()
                .values()
                .filter(|(m, _)| m.status.is_active())
                .map(|(m, _)| m.clone())
                .collect())
        }

        async fn list_history(&self) -> Result<Vec<CheckpointMetadata>, CheckpointError> {
            Ok(self.inner.lock().values().map(|(m, _)| m.clone()).collect())
        }

        async fn set_status(
            &self,
            task_id: &str,
            status: TaskStatus,
        ) -> Result<(), CheckpointError> {
            let mut inner = self.inner.lock();
            match inner.get_mut(task_id) {
                Some((meta, _)) => {
                    meta.status = status;
                    meta.updated_at = Utc::now();
                    Ok(())
                }
                None => Err(CheckpointError::NotFound(task_id.to_string())),
            }
        }

        async fn delete(&self, task_id: &str) -> Result<(), CheckpointError> {
            self.inner.lock().remove(task_id);
            Ok(())
        }
    }

    struct PlanStage;

    #[async_trait]
    impl StageAgent for PlanStage {
        fn name(&self) -> &str {
            "planning"
        }

        async fn execute(
            &self,
            state: &mut AgentState,
            _ctx: &StageContext,
        ) -> Result<Value, WorkflowError> {
            state.set_plan("1. do the thing".into())?;
            Ok(json!({"plan": "1. do the thing"}))
        }
    }

    struct CodeStage;

    #[async_trait]
    impl StageAgent for CodeStage {
        fn name(&self) -> &str {
            "coding"
        }

        async fn execute(
            &self,
            state: &mut AgentState,
            _ctx: &StageContext,
        ) -> Result<Value, WorkflowError> {
            state.set_code("print('ok')".into());
            Ok(json!({"code": "print('ok')"}))
        }
    }

    struct FailingStage;

    #[async_trait]
    impl StageAgent for FailingStage {
        fn name(&self) -> &str {
            "planning"
        }

        async fn execute(
            &self,
            _state: &mut AgentState,
            _ctx: &StageContext,
        ) -> Result<Value, WorkflowError> {
            Err(WorkflowError::stage("planning", "model unreachable"))
        }

        fn fallback(&self, state: &mut AgentState) {
            state.replace_empty_plan("fallback plan".into());
        }
    }

    struct SlowStage;

    #[async_trait]
    impl StageAgent for SlowStage {
        fn name(&self) -> &str {
            "coding"
        }

        async fn execute(
            &self,
            _state: &mut AgentState,
            _ctx: &StageContext,
        ) -> Result<Value, WorkflowError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Value::Null)
        }
    }

    fn two_stage_engine(store: Arc<MemStore>) -> Arc<WorkflowEngine> {
        let mut graph = StageGraph::new("planning");
        graph.add_stage(Arc::new(PlanStage));
        graph.add_stage(Arc::new(CodeStage));
        graph.add_edge("planning", "coding");
        graph.add_edge("coding", END);
        Arc::new(
            WorkflowEngine::new(
                Arc::new(graph),
                Arc::new(EventStreamManager::new()),
                store,
                EngineConfig::default(),
            )
            .unwrap(),
        )
    }

    async fn collect_events(
        mut rx: tokio::sync::mpsc::Receiver<WorkflowEvent>,
    ) -> Vec<WorkflowEvent> {
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            let terminal = ev.is_terminal();
            events.push(ev);
            if terminal {
                break;
            }
        }
        events
    }

    #[tokio::test]
    async fn run_emits_ordered_events_and_completes() {
        let store = Arc::new(MemStore::default());
        let engine = two_stage_engine(store.clone());
        let task = Task::new("demo", TaskOptions::default());
        let rx = engine.events().subscribe(&task.id);
        let state = AgentState::for_task(&task, "m", false);

        engine.run(&task, state).await.unwrap();
        let events = collect_events(rx).await;

        let kinds: Vec<&str> = events.iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                "stage_start",
                "stage_end",
                "stage_start",
                "stage_end",
                "final_result"
            ]
        );

        let (meta, state) = store.load(&task.id).await.unwrap().unwrap();
        assert_eq!(meta.status, TaskStatus::Completed);
        assert_eq!(meta.last_stage, "coding");
        assert_eq!(state.stage_log().len(), 2);
    }

    #[tokio::test]
    async fn stage_error_applies_fallback_and_continues() {
        let store = Arc::new(MemStore::default());
        let mut graph = StageGraph::new("planning");
        graph.add_stage(Arc::new(FailingStage));
        graph.add_stage(Arc::new(CodeStage));
        graph.add_edge("planning", "coding");
        graph.add_edge("coding", END);
        let engine = Arc::new(
            WorkflowEngine::new(
                Arc::new(graph),
                Arc::new(EventStreamManager::new()),
                store.clone(),
                EngineConfig::default(),
            )
            .unwrap(),
        );

        let task = Task::new("demo", TaskOptions::default());
        let rx = engine.events().subscribe(&task.id);
        let state = AgentState::for_task(&task, "m", false);
        engine.run(&task, state).await.unwrap();

        let events = collect_events(rx).await;
        let kinds: Vec<&str> = events.iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                "stage_start",
                "stage_error",
                "stage_start",
                "stage_end",
                "final_result"
            ]
        );

        let (_, state) = store.load(&task.id).await.unwrap().unwrap();
        assert_eq!(state.plan(), Some("fallback plan"));
        assert!(state.stage_log()[0].error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn stage_timeout_is_recoverable() {
        let store = Arc::new(MemStore::default());
        let mut graph = StageGraph::new("coding");
        graph.add_stage(Arc::new(SlowStage));
        graph.add_edge("coding", END);
        let engine = Arc::new(
            WorkflowEngine::new(
                Arc::new(graph),
                Arc::new(EventStreamManager::new()),
                store.clone(),
                EngineConfig {
                    stage_timeout: Duration::from_millis(50),
                    ..Default::default()
                },
            )
            .unwrap(),
        );

        let task = Task::new("demo", TaskOptions::default());
        let rx = engine.events().subscribe(&task.id);
        let state = AgentState::for_task(&task, "m", false);
        engine.run(&task, state).await.unwrap();

        let events = collect_events(rx).await;
        assert!(events.iter().any(|e| e.kind() == "stage_error"));
        assert!(events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn cancel_marks_checkpoint_paused() {
        let store = Arc::new(MemStore::default());
        let mut graph = StageGraph::new("coding");
        graph.add_stage(Arc::new(SlowStage));
        graph.add_edge("coding", END);
        let engine = Arc::new(
            WorkflowEngine::new(
                Arc::new(graph),
                Arc::new(EventStreamManager::new()),
                store.clone(),
                EngineConfig::default(),
            )
            .unwrap(),
        );

        let task = Task::new("demo", TaskOptions::default());
        let rx = engine.events().subscribe(&task.id);
        let state = AgentState::for_task(&task, "m", false);
        let task_id = engine.start_task(task, state);

        // Let the stage start, then cancel.
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.cancel(&task_id);

        let events = collect_events(rx).await;
        match events.last().unwrap() {
            WorkflowEvent::WorkflowError { error } => assert!(error.contains("cancelled")),
            other => panic!("unexpected terminal event {other:?}"),
        }

        let (meta, _) = store.load(&task_id).await.unwrap().unwrap();
        assert_eq!(meta.status, TaskStatus::Paused);
    }

    #[tokio::test]
    async fn resume_replays_recorded_stages() {
        let store = Arc::new(MemStore::default());
        let engine = two_stage_engine(store.clone());
        let task = Task::new("demo", TaskOptions::default());
        let state = AgentState::for_task(&task, "m", false);
        engine.run(&task, state).await.unwrap();

        let rx = engine.events().subscribe(&task.id);
        engine.resume(&task.id).await.unwrap();
        let events = collect_events(rx).await;

        let kinds: Vec<&str> = events.iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                "stage_start",
                "stage_end",
                "stage_start",
                "stage_end",
                "final_result"
            ]
        );
        match events.last().unwrap() {
            WorkflowEvent::FinalResult { results } => {
                assert_eq!(results["success"], json!(true));
            }
            other => panic!("unexpected terminal event {other:?}"),
        }
    }

    #[tokio::test]
    async fn resume_unknown_task_errors() {
        let store = Arc::new(MemStore::default());
        let engine = two_stage_engine(store);
        let err = engine.resume("missing").await.unwrap_err();
        assert!(matches!(err, WorkflowError::TaskNotFound(_)));
    }
}
