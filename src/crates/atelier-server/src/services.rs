//! Process-wide service wiring.
//!
//! Everything shared across requests is created once on startup: the LLM
//! adapter, the validator toolchain, the retrieval index, the checkpoint
//! store with its sweeper, the event stream manager, and the workflow
//! engine. Shutdown flushes nothing but aborts the background tasks — the
//! checkpointer persists as it goes.

use crate::config::Config;
use crate::conversations::{ConversationStore, Role};
use crate::metrics::MetricsRegistry;
use atelier_agents::{
    build_workflow, stage_timeout_overrides, DebateSettings, DisabledWebSearch,
    IncrementalSettings, SearxSearch, WebSearch, WorkflowServices, WorkflowSettings,
};
use atelier_analysis::{QuickValidator, ToolValidator};
use atelier_checkpoint::{FileCheckpointStore, InMemoryCheckpointStore};
use atelier_core::checkpoint::CheckpointStore;
use atelier_core::engine::{EngineConfig, WorkflowEngine};
use atelier_core::event::WorkflowEvent;
use atelier_core::state::AgentState;
use atelier_core::stream::EventStreamManager;
use atelier_core::task::{Task, TaskOptions};
use atelier_llm::{AdapterConfig, LlmAdapter, LlmConfig, OllamaClient, StructuredOutputConfig};
use atelier_retrieval::{ExampleIndex, IndexConfig, InMemoryVectorStore, OllamaEmbedder};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared application state.
pub struct AppServices {
    pub config: Config,
    pub engine: Arc<WorkflowEngine>,
    pub adapter: Arc<LlmAdapter>,
    pub index: Option<Arc<ExampleIndex>>,
    pub conversations: Arc<ConversationStore>,
    pub metrics: Arc<MetricsRegistry>,
    background: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl AppServices {
    pub async fn initialize(config: Config) -> anyhow::Result<Arc<Self>> {
        let mut background = Vec::new();

        let client = OllamaClient::new(
            LlmConfig::new(&config.llm.base_url, &config.default.default_model)
                .with_timeout(Duration::from_secs(config.llm.call_timeout_secs.max(1) * 2)),
        )?;
        let adapter = Arc::new(LlmAdapter::new(
            Arc::new(client),
            AdapterConfig {
                max_inflight: config.llm.max_inflight,
                call_timeout: Duration::from_secs(config.llm.call_timeout_secs),
                ..Default::default()
            },
            StructuredOutputConfig {
                enabled: config.structured_output.enabled,
                max_retries: config.structured_output.max_retries,
                fallback_to_manual_parsing: config.structured_output.fallback_to_manual_parsing,
            },
        ));

        let quick = QuickValidator::new(
            "python3",
            Duration::from_millis(config.incremental_coding.validation_timeout.max(100)),
        );
        let validator = Arc::new(ToolValidator::new(
            "python3",
            quick,
            Duration::from_secs(30),
        ));

        let index = if config.code_retrieval.enabled {
            let embedder = OllamaEmbedder::new(
                &config.llm.base_url,
                &config.code_retrieval.embedding_model,
            )?;
            let index = Arc::new(ExampleIndex::new(
                Arc::new(embedder),
                Arc::new(InMemoryVectorStore::new()),
                IndexConfig {
                    min_quality: config.code_retrieval.min_quality,
                    reindex_interval: Duration::from_secs(
                        config.code_retrieval.reindex_interval.max(1) * 60,
                    ),
                },
            ));
            if !config.code_retrieval.project_root.is_empty() {
                let root = PathBuf::from(&config.code_retrieval.project_root);
                match index.index_project(&root).await {
                    Ok(count) => tracing::info!(count, "indexed project examples"),
                    Err(e) => tracing::warn!(%e, "initial project indexing failed"),
                }
                background.push(index.spawn_reindexer(root));
            }
            Some(index)
        } else {
            None
        };

        let checkpoints: Arc<dyn CheckpointStore> = if config.persistence.enabled {
            let store = Arc::new(
                FileCheckpointStore::open(&config.persistence.checkpoint_directory).await?,
            );
            background.push(store.spawn_sweeper(
                Duration::from_secs(config.persistence.max_checkpoint_age_hours.max(1) * 3600),
                Duration::from_secs(15 * 60),
            ));
            store
        } else {
            Arc::new(InMemoryCheckpointStore::new())
        };

        let web: Arc<dyn WebSearch> = match std::env::var("ATELIER_SEARX_URL") {
            Ok(url) if config.default.enable_web => Arc::new(SearxSearch::new(url)?),
            _ => Arc::new(DisabledWebSearch),
        };

        let project_root = (!config.code_retrieval.project_root.is_empty())
            .then(|| PathBuf::from(&config.code_retrieval.project_root));
        let graph = build_workflow(
            WorkflowServices {
                adapter: adapter.clone(),
                validator,
                index: index.clone(),
                web,
            },
            WorkflowSettings {
                incremental: IncrementalSettings {
                    enabled: config.incremental_coding.enabled,
                    min_complexity: config.incremental_coding.min_complexity,
                    max_fix_attempts: config.incremental_coding.max_fix_attempts,
                },
                debate_enabled: config.multi_agent_debate.enabled,
                debate_min_complexity: config.multi_agent_debate.min_complexity,
                debate: DebateSettings {
                    reviewers: config.multi_agent_debate.reviewers.clone(),
                    max_rounds: config.multi_agent_debate.max_rounds,
                    reviewer_model: (!config.multi_agent_debate.reviewer_model.is_empty())
                        .then(|| config.multi_agent_debate.reviewer_model.clone()),
                },
                num_examples: config.code_retrieval.num_examples,
                project_root,
            },
        );

        let engine = Arc::new(WorkflowEngine::new(
            Arc::new(graph),
            Arc::new(EventStreamManager::new()),
            checkpoints,
            EngineConfig {
                stage_timeout_overrides: stage_timeout_overrides(),
                auto_pause_on_disconnect: config.persistence.auto_pause_on_disconnect,
                ..Default::default()
            },
        )?);

        Ok(Arc::new(Self {
            config,
            engine,
            adapter,
            index,
            conversations: Arc::new(ConversationStore::new()),
            metrics: Arc::new(MetricsRegistry::new()),
            background: Mutex::new(background),
        }))
    }

    /// Submit a task: resolve defaults, attach a conversation, spawn the
    /// run and its observer, return the task id.
    pub fn start_task(
        self: &Arc<Self>,
        prompt: String,
        mut options: TaskOptions,
        conversation_id: Option<String>,
    ) -> String {
        if options.temperature.is_none() {
            options.temperature = Some(self.config.default.temperature);
        }
        if !self.config.default.enable_web {
            options.disable_web_search = true;
        }
        let model = options
            .model
            .clone()
            .unwrap_or_else(|| self.config.default.default_model.clone());

        let conversation_id = match conversation_id {
            Some(id) => {
                self.conversations.append(&id, Role::User, prompt.clone());
                id
            }
            None => self.conversations.create(&prompt).id,
        };

        let mut task = Task::new(prompt, options.normalized());
        task = task.with_conversation(conversation_id);
        let state = AgentState::for_task(&task, model, true);

        self.spawn_observer(&task.id, task.conversation_id.clone());
        self.engine.start_task(task, state)
    }

    /// Per-task observer: folds stage timings into the metrics registry,
    /// contributes successful runs to the retrieval memory, and appends the
    /// assistant's reply to the conversation.
    fn spawn_observer(self: &Arc<Self>, task_id: &str, conversation_id: Option<String>) {
        self.engine.events().register(task_id);
        let mut rx = self.engine.events().subscribe_observer(task_id);
        let services = Arc::clone(self);
        let task_id = task_id.to_string();
        let started = Instant::now();
        let handle = tokio::spawn(async move {
            let mut stage_started: HashMap<String, Instant> = HashMap::new();
            while let Some(event) = rx.recv().await {
                match &event {
                    WorkflowEvent::StageStart { stage, .. } => {
                        stage_started.insert(stage.clone(), Instant::now());
                    }
                    WorkflowEvent::StageEnd { stage, .. }
                    | WorkflowEvent::StageError { stage, .. } => {
                        let duration = stage_started
                            .remove(stage)
                            .map(|at| at.elapsed().as_millis() as u64)
                            .unwrap_or(0);
                        let errored = matches!(&event, WorkflowEvent::StageError { .. });
                        services.metrics.record_stage(stage, duration, errored);
                    }
                    WorkflowEvent::FinalResult { results } => {
                        let success = results["success"].as_bool().unwrap_or(false);
                        let iterations = results["iteration"].as_u64().unwrap_or(0) as u32;
                        services.metrics.record_generation(
                            success,
                            started.elapsed().as_millis() as u64,
                            iterations,
                        );

                        if success {
                            services.contribute_memory(results).await;
                            services.write_output(&task_id, results).await;
                        }
                        if let Some(id) = &conversation_id {
                            let reply = results["greeting_message"]
                                .as_str()
                                .or_else(|| results["code"].as_str())
                                .unwrap_or("(no output)");
                            services.conversations.append(id, Role::Assistant, reply);
                        }
                        break;
                    }
                    WorkflowEvent::WorkflowError { error } => {
                        services.metrics.record_generation(
                            false,
                            started.elapsed().as_millis() as u64,
                            0,
                        );
                        if let Some(id) = &conversation_id {
                            services.conversations.append(
                                id,
                                Role::System,
                                format!("task failed: {error}"),
                            );
                        }
                        break;
                    }
                    _ => {}
                }
            }
        });
        self.background.lock().push(handle);
    }

    /// Success-case contribution to the retrieval index (source `history`).
    async fn contribute_memory(&self, results: &serde_json::Value) {
        let Some(index) = self.index.as_ref() else {
            return;
        };
        let all_passed = results["validation_results"]["all_passed"]
            .as_bool()
            .unwrap_or(false);
        let (Some(task_text), Some(code)) =
            (results["task"].as_str(), results["code"].as_str())
        else {
            return;
        };
        if all_passed && !code.trim().is_empty() {
            if let Err(e) = index.add_from_history(task_text, code).await {
                tracing::warn!(%e, "memory contribution failed");
            }
        }
    }

    /// Persist a successful generation under the configured output dir.
    async fn write_output(&self, task_id: &str, results: &serde_json::Value) {
        let dir = self.config.default.output_dir.trim();
        if dir.is_empty() {
            return;
        }
        let Some(code) = results["code"].as_str().filter(|c| !c.trim().is_empty()) else {
            return;
        };
        let dir = PathBuf::from(dir);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            tracing::warn!(%e, "output dir creation failed");
            return;
        }
        let path = dir.join(format!("{task_id}.py"));
        let mut contents = code.to_string();
        if let Some(tests) = results["tests"].as_str().filter(|t| !t.trim().is_empty()) {
            contents.push_str("\n\n# --- tests ---\n");
            contents.push_str(tests);
        }
        if let Err(e) = tokio::fs::write(&path, contents).await {
            tracing::warn!(%e, path = %path.display(), "writing output failed");
        }
    }

    /// Abort background tasks; called on graceful shutdown.
    pub fn shutdown(&self) {
        for handle in self.background.lock().drain(..) {
            handle.abort();
        }
        tracing::info!("services shut down");
    }
}
