//! Research stage: local examples, optional web search, AST facts.
//!
//! The researcher assembles context without an LLM call. Results are cached
//! by a fingerprint of `(task text, intent kind, web flag)` with a TTL so
//! re-runs of the same task do not redo the lookups.

use crate::web::WebSearch;
use atelier_analysis::{DependencyGraph, PythonAnalyzer};
use atelier_core::domain::IntentKind;
use atelier_core::error::WorkflowError;
use atelier_core::event::{LogLevel, WorkflowEvent};
use atelier_core::graph::{StageAgent, StageContext};
use atelier_core::state::AgentState;
use atelier_retrieval::{ExampleIndex, ExampleSource};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const STAGE: &str = "research";

const CACHE_TTL: Duration = Duration::from_secs(15 * 60);

/// Gathers retrieval examples, web hits, and project structure into the
/// research context string.
pub struct ResearcherAgent {
    index: Option<Arc<ExampleIndex>>,
    web: Arc<dyn WebSearch>,
    project_root: Option<PathBuf>,
    num_examples: usize,
    cache: Mutex<HashMap<u64, (Instant, String)>>,
}

impl ResearcherAgent {
    pub fn new(
        index: Option<Arc<ExampleIndex>>,
        web: Arc<dyn WebSearch>,
        project_root: Option<PathBuf>,
        num_examples: usize,
    ) -> Self {
        Self {
            index,
            web,
            project_root,
            num_examples,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn fingerprint(task: &str, kind: IntentKind, web_disabled: bool) -> u64 {
        let mut hasher = DefaultHasher::new();
        task.hash(&mut hasher);
        kind.hash(&mut hasher);
        web_disabled.hash(&mut hasher);
        hasher.finish()
    }

    fn cached(&self, key: u64) -> Option<String> {
        let cache = self.cache.lock();
        cache
            .get(&key)
            .filter(|(at, _)| at.elapsed() < CACHE_TTL)
            .map(|(_, context)| context.clone())
    }

    async fn local_examples(&self, task: &str, threshold: f32) -> Option<String> {
        let index = self.index.as_ref()?;
        let examples = index
            .find_similar(
                task,
                self.num_examples,
                &[ExampleSource::Local, ExampleSource::History],
                Some("python"),
            )
            .await
            .ok()?;
        let relevant: Vec<_> = examples
            .into_iter()
            .filter(|e| e.relevance_score.unwrap_or(0.0) >= threshold as f64)
            .collect();
        if relevant.is_empty() {
            return None;
        }
        let mut out = String::from("## Similar code from the index\n");
        for example in relevant {
            out.push_str(&format!(
                "### {}\n```python\n{}\n```\n",
                example.description, example.code
            ));
        }
        Some(out)
    }

    fn project_facts(&self) -> Option<String> {
        let root = self.project_root.as_deref()?;
        let analyzer = PythonAnalyzer::new();
        let mut analyses = Vec::new();
        for entry in crate::support::walk_python_files(root) {
            analyses.push(analyzer.analyze_file(&entry));
        }
        if analyses.is_empty() {
            return None;
        }
        let graph = DependencyGraph::from_analyses(analyses.iter());
        let central = graph.important_entities(5);
        if central.is_empty() {
            return None;
        }
        let names: Vec<&str> = central.iter().map(|(n, _)| n.as_str()).collect();
        Some(format!(
            "## Project structure\nCentral entities: {}\n",
            names.join(", ")
        ))
    }
}

fn preview(text: &str) -> String {
    const LIMIT: usize = 80;
    if text.chars().count() <= LIMIT {
        return text.to_string();
    }
    text.chars().take(LIMIT).collect()
}

#[async_trait]
impl StageAgent for ResearcherAgent {
    fn name(&self) -> &str {
        STAGE
    }

    async fn execute(
        &self,
        state: &mut AgentState,
        ctx: &StageContext,
    ) -> Result<Value, WorkflowError> {
        let kind = state
            .intent()
            .map(|i| i.kind)
            .unwrap_or(IntentKind::Create);
        let web_disabled = state.options.disable_web_search;
        let key = Self::fingerprint(&state.task, kind, web_disabled);

        if let Some(context) = self.cached(key) {
            ctx.emitter
                .log(LogLevel::Debug, "research served from cache")
                .await;
            let chars = context.chars().count();
            state.set_context(context)?;
            return Ok(json!({ "context_chars": chars, "cached": true }));
        }

        let mut sections: Vec<String> = Vec::new();

        if let Some(examples) = self
            .local_examples(&state.task, state.options.rag_similarity_threshold)
            .await
        {
            sections.push(examples);
        }

        if !web_disabled {
            let call_id = format!("web-{key:016x}");
            ctx.emitter
                .publish(WorkflowEvent::ToolCallStart {
                    id: call_id.clone(),
                    call_type: "search".to_string(),
                    name: "web_search".to_string(),
                    input_preview: preview(&state.task),
                })
                .await;
            let started = Instant::now();
            let outcome = self
                .web
                .search(&state.task, state.options.web_search_max_results)
                .await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(hits) => {
                    let summary = format!("{} result(s)", hits.len());
                    if !hits.is_empty() {
                        let mut out = String::from("## Web references\n");
                        for hit in hits {
                            out.push_str(&format!(
                                "- {} ({}): {}\n",
                                hit.title, hit.url, hit.snippet
                            ));
                        }
                        sections.push(out);
                    }
                    ctx.emitter
                        .publish(WorkflowEvent::ToolCallEnd {
                            id: call_id,
                            status: "ok".to_string(),
                            duration_ms,
                            output_preview: summary,
                            tokens_in: None,
                            tokens_out: None,
                        })
                        .await;
                }
                Err(e) => {
                    // Web failures degrade the context, they never fail the stage.
                    ctx.emitter
                        .publish(WorkflowEvent::ToolCallEnd {
                            id: call_id,
                            status: "error".to_string(),
                            duration_ms,
                            output_preview: e.to_string(),
                            tokens_in: None,
                            tokens_out: None,
                        })
                        .await;
                    ctx.emitter
                        .log(LogLevel::Warning, format!("web search failed: {e}"))
                        .await;
                }
            }
        }

        if let Some(facts) = self.project_facts() {
            sections.push(facts);
        }

        let context = sections.join("\n");
        self.cache
            .lock()
            .insert(key, (Instant::now(), context.clone()));

        let chars = context.chars().count();
        state.set_context(context)?;
        Ok(json!({ "context_chars": chars, "cached": false }))
    }

    fn fallback(&self, state: &mut AgentState) {
        let _ = state.set_context(String::new());
    }
}
