//! Code generation stage.

use crate::incremental::{IncrementalRun, IncrementalSettings};
use crate::prompts;
use crate::support::{extract_code, generate_streaming, params_for, shingle_overlap, stage_err};
use atelier_analysis::CodeValidator;
use atelier_core::error::WorkflowError;
use atelier_core::event::LogLevel;
use atelier_core::graph::{StageAgent, StageContext};
use atelier_core::state::AgentState;
use atelier_llm::LlmAdapter;
use atelier_retrieval::{CodeExample, ExampleIndex, ExampleSource};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub const STAGE: &str = "coding";

/// Shingle size for the verbatim-copy guard.
const SHINGLE_K: usize = 5;
/// Maximum tolerated overlap between generated code and any few-shot example.
const MAX_EXAMPLE_OVERLAP: f64 = 0.5;

/// Generates the implementation, single-shot or incrementally.
///
/// Complex tasks with a structured function list go through the incremental
/// coder; everything else is one streamed generation. Few-shot examples come
/// from the retrieval index, and validated output is contributed back under
/// source `history`.
pub struct CoderAgent {
    adapter: Arc<LlmAdapter>,
    index: Option<Arc<ExampleIndex>>,
    validator: Arc<dyn CodeValidator>,
    incremental: IncrementalSettings,
    num_examples: usize,
}

impl CoderAgent {
    pub fn new(
        adapter: Arc<LlmAdapter>,
        index: Option<Arc<ExampleIndex>>,
        validator: Arc<dyn CodeValidator>,
        incremental: IncrementalSettings,
        num_examples: usize,
    ) -> Self {
        Self {
            adapter,
            index,
            validator,
            incremental,
            num_examples,
        }
    }

    async fn few_shot_examples(&self, state: &AgentState) -> Vec<CodeExample> {
        let Some(index) = self.index.as_ref() else {
            return Vec::new();
        };
        index
            .find_similar(
                &state.task,
                self.num_examples,
                &[ExampleSource::Local, ExampleSource::History],
                Some("python"),
            )
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|e| {
                e.relevance_score.unwrap_or(0.0)
                    >= state.options.rag_similarity_threshold as f64
            })
            .collect()
    }

    fn wants_incremental(&self, state: &AgentState) -> bool {
        if !self.incremental.enabled {
            return false;
        }
        let complexity = match state.intent() {
            Some(intent) => intent.complexity,
            None => return false,
        };
        complexity >= self.incremental.min_complexity
            && state.function_specs().is_some_and(|s| !s.is_empty())
    }

    /// Worst overlap of the generated code against any example.
    fn max_overlap(code: &str, examples: &[CodeExample]) -> f64 {
        examples
            .iter()
            .map(|e| shingle_overlap(code, &e.code, SHINGLE_K))
            .fold(0.0, f64::max)
    }
}

#[async_trait]
impl StageAgent for CoderAgent {
    fn name(&self) -> &str {
        STAGE
    }

    async fn execute(
        &self,
        state: &mut AgentState,
        ctx: &StageContext,
    ) -> Result<Value, WorkflowError> {
        let params = params_for(state);
        let tests = state.tests().unwrap_or("").to_string();
        let examples = self.few_shot_examples(state).await;
        let incremental = self.wants_incremental(state);

        let code = if incremental {
            let specs = state.function_specs().unwrap_or_default().to_vec();
            let run = IncrementalRun {
                adapter: self.adapter.as_ref(),
                validator: self.validator.as_ref(),
                emitter: &ctx.emitter,
                params: &params,
                task: state.task.as_str(),
                tests: tests.as_str(),
                max_fix_attempts: self.incremental.max_fix_attempts,
            };
            run.generate(&specs).await?
        } else {
            let plan = state.plan().unwrap_or("").to_string();
            let prompt =
                prompts::code(&state.task, &plan, &tests, state.context(), &examples);
            let response =
                generate_streaming(&self.adapter, &prompt, &params, &ctx.emitter).await?;
            let mut code = extract_code(&response);

            if Self::max_overlap(&code, &examples) > MAX_EXAMPLE_OVERLAP {
                ctx.emitter
                    .log(
                        LogLevel::Warning,
                        "generated code overlaps an example beyond 50%, regenerating",
                    )
                    .await;
                let retry_prompt = format!("{prompt}{}", prompts::no_copy_addendum());
                let response =
                    generate_streaming(&self.adapter, &retry_prompt, &params, &ctx.emitter)
                        .await?;
                let rewritten = extract_code(&response);
                if Self::max_overlap(&rewritten, &examples) <= MAX_EXAMPLE_OVERLAP {
                    code = rewritten;
                } else {
                    ctx.emitter
                        .log(
                            LogLevel::Warning,
                            "rewrite still overlaps an example; keeping the first draft",
                        )
                        .await;
                }
            }
            code
        };

        if code.trim().is_empty() {
            return Err(stage_err(STAGE, "model produced no code"));
        }

        // Validated generations feed the retrieval index as history.
        let verdict = self.validator.quick(&code, &tests).await;
        if verdict.passed {
            if let Some(index) = self.index.as_ref() {
                if let Err(e) = index.add_from_history(&state.task, &code).await {
                    ctx.emitter
                        .log(LogLevel::Warning, format!("history indexing failed: {e}"))
                        .await;
                }
            }
        }

        let lines = code.lines().count();
        state.set_code(code);
        Ok(json!({
            "code_lines": lines,
            "incremental": incremental,
            "examples_used": examples.len(),
        }))
    }

    fn fallback(&self, state: &mut AgentState) {
        state.set_code(String::new());
    }
}
