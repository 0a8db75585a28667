//! Planning stage.

use crate::prompts;
use crate::support::{params_for, stage_err};
use atelier_core::domain::{specs_topologically_ordered, FunctionSpec, IntentResult};
use atelier_core::error::WorkflowError;
use atelier_core::event::LogLevel;
use atelier_core::graph::{StageAgent, StageContext};
use atelier_core::state::AgentState;
use atelier_llm::LlmAdapter;
use atelier_retrieval::{ExampleIndex, ExampleSource};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

pub const STAGE: &str = "planning";

#[derive(Debug, Deserialize)]
struct StructuredPlan {
    plan: String,
    #[serde(default)]
    functions: Vec<FunctionSpec>,
}

/// Produces the plan text and, when structured output holds, the ordered
/// function list driving incremental generation.
pub struct PlannerAgent {
    adapter: Arc<LlmAdapter>,
    index: Option<Arc<ExampleIndex>>,
}

impl PlannerAgent {
    pub fn new(adapter: Arc<LlmAdapter>, index: Option<Arc<ExampleIndex>>) -> Self {
        Self { adapter, index }
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "plan": {"type": "string"},
                "functions": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": {"type": "string"},
                            "signature": {"type": "string"},
                            "description": {"type": "string"},
                            "dependencies": {"type": "array", "items": {"type": "string"}}
                        },
                        "required": ["name", "signature", "description"]
                    }
                }
            },
            "required": ["plan"]
        })
    }

    async fn reference_snippets(&self, state: &AgentState) -> Option<String> {
        let index = self.index.as_ref()?;
        let examples = index
            .find_similar(&state.task, 2, &[ExampleSource::Local, ExampleSource::History], Some("python"))
            .await
            .ok()?;
        if examples.is_empty() {
            return None;
        }
        let mut out = String::from("Similar known implementations:\n");
        for example in examples {
            out.push_str(&format!("- {}\n", example.description));
        }
        Some(out)
    }
}

#[async_trait]
impl StageAgent for PlannerAgent {
    fn name(&self) -> &str {
        STAGE
    }

    async fn execute(
        &self,
        state: &mut AgentState,
        ctx: &StageContext,
    ) -> Result<Value, WorkflowError> {
        let intent = state
            .intent()
            .cloned()
            .unwrap_or_else(IntentResult::fallback);
        let snippets = self.reference_snippets(state).await;
        let prompt = prompts::plan(&state.task, &intent, snippets.as_deref());
        let params = params_for(state);

        let structured: StructuredPlan = self
            .adapter
            .generate_with_fallback(&prompt, &Self::schema(), &params, |text| {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then(|| StructuredPlan {
                    plan: trimmed.to_string(),
                    functions: Vec::new(),
                })
            })
            .await
            .map_err(|e| stage_err(STAGE, e))?;

        let mut function_count = 0;
        if !structured.functions.is_empty() {
            if specs_topologically_ordered(&structured.functions) {
                function_count = structured.functions.len();
                state.set_function_specs(structured.functions)?;
            } else {
                ctx.emitter
                    .log(
                        LogLevel::Warning,
                        "function list was not in dependency order, keeping free-text plan only",
                    )
                    .await;
            }
        }

        state.set_plan(structured.plan)?;

        // An empty plan is replaced by a synthesized one-liner and the task
        // complexity is downgraded one step.
        if state.plan().map_or(true, |p| p.trim().is_empty()) {
            state.replace_empty_plan(format!("Implement directly: {}", state.task.clone()));
            let downgraded = IntentResult {
                complexity: intent.complexity.downgraded(),
                ..intent
            };
            state.override_intent(downgraded);
            ctx.emitter
                .log(LogLevel::Warning, "empty plan synthesized from task text")
                .await;
        }

        Ok(json!({
            "plan": state.plan(),
            "functions": function_count,
        }))
    }

    fn fallback(&self, state: &mut AgentState) {
        state.replace_empty_plan(format!("Implement directly: {}", state.task));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_plan_deserializes_without_functions() {
        let parsed: StructuredPlan =
            serde_json::from_value(json!({"plan": "steps"})).unwrap();
        assert!(parsed.functions.is_empty());
    }

    #[test]
    fn schema_requires_plan_field() {
        let schema = PlannerAgent::schema();
        assert_eq!(schema["required"], json!(["plan"]));
        assert!(schema["properties"]["functions"]["items"]["required"]
            .as_array()
            .unwrap()
            .iter()
            .any(|v| v == "signature"));
    }
}
