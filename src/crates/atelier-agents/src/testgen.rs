//! Test generation stage.

use crate::prompts;
use crate::support::{extract_code, generate_streaming, params_for, stage_err};
use atelier_analysis::CodeValidator;
use atelier_core::error::WorkflowError;
use atelier_core::graph::{StageAgent, StageContext};
use atelier_core::state::AgentState;
use atelier_llm::LlmAdapter;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub const STAGE: &str = "testing";

/// Generates the test source for the planned implementation.
///
/// The emitted tests are guaranteed syntactically valid: the quick
/// validator's syntax check gates the output, and a failing check is a
/// stage error whose fallback leaves `tests` empty.
pub struct TestGeneratorAgent {
    adapter: Arc<LlmAdapter>,
    validator: Arc<dyn CodeValidator>,
}

impl TestGeneratorAgent {
    pub fn new(adapter: Arc<LlmAdapter>, validator: Arc<dyn CodeValidator>) -> Self {
        Self { adapter, validator }
    }
}

#[async_trait]
impl StageAgent for TestGeneratorAgent {
    fn name(&self) -> &str {
        STAGE
    }

    async fn execute(
        &self,
        state: &mut AgentState,
        ctx: &StageContext,
    ) -> Result<Value, WorkflowError> {
        let plan = state.plan().unwrap_or("").to_string();
        let prompt = prompts::tests(&state.task, &plan);
        let params = params_for(state);

        let response = generate_streaming(&self.adapter, &prompt, &params, &ctx.emitter).await?;
        let tests = extract_code(&response);
        if tests.trim().is_empty() {
            return Err(stage_err(STAGE, "model produced no test code"));
        }

        let verdict = self.validator.quick(&tests, "").await;
        if !verdict.passed {
            return Err(stage_err(
                STAGE,
                format!(
                    "generated tests are not syntactically valid: {}",
                    verdict.error.unwrap_or_default()
                ),
            ));
        }

        let lines = tests.lines().count();
        state.set_tests(tests)?;
        Ok(json!({ "test_lines": lines }))
    }

    fn fallback(&self, state: &mut AgentState) {
        let _ = state.set_tests(String::new());
    }
}
