//! Debug and fix stages of the self-healing loop.

use crate::prompts;
use crate::support::{extract_code, params_for, stage_err};
use atelier_core::domain::DebugResult;
use atelier_core::error::WorkflowError;
use atelier_core::event::LogLevel;
use atelier_core::graph::{StageAgent, StageContext};
use atelier_core::state::AgentState;
use atelier_llm::LlmAdapter;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::Arc;

pub const DEBUG_STAGE: &str = "debug";
pub const FIXING_STAGE: &str = "fixing";

/// Fix confidence below which the engine treats a fix as speculative.
pub const SPECULATIVE_CONFIDENCE: f64 = 0.4;

/// Diagnoses validation failures into a structured [`DebugResult`].
pub struct DebuggerAgent {
    adapter: Arc<LlmAdapter>,
}

impl DebuggerAgent {
    pub fn new(adapter: Arc<LlmAdapter>) -> Self {
        Self { adapter }
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "error_type": {"type": "string"},
                "location": {"type": "string"},
                "root_cause": {"type": "string"},
                "fix_instructions": {"type": "string"},
                "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0}
            },
            "required": ["error_type", "location", "root_cause", "fix_instructions", "confidence"]
        })
    }
}

#[async_trait]
impl StageAgent for DebuggerAgent {
    fn name(&self) -> &str {
        DEBUG_STAGE
    }

    async fn execute(
        &self,
        state: &mut AgentState,
        ctx: &StageContext,
    ) -> Result<Value, WorkflowError> {
        let failure = state
            .validation()
            .and_then(|v| v.first_failure().map(String::from))
            .unwrap_or_else(|| "validation failed without detail".to_string());
        let prompt = prompts::debug(
            state.code().unwrap_or(""),
            state.tests().unwrap_or(""),
            state.plan().unwrap_or(""),
            &failure,
        );
        let params = params_for(state);

        let result: DebugResult = self
            .adapter
            .generate_with_fallback(&prompt, &Self::schema(), &params, |text| {
                Some(parse_debug_text(text, &failure))
            })
            .await
            .map_err(|e| stage_err(DEBUG_STAGE, e))?;

        if result.confidence < SPECULATIVE_CONFIDENCE {
            ctx.emitter
                .log(
                    LogLevel::Warning,
                    format!("fix is speculative (confidence {:.2})", result.confidence),
                )
                .await;
        }

        let summary = serde_json::to_value(&result)
            .map_err(|e| WorkflowError::State(e.to_string()))?;
        state.set_debug_result(result);
        Ok(summary)
    }

    fn fallback(&self, state: &mut AgentState) {
        state.set_debug_result(DebugResult {
            error_type: "unknown".to_string(),
            location: "unknown".to_string(),
            root_cause: "debugger unavailable".to_string(),
            fix_instructions: "re-check the failing assertion and the involved function".to_string(),
            confidence: 0.0,
        });
    }
}

/// Manual fallback: pull labeled sections out of free text.
pub fn parse_debug_text(text: &str, failure: &str) -> DebugResult {
    let section = |label: &str| -> Option<String> {
        let pattern = format!(r"(?im)^\s*{label}\s*[:\-]\s*(.+)$");
        Regex::new(&pattern)
            .ok()?
            .captures(text)
            .map(|c| c[1].trim().to_string())
    };

    DebugResult {
        error_type: section("error[ _]?type")
            .unwrap_or_else(|| error_type_from_failure(failure)),
        location: section("location").unwrap_or_else(|| "unknown".to_string()),
        root_cause: section("root[ _]?cause").unwrap_or_else(|| {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                failure.to_string()
            } else {
                trimmed.chars().take(300).collect()
            }
        }),
        fix_instructions: section("fix(?:[ _]instructions)?")
            .unwrap_or_else(|| "address the root cause described above".to_string()),
        confidence: 0.3,
    }
}

fn error_type_from_failure(failure: &str) -> String {
    for known in ["SyntaxError", "AssertionError", "TypeError", "NameError", "ValueError"] {
        if failure.contains(known) {
            return known.to_string();
        }
    }
    "RuntimeError".to_string()
}

/// Applies the debugger's fix instructions to the code.
///
/// Existing function signatures are preserved unless the instructions
/// explicitly change one; a rewrite that drops a function gets one retry.
/// The fix loop counter advances here, once per cycle, even when the fix
/// itself fails.
pub struct FixerAgent {
    adapter: Arc<LlmAdapter>,
}

impl FixerAgent {
    pub fn new(adapter: Arc<LlmAdapter>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl StageAgent for FixerAgent {
    fn name(&self) -> &str {
        FIXING_STAGE
    }

    async fn execute(
        &self,
        state: &mut AgentState,
        ctx: &StageContext,
    ) -> Result<Value, WorkflowError> {
        let code = state.code().unwrap_or("").to_string();
        let debug = state.debug_result().cloned().ok_or_else(|| {
            WorkflowError::State("fixing stage reached without a debug result".to_string())
        })?;
        let params = params_for(state);
        let prompt = prompts::fix(&code, &debug);

        let response = self
            .adapter
            .generate(&prompt, &params)
            .await
            .map_err(|e| stage_err(FIXING_STAGE, e))?;
        let mut fixed = extract_code(&response);

        let missing = missing_functions(&code, &fixed);
        if !missing.is_empty() {
            ctx.emitter
                .log(
                    LogLevel::Warning,
                    format!("fix dropped function(s) {}, retrying", missing.join(", ")),
                )
                .await;
            let retry_prompt = format!(
                "{prompt}\n\nYour previous answer removed {}. Keep every existing \
                 function definition.",
                missing.join(", ")
            );
            let retry = self
                .adapter
                .generate(&retry_prompt, &params)
                .await
                .map_err(|e| stage_err(FIXING_STAGE, e))?;
            let candidate = extract_code(&retry);
            if missing_functions(&code, &candidate).is_empty() {
                fixed = candidate;
            }
        }

        if !fixed.trim().is_empty() {
            state.set_code(fixed);
        }
        let iteration = state.bump_iteration();
        Ok(json!({ "iteration": iteration }))
    }

    fn fallback(&self, state: &mut AgentState) {
        // The loop must still make progress toward its bound.
        state.bump_iteration();
    }
}

/// Function names defined in `old` but absent from `new`.
fn missing_functions(old: &str, new: &str) -> Vec<String> {
    let def = Regex::new(r"(?m)^\s*def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(").expect("valid regex");
    let new_names: std::collections::HashSet<&str> = def
        .captures_iter(new)
        .map(|c| c.get(1).expect("group 1").as_str())
        .collect();
    def.captures_iter(old)
        .map(|c| c.get(1).expect("group 1").as_str())
        .filter(|name| !new_names.contains(name))
        .map(String::from)
        .collect()
}
