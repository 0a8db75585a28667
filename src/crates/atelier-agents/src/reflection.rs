//! Reflection stage: quality scores over the whole run.

use crate::prompts;
use crate::support::{params_for, stage_err};
use atelier_core::domain::ReflectionResult;
use atelier_core::error::WorkflowError;
use atelier_core::graph::{StageAgent, StageContext};
use atelier_core::state::AgentState;
use atelier_llm::LlmAdapter;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

pub const STAGE: &str = "reflection";

#[derive(Debug, Clone, Deserialize)]
struct RawScores {
    planning: f64,
    research: f64,
    testing: f64,
    coding: f64,
    #[serde(default)]
    analysis: String,
    #[serde(default)]
    improvements: String,
}

/// Scores planning/research/testing/coding and combines them into the
/// weighted overall score.
///
/// When validation never passed, the coding score is capped at 0.3 so a
/// failed run cannot reflect as a good one.
pub struct ReflectionAgent {
    adapter: Arc<LlmAdapter>,
}

impl ReflectionAgent {
    pub fn new(adapter: Arc<LlmAdapter>) -> Self {
        Self { adapter }
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "planning": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                "research": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                "testing": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                "coding": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                "analysis": {"type": "string"},
                "improvements": {"type": "string"}
            },
            "required": ["planning", "research", "testing", "coding"]
        })
    }
}

#[async_trait]
impl StageAgent for ReflectionAgent {
    fn name(&self) -> &str {
        STAGE
    }

    async fn execute(
        &self,
        state: &mut AgentState,
        _ctx: &StageContext,
    ) -> Result<Value, WorkflowError> {
        let validation_passed = state.validation().map(|v| v.all_passed).unwrap_or(false);
        let prompt = prompts::reflection(
            &state.task,
            state.plan(),
            state.context(),
            state.tests(),
            state.code(),
            validation_passed,
        );
        let params = params_for(state);

        let state_snapshot = heuristic_scores(state);
        let raw: RawScores = self
            .adapter
            .generate_with_fallback(&prompt, &Self::schema(), &params, move |_text| {
                Some(state_snapshot.clone())
            })
            .await
            .map_err(|e| stage_err(STAGE, e))?;

        let result = build_result(raw, validation_passed);
        let summary = serde_json::to_value(&result)
            .map_err(|e| WorkflowError::State(e.to_string()))?;
        state.set_reflection(result)?;
        Ok(summary)
    }

    fn fallback(&self, state: &mut AgentState) {
        let validation_passed = state.validation().map(|v| v.all_passed).unwrap_or(false);
        let raw = heuristic_scores(state);
        let _ = state.set_reflection(build_result(raw, validation_passed));
    }
}

fn build_result(raw: RawScores, validation_passed: bool) -> ReflectionResult {
    let coding = if validation_passed {
        raw.coding
    } else {
        raw.coding.min(0.3)
    };
    ReflectionResult::weighted(
        raw.planning.clamp(0.0, 1.0),
        raw.research.clamp(0.0, 1.0),
        raw.testing.clamp(0.0, 1.0),
        coding.clamp(0.0, 1.0),
        raw.analysis,
        raw.improvements,
    )
}

/// Deterministic fallback scores from artifact presence.
fn heuristic_scores(state: &AgentState) -> RawScores {
    let has = |s: Option<&str>| s.map(|v| !v.trim().is_empty()).unwrap_or(false);
    let validation_passed = state.validation().map(|v| v.all_passed).unwrap_or(false);
    RawScores {
        planning: if has(state.plan()) { 0.6 } else { 0.2 },
        research: if has(state.context()) { 0.5 } else { 0.3 },
        testing: if has(state.tests()) { 0.5 } else { 0.2 },
        coding: if validation_passed { 0.8 } else { 0.2 },
        analysis: "heuristic reflection from artifact presence".to_string(),
        improvements: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_validation_caps_coding_score() {
        let raw = RawScores {
            planning: 0.9,
            research: 0.9,
            testing: 0.9,
            coding: 0.95,
            analysis: String::new(),
            improvements: String::new(),
        };
        let result = build_result(raw, false);
        assert!(result.coding <= 0.3);
        assert!(result.overall < 0.7);

        let raw = RawScores {
            planning: 0.9,
            research: 0.9,
            testing: 0.9,
            coding: 0.95,
            analysis: String::new(),
            improvements: String::new(),
        };
        let passed = build_result(raw, true);
        assert!(passed.overall > 0.9);
    }

    #[test]
    fn failed_run_heuristics_score_below_half() {
        // No artifacts, validation failed: 0.25·0.2 + 0.2·0.3 + 0.2·0.2 + 0.35·0.2 = 0.22
        let raw = RawScores {
            planning: 0.2,
            research: 0.3,
            testing: 0.2,
            coding: 0.2,
            analysis: String::new(),
            improvements: String::new(),
        };
        let result = build_result(raw, false);
        assert!(result.overall < 0.5);
    }
}
