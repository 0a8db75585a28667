//! Intent classification stage.

use crate::prompts;
use crate::support::{params_for, stage_err};
use atelier_core::domain::{Complexity, IntentKind, IntentResult};
use atelier_core::error::WorkflowError;
use atelier_core::graph::{StageAgent, StageContext};
use atelier_core::state::AgentState;
use atelier_llm::LlmAdapter;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub const STAGE: &str = "intent";

/// Classifies the task into one of the ten intents.
///
/// Primary path is schema-constrained generation; the fallback is keyword
/// scoring over a bilingual dictionary, which reports `confidence ≤ 0.6`.
/// A result below 0.5 confidence is downgraded to `create`/`medium` so the
/// workflow takes the default path.
pub struct IntentAgent {
    adapter: Arc<LlmAdapter>,
}

impl IntentAgent {
    pub fn new(adapter: Arc<LlmAdapter>) -> Self {
        Self { adapter }
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "type": {
                    "type": "string",
                    "enum": [
                        "greeting", "help", "create", "modify", "debug",
                        "optimize", "explain", "test", "refactor", "analyze"
                    ]
                },
                "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                "complexity": {"type": "string", "enum": ["simple", "medium", "complex"]},
                "reasoning": {"type": "string"}
            },
            "required": ["type", "confidence", "complexity", "reasoning"]
        })
    }
}

#[async_trait]
impl StageAgent for IntentAgent {
    fn name(&self) -> &str {
        STAGE
    }

    async fn execute(
        &self,
        state: &mut AgentState,
        _ctx: &StageContext,
    ) -> Result<Value, WorkflowError> {
        let prompt = prompts::intent(&state.task);
        let params = params_for(state);
        let task = state.task.clone();

        let result: IntentResult = self
            .adapter
            .generate_with_fallback(&prompt, &Self::schema(), &params, |text| {
                Some(classify_by_keywords(&task, text))
            })
            .await
            .map_err(|e| stage_err(STAGE, e))?;
        let result = apply_confidence_floor(result);

        let summary = serde_json::to_value(&result)
            .map_err(|e| WorkflowError::State(e.to_string()))?;
        state.set_intent(result)?;
        Ok(summary)
    }

    fn fallback(&self, state: &mut AgentState) {
        let _ = state.set_intent(IntentResult::fallback());
    }
}

/// Below 0.5 confidence the classification is not trusted and the workflow
/// takes the default path. Exactly 0.5 is not downgraded; conversational
/// intents keep their short-circuit either way.
pub fn apply_confidence_floor(result: IntentResult) -> IntentResult {
    if result.confidence >= 0.5 || result.kind.is_conversational() {
        return result;
    }
    IntentResult {
        kind: IntentKind::Create,
        complexity: Complexity::Medium,
        confidence: result.confidence,
        reasoning: format!("{} (low confidence, defaulted to create)", result.reasoning),
    }
}

/// Keyword-scoring fallback over a bilingual (English/Russian) dictionary.
///
/// The model's free-text answer, when present, participates in scoring too.
pub fn classify_by_keywords(task: &str, model_text: &str) -> IntentResult {
    let haystack = format!("{} {}", task, model_text).to_lowercase();

    const DICTIONARY: &[(IntentKind, &[&str])] = &[
        (
            IntentKind::Greeting,
            &["hello", "hi!", "hey", "привет", "здравствуй", "добрый день"],
        ),
        (
            IntentKind::Help,
            &["help", "what can you", "помощь", "помоги", "что ты умеешь"],
        ),
        (
            IntentKind::Debug,
            &["fix", "bug", "debug", "ошибк", "исправ", "почин", "сломал", "не работает"],
        ),
        (IntentKind::Test, &["write test", "unit test", "тест"]),
        (IntentKind::Refactor, &["refactor", "рефактор", "перепиши"]),
        (
            IntentKind::Optimize,
            &["optimiz", "faster", "speed up", "оптимиз", "ускор"],
        ),
        (
            IntentKind::Explain,
            &["explain", "why does", "how does", "объясн", "почему", "как работает"],
        ),
        (IntentKind::Analyze, &["analyze", "analyse", "анализ", "проанализ"]),
        (
            IntentKind::Modify,
            &["modify", "change", "add a", "update", "измени", "добавь", "обнови"],
        ),
        (
            IntentKind::Create,
            &["write", "create", "implement", "build", "напиши", "создай", "реализуй", "сделай"],
        ),
    ];

    let mut best = (IntentKind::Create, 0usize);
    for (kind, keywords) in DICTIONARY {
        let score = keywords.iter().filter(|k| haystack.contains(**k)).count();
        if score > best.1 {
            best = (*kind, score);
        }
    }

    let (kind, score) = best;
    let confidence = if score == 0 { 0.4 } else { 0.6 };
    IntentResult {
        kind,
        confidence,
        complexity: estimate_complexity(task),
        reasoning: format!("keyword fallback matched {score} marker(s)"),
    }
}

fn estimate_complexity(task: &str) -> Complexity {
    let lowered = task.to_lowercase();
    const HARD_MARKERS: &[&str] = &[
        "cache", "кэш", "o(1)", "o(n", "thread", "поток", "async", "parser", "парсер",
        "server", "сервер", "graph", "граф", "protocol",
    ];
    if HARD_MARKERS.iter().any(|m| lowered.contains(m)) {
        return Complexity::Complex;
    }
    match task.split_whitespace().count() {
        0..=10 => Complexity::Simple,
        11..=30 => Complexity::Medium,
        _ => Complexity::Complex,
    }
}
