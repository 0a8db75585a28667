//! The evolving per-run state record passed between stages.
//!
//! `AgentState` is the typed counterpart of a key-value state bag: every
//! stage output is an optional field, set exactly once by its producing
//! stage. Accessors enforce the ownership rules — later stages may read any
//! field but only `code` may be rewritten (by the fix and debate stages)
//! and only `iteration` may advance, monotonically.

use crate::domain::{
    DebateReport, DebugResult, FunctionSpec, IntentResult, ReflectionResult, StageRecord,
    ValidationReport,
};
use crate::error::WorkflowError;
use crate::task::{Task, TaskOptions};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-run workflow state.
///
/// Exclusively owned by the engine for the lifetime of a run; agents receive
/// a mutable view scoped to their stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub task: String,
    pub model: String,
    pub options: TaskOptions,
    pub started_at: DateTime<Utc>,
    pub enable_sse: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    iteration: u32,
    intent_result: Option<IntentResult>,
    plan: Option<String>,
    function_specs: Option<Vec<FunctionSpec>>,
    context: Option<String>,
    tests: Option<String>,
    code: Option<String>,
    validation_results: Option<ValidationReport>,
    debug_result: Option<DebugResult>,
    reflection_result: Option<ReflectionResult>,
    debate_result: Option<DebateReport>,
    greeting_message: Option<String>,

    #[serde(default)]
    stage_log: Vec<StageRecord>,
}

macro_rules! write_once {
    ($self:ident, $field:ident, $value:expr) => {{
        if $self.$field.is_some() {
            return Err(WorkflowError::State(format!(
                "`{}` is already set and may not be overwritten",
                stringify!($field)
            )));
        }
        $self.$field = Some($value);
        Ok(())
    }};
}

impl AgentState {
    /// Initial state for a task, before any stage has run.
    pub fn for_task(task: &Task, model: impl Into<String>, enable_sse: bool) -> Self {
        Self {
            task: task.prompt.clone(),
            model: model.into(),
            options: task.options.clone().normalized(),
            started_at: Utc::now(),
            enable_sse,
            conversation_id: task.conversation_id.clone(),
            iteration: 0,
            intent_result: None,
            plan: None,
            function_specs: None,
            context: None,
            tests: None,
            code: None,
            validation_results: None,
            debug_result: None,
            reflection_result: None,
            debate_result: None,
            greeting_message: None,
            stage_log: Vec::new(),
        }
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Advance the fix-loop counter. The counter never decreases.
    pub fn bump_iteration(&mut self) -> u32 {
        self.iteration += 1;
        self.iteration
    }

    pub fn intent(&self) -> Option<&IntentResult> {
        self.intent_result.as_ref()
    }

    pub fn set_intent(&mut self, value: IntentResult) -> Result<(), WorkflowError> {
        write_once!(self, intent_result, value)
    }

    /// Replace the intent wholesale; used only by the low-confidence
    /// downgrade path before any downstream stage has read it.
    pub fn override_intent(&mut self, value: IntentResult) {
        self.intent_result = Some(value);
    }

    pub fn plan(&self) -> Option<&str> {
        self.plan.as_deref()
    }

    pub fn set_plan(&mut self, value: String) -> Result<(), WorkflowError> {
        write_once!(self, plan, value)
    }

    /// Replace an empty plan with a synthesized one-liner.
    pub fn replace_empty_plan(&mut self, value: String) {
        if self.plan.as_deref().map_or(true, |p| p.trim().is_empty()) {
            self.plan = Some(value);
        }
    }

    pub fn function_specs(&self) -> Option<&[FunctionSpec]> {
        self.function_specs.as_deref()
    }

    pub fn set_function_specs(&mut self, value: Vec<FunctionSpec>) -> Result<(), WorkflowError> {
        write_once!(self, function_specs, value)
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn set_context(&mut self, value: String) -> Result<(), WorkflowError> {
        write_once!(self, context, value)
    }

    pub fn tests(&self) -> Option<&str> {
        self.tests.as_deref()
    }

    pub fn set_tests(&mut self, value: String) -> Result<(), WorkflowError> {
        write_once!(self, tests, value)
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// `code` is the one output later stages may rewrite (fixing, debate).
    pub fn set_code(&mut self, value: String) {
        self.code = Some(value);
    }

    pub fn validation(&self) -> Option<&ValidationReport> {
        self.validation_results.as_ref()
    }

    /// Validation re-runs after every fix cycle, so the report is replaced.
    pub fn set_validation(&mut self, value: ValidationReport) {
        self.validation_results = Some(value);
    }

    pub fn debug_result(&self) -> Option<&DebugResult> {
        self.debug_result.as_ref()
    }

    /// The debugger runs once per fix cycle and replaces its prior finding.
    pub fn set_debug_result(&mut self, value: DebugResult) {
        self.debug_result = Some(value);
    }

    pub fn reflection(&self) -> Option<&ReflectionResult> {
        self.reflection_result.as_ref()
    }

    pub fn set_reflection(&mut self, value: ReflectionResult) -> Result<(), WorkflowError> {
        write_once!(self, reflection_result, value)
    }

    pub fn debate(&self) -> Option<&DebateReport> {
        self.debate_result.as_ref()
    }

    pub fn set_debate(&mut self, value: DebateReport) -> Result<(), WorkflowError> {
        write_once!(self, debate_result, value)
    }

    pub fn greeting_message(&self) -> Option<&str> {
        self.greeting_message.as_deref()
    }

    pub fn set_greeting_message(&mut self, value: String) -> Result<(), WorkflowError> {
        write_once!(self, greeting_message, value)
    }

    /// Record a completed stage for later resume replay.
    pub fn record_stage(&mut self, record: StageRecord) {
        self.stage_log.push(record);
    }

    pub fn stage_log(&self) -> &[StageRecord] {
        &self.stage_log
    }

    /// Final results payload for the terminal `final_result` event.
    pub fn results(&self) -> Value {
        serde_json::json!({
            "task": self.task,
            "model": self.model,
            "iteration": self.iteration,
            "intent": self.intent_result,
            "plan": self.plan,
            "context": self.context,
            "tests": self.tests,
            "code": self.code,
            "validation_results": self.validation_results,
            "debug_result": self.debug_result,
            "reflection_result": self.reflection_result,
            "debate_result": self.debate_result,
            "greeting_message": self.greeting_message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Complexity, IntentKind};

    fn state() -> AgentState {
        let task = Task::new("write a parser", TaskOptions::default());
        AgentState::for_task(&task, "qwen2.5-coder", true)
    }

    #[test]
    fn write_once_fields_reject_overwrite() {
        let mut s = state();
        s.set_plan("plan A".into()).unwrap();
        assert!(s.set_plan("plan B".into()).is_err());
        assert_eq!(s.plan(), Some("plan A"));
    }

    #[test]
    fn code_may_be_rewritten() {
        let mut s = state();
        s.set_code("v1".into());
        s.set_code("v2".into());
        assert_eq!(s.code(), Some("v2"));
    }

    #[test]
    fn iteration_is_monotone() {
        let mut s = state();
        assert_eq!(s.iteration(), 0);
        assert_eq!(s.bump_iteration(), 1);
        assert_eq!(s.bump_iteration(), 2);
    }

    #[test]
    fn empty_plan_replacement() {
        let mut s = state();
        s.set_plan("   ".into()).unwrap();
        s.replace_empty_plan("Implement write a parser".into());
        assert_eq!(s.plan(), Some("Implement write a parser"));

        // A non-empty plan is left alone.
        s.replace_empty_plan("other".into());
        assert_eq!(s.plan(), Some("Implement write a parser"));
    }

    #[test]
    fn survives_serde_round_trip() {
        let mut s = state();
        s.set_intent(IntentResult {
            kind: IntentKind::Create,
            confidence: 0.9,
            complexity: Complexity::Medium,
            reasoning: "create request".into(),
        })
        .unwrap();
        s.set_plan("plan".into()).unwrap();
        s.bump_iteration();

        let json = serde_json::to_string(&s).unwrap();
        let back: AgentState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.iteration(), 1);
        assert_eq!(back.plan(), Some("plan"));
        assert_eq!(back.intent().unwrap().kind, IntentKind::Create);
    }

    #[test]
    fn results_include_code_and_intent() {
        let mut s = state();
        s.set_code("def add(a, b):\n    return a + b\n".into());
        let results = s.results();
        assert!(results["code"].as_str().unwrap().contains("def add"));
        assert!(results["intent"].is_null());
    }
}
