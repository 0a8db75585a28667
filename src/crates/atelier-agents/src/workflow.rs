//! Workflow assembly: agents wired into the stage graph.

use crate::conversational::{AnalyzeProjectAgent, GreetingAgent, ANALYZE_STAGE, GREETING_STAGE};
use crate::coder::{CoderAgent, STAGE as CODING};
use crate::debate::{CriticAgent, DebateAgent, DebateSettings, CRITIC_STAGE, DEBATE_STAGE};
use crate::debugger::{DebuggerAgent, FixerAgent, DEBUG_STAGE, FIXING_STAGE};
use crate::incremental::IncrementalSettings;
use crate::intent::{IntentAgent, STAGE as INTENT};
use crate::planner::{PlannerAgent, STAGE as PLANNING};
use crate::reflection::{ReflectionAgent, STAGE as REFLECTION};
use crate::researcher::{ResearcherAgent, STAGE as RESEARCH};
use crate::testgen::{TestGeneratorAgent, STAGE as TESTING};
use crate::validator::{ValidatorAgent, STAGE as VALIDATION};
use crate::web::WebSearch;
use atelier_analysis::CodeValidator;
use atelier_core::domain::Complexity;
use atelier_core::graph::{StageGraph, END};
use atelier_core::state::AgentState;
use atelier_core::task::GenerationMode;
use atelier_llm::LlmAdapter;
use atelier_retrieval::ExampleIndex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Tuning for the assembled workflow.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub incremental: IncrementalSettings,
    pub debate_enabled: bool,
    /// Minimum complexity that routes a passing validation into the debate.
    pub debate_min_complexity: Complexity,
    pub debate: DebateSettings,
    /// Few-shot examples requested from the retrieval index.
    pub num_examples: usize,
    /// Project root for AST facts and the analyze stage.
    pub project_root: Option<PathBuf>,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            incremental: IncrementalSettings::default(),
            debate_enabled: true,
            debate_min_complexity: Complexity::Medium,
            debate: DebateSettings::default(),
            num_examples: 3,
            project_root: None,
        }
    }
}

/// Process-wide collaborators the agents share.
pub struct WorkflowServices {
    pub adapter: Arc<LlmAdapter>,
    pub validator: Arc<dyn CodeValidator>,
    pub index: Option<Arc<ExampleIndex>>,
    pub web: Arc<dyn WebSearch>,
}

/// Build the full stage graph of the code-generation workflow.
pub fn build_workflow(services: WorkflowServices, settings: WorkflowSettings) -> StageGraph {
    let WorkflowServices {
        adapter,
        validator,
        index,
        web,
    } = services;

    let mut graph = StageGraph::new(INTENT);
    graph.add_stage(Arc::new(IntentAgent::new(adapter.clone())));
    graph.add_stage(Arc::new(GreetingAgent::new(adapter.clone())));
    graph.add_stage(Arc::new(AnalyzeProjectAgent::new(
        settings.project_root.clone(),
    )));
    graph.add_stage(Arc::new(PlannerAgent::new(adapter.clone(), index.clone())));
    graph.add_stage(Arc::new(ResearcherAgent::new(
        index.clone(),
        web,
        settings.project_root.clone(),
        settings.num_examples,
    )));
    graph.add_stage(Arc::new(TestGeneratorAgent::new(
        adapter.clone(),
        validator.clone(),
    )));
    graph.add_stage(Arc::new(CoderAgent::new(
        adapter.clone(),
        index.clone(),
        validator.clone(),
        settings.incremental.clone(),
        settings.num_examples,
    )));
    graph.add_stage(Arc::new(ValidatorAgent::new(validator)));
    graph.add_stage(Arc::new(DebuggerAgent::new(adapter.clone())));
    graph.add_stage(Arc::new(FixerAgent::new(adapter.clone())));
    graph.add_stage(Arc::new(CriticAgent::new(adapter.clone())));
    graph.add_stage(Arc::new(DebateAgent::new(
        adapter.clone(),
        settings.debate.clone(),
    )));
    graph.add_stage(Arc::new(ReflectionAgent::new(adapter)));

    // Intent branches: conversational intents short-circuit, analyze gets
    // its own terminal stage, everything else enters the pipeline.
    graph.add_conditional_edge(
        INTENT,
        Arc::new(|state: &AgentState| {
            use atelier_core::domain::IntentKind;
            match state.intent().map(|i| i.kind) {
                Some(kind) if kind.is_conversational() => GREETING_STAGE.to_string(),
                Some(IntentKind::Analyze) => ANALYZE_STAGE.to_string(),
                _ => PLANNING.to_string(),
            }
        }),
    );
    graph.add_edge(GREETING_STAGE, END);
    graph.add_edge(ANALYZE_STAGE, END);

    // Research is skipped in fast mode, or when web search is off and no
    // local index exists.
    let has_index = index.is_some();
    graph.add_conditional_edge(
        PLANNING,
        Arc::new(move |state: &AgentState| {
            let fast = state.options.mode == GenerationMode::Fast;
            if fast || (state.options.disable_web_search && !has_index) {
                TESTING.to_string()
            } else {
                RESEARCH.to_string()
            }
        }),
    );
    graph.add_edge(RESEARCH, TESTING);
    graph.add_edge(TESTING, CODING);
    graph.add_edge(CODING, VALIDATION);

    // Validation branches: pass goes to review, fail loops through the
    // debugger while the iteration budget lasts. Fast mode settles for the
    // single critic; quality mode debates regardless of complexity.
    let debate_enabled = settings.debate_enabled;
    let debate_min = settings.debate_min_complexity;
    graph.add_conditional_edge(
        VALIDATION,
        Arc::new(move |state: &AgentState| {
            let passed = state.validation().map(|v| v.all_passed).unwrap_or(false);
            if passed {
                let complexity = state
                    .intent()
                    .map(|i| i.complexity)
                    .unwrap_or(Complexity::Medium);
                let wants_debate = match state.options.mode {
                    GenerationMode::Fast => false,
                    GenerationMode::Quality => debate_enabled,
                    GenerationMode::Auto => debate_enabled && complexity >= debate_min,
                };
                if wants_debate {
                    DEBATE_STAGE.to_string()
                } else {
                    CRITIC_STAGE.to_string()
                }
            } else if state.iteration() < state.options.max_iterations {
                DEBUG_STAGE.to_string()
            } else {
                REFLECTION.to_string()
            }
        }),
    );
    graph.add_edge(DEBUG_STAGE, FIXING_STAGE);
    graph.add_edge(FIXING_STAGE, VALIDATION);
    graph.add_edge(CRITIC_STAGE, REFLECTION);
    graph.add_edge(DEBATE_STAGE, REFLECTION);
    graph.add_edge(REFLECTION, END);

    graph
}

/// Per-stage timeout overrides for the engine.
///
/// The debate runs up to three 180-second rounds plus fixes, so it gets a
/// budget beyond the default stage timeout.
pub fn stage_timeout_overrides() -> HashMap<String, Duration> {
    HashMap::from([(DEBATE_STAGE.to_string(), Duration::from_secs(600))])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::DisabledWebSearch;
    use atelier_core::domain::{IntentKind, IntentResult, ToolReport, ValidationReport};
    use atelier_core::task::{Task, TaskOptions};
    use atelier_llm::{AdapterConfig, StructuredOutputConfig};

    struct NullValidator;

    #[async_trait::async_trait]
    impl CodeValidator for NullValidator {
        async fn validate(&self, _code: &str, _tests: &str) -> ValidationReport {
            ValidationReport::failed("not implemented")
        }

        async fn quick(&self, _code: &str, _tests: &str) -> atelier_analysis::QuickVerdict {
            atelier_analysis::QuickVerdict {
                passed: true,
                error: None,
            }
        }
    }

    struct NullModel;

    #[async_trait::async_trait]
    impl atelier_llm::LanguageModel for NullModel {
        async fn generate(
            &self,
            _prompt: &str,
            _params: &atelier_llm::GenerationParams,
        ) -> atelier_llm::Result<String> {
            Ok(String::new())
        }

        async fn chat(
            &self,
            _messages: &[atelier_llm::ChatMessage],
            _params: &atelier_llm::GenerationParams,
        ) -> atelier_llm::Result<String> {
            Ok(String::new())
        }

        async fn generate_stream(
            &self,
            _prompt: &str,
            _params: &atelier_llm::GenerationParams,
        ) -> atelier_llm::Result<atelier_llm::RawDeltaStream> {
            Ok(Box::pin(futures::stream::empty()))
        }

        async fn generate_json(
            &self,
            _prompt: &str,
            _schema: &serde_json::Value,
            _params: &atelier_llm::GenerationParams,
        ) -> atelier_llm::Result<String> {
            Ok(String::new())
        }

        async fn list_models(&self) -> atelier_llm::Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn is_available(&self) -> bool {
            false
        }
    }

    fn graph(settings: WorkflowSettings) -> StageGraph {
        let adapter = Arc::new(LlmAdapter::new(
            Arc::new(NullModel),
            AdapterConfig::default(),
            StructuredOutputConfig::default(),
        ));
        build_workflow(
            WorkflowServices {
                adapter,
                validator: Arc::new(NullValidator),
                index: None,
                web: Arc::new(DisabledWebSearch),
            },
            settings,
        )
    }

    fn state_with_intent(kind: IntentKind, complexity: Complexity) -> AgentState {
        let task = Task::new("demo", TaskOptions::default());
        let mut state = AgentState::for_task(&task, "m", false);
        state
            .set_intent(IntentResult {
                kind,
                confidence: 0.9,
                complexity,
                reasoning: String::new(),
            })
            .unwrap();
        state
    }

    fn passing_report() -> ValidationReport {
        ValidationReport::new(
            ToolReport::passed("ok"),
            ToolReport::passed("ok"),
            ToolReport::passed("ok"),
        )
    }

    #[test]
    fn graph_is_structurally_valid() {
        assert!(graph(WorkflowSettings::default()).validate().is_ok());
    }

    #[test]
    fn greeting_short_circuits() {
        let g = graph(WorkflowSettings::default());
        let state = state_with_intent(IntentKind::Greeting, Complexity::Simple);
        assert_eq!(g.next_stage(INTENT, &state).unwrap(), GREETING_STAGE);
        assert_eq!(g.next_stage(GREETING_STAGE, &state).unwrap(), END);
    }

    #[test]
    fn analyze_routes_to_project_analysis() {
        let g = graph(WorkflowSettings::default());
        let state = state_with_intent(IntentKind::Analyze, Complexity::Simple);
        assert_eq!(g.next_stage(INTENT, &state).unwrap(), ANALYZE_STAGE);
    }

    #[test]
    fn research_skipped_without_web_or_index() {
        let g = graph(WorkflowSettings::default());
        let task = Task::new(
            "demo",
            TaskOptions {
                disable_web_search: true,
                ..Default::default()
            },
        );
        let state = AgentState::for_task(&task, "m", false);
        assert_eq!(g.next_stage(PLANNING, &state).unwrap(), TESTING);

        let task = Task::new("demo", TaskOptions::default());
        let state = AgentState::for_task(&task, "m", false);
        assert_eq!(g.next_stage(PLANNING, &state).unwrap(), RESEARCH);
    }

    #[test]
    fn passing_validation_routes_to_debate_or_critic() {
        let g = graph(WorkflowSettings::default());

        let mut state = state_with_intent(IntentKind::Create, Complexity::Medium);
        state.set_validation(passing_report());
        assert_eq!(g.next_stage(VALIDATION, &state).unwrap(), DEBATE_STAGE);

        let mut state = state_with_intent(IntentKind::Create, Complexity::Simple);
        state.set_validation(passing_report());
        assert_eq!(g.next_stage(VALIDATION, &state).unwrap(), CRITIC_STAGE);

        let g = graph(WorkflowSettings {
            debate_enabled: false,
            ..Default::default()
        });
        let mut state = state_with_intent(IntentKind::Create, Complexity::Complex);
        state.set_validation(passing_report());
        assert_eq!(g.next_stage(VALIDATION, &state).unwrap(), CRITIC_STAGE);
    }

    #[test]
    fn failing_validation_loops_until_budget_exhausted() {
        let g = graph(WorkflowSettings::default());
        let mut state = state_with_intent(IntentKind::Create, Complexity::Simple);
        state.set_validation(ValidationReport::failed("boom"));

        assert_eq!(g.next_stage(VALIDATION, &state).unwrap(), DEBUG_STAGE);
        assert_eq!(g.next_stage(DEBUG_STAGE, &state).unwrap(), FIXING_STAGE);
        assert_eq!(g.next_stage(FIXING_STAGE, &state).unwrap(), VALIDATION);

        // Exhaust the budget (default max_iterations = 3).
        state.bump_iteration();
        state.bump_iteration();
        state.bump_iteration();
        assert_eq!(g.next_stage(VALIDATION, &state).unwrap(), REFLECTION);
    }

    #[test]
    fn mode_overrides_review_routing() {
        let g = graph(WorkflowSettings::default());

        let mut options = TaskOptions::default();
        options.mode = GenerationMode::Fast;
        let task = Task::new("demo", options);
        let mut state = AgentState::for_task(&task, "m", false);
        state
            .set_intent(IntentResult {
                kind: IntentKind::Create,
                confidence: 0.9,
                complexity: Complexity::Complex,
                reasoning: String::new(),
            })
            .unwrap();
        state.set_validation(passing_report());
        // Fast mode skips research and settles for the single critic.
        assert_eq!(g.next_stage(PLANNING, &state).unwrap(), TESTING);
        assert_eq!(g.next_stage(VALIDATION, &state).unwrap(), CRITIC_STAGE);

        let mut options = TaskOptions::default();
        options.mode = GenerationMode::Quality;
        let task = Task::new("demo", options);
        let mut state = AgentState::for_task(&task, "m", false);
        state
            .set_intent(IntentResult {
                kind: IntentKind::Create,
                confidence: 0.9,
                complexity: Complexity::Simple,
                reasoning: String::new(),
            })
            .unwrap();
        state.set_validation(passing_report());
        // Quality mode debates even simple tasks.
        assert_eq!(g.next_stage(VALIDATION, &state).unwrap(), DEBATE_STAGE);
    }

    #[test]
    fn debate_has_extended_timeout() {
        let overrides = stage_timeout_overrides();
        assert!(overrides[DEBATE_STAGE] > Duration::from_secs(120));
    }
}
