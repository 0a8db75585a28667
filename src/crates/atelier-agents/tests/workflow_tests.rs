//! End-to-end workflow scenarios over a scripted model backend.
//!
//! The model is a prompt router: each stage's prompt carries a distinctive
//! marker, and the router answers with canned responses (a queue per marker,
//! sticky on its last entry). The validator is scripted the same way, so
//! the fix loop and the debate can be driven deterministically without a
//! Python toolchain or a model server.

use async_trait::async_trait;
use atelier_agents::{build_workflow, stage_timeout_overrides, WorkflowServices, WorkflowSettings};
use atelier_analysis::{CodeValidator, QuickVerdict};
use atelier_checkpoint::InMemoryCheckpointStore;
use atelier_core::domain::{ToolReport, ValidationReport};
use atelier_core::engine::{EngineConfig, WorkflowEngine};
use atelier_core::event::WorkflowEvent;
use atelier_core::state::AgentState;
use atelier_core::stream::EventStreamManager;
use atelier_core::task::{Task, TaskOptions, TaskStatus};
use atelier_core::CheckpointStore;
use atelier_llm::{
    AdapterConfig, ChatMessage, GenerationParams, LanguageModel, LlmAdapter, RawDeltaStream,
    StructuredOutputConfig,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;

/// Scripted backend answering by prompt marker; the last response of a
/// queue is sticky.
struct PromptRouter {
    rules: Mutex<Vec<(String, VecDeque<String>)>>,
}

impl PromptRouter {
    fn new(rules: Vec<(&str, Vec<Value>)>) -> Self {
        Self {
            rules: Mutex::new(
                rules
                    .into_iter()
                    .map(|(marker, responses)| {
                        let queue = responses
                            .into_iter()
                            .map(|v| match v {
                                Value::String(s) => s,
                                other => other.to_string(),
                            })
                            .collect();
                        (marker.to_string(), queue)
                    })
                    .collect(),
            ),
        }
    }

    fn answer(&self, prompt: &str) -> String {
        let mut rules = self.rules.lock();
        for (marker, queue) in rules.iter_mut() {
            if prompt.contains(marker.as_str()) {
                return if queue.len() > 1 {
                    queue.pop_front().unwrap()
                } else {
                    queue.front().cloned().unwrap_or_default()
                };
            }
        }
        String::new()
    }
}

#[async_trait]
impl LanguageModel for PromptRouter {
    async fn generate(
        &self,
        prompt: &str,
        _params: &GenerationParams,
    ) -> atelier_llm::Result<String> {
        Ok(self.answer(prompt))
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        _params: &GenerationParams,
    ) -> atelier_llm::Result<String> {
        let prompt = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Ok(self.answer(&prompt))
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        _params: &GenerationParams,
    ) -> atelier_llm::Result<RawDeltaStream> {
        let answer = self.answer(prompt);
        Ok(Box::pin(futures::stream::iter(vec![Ok(answer)])))
    }

    async fn generate_json(
        &self,
        prompt: &str,
        _schema: &Value,
        _params: &GenerationParams,
    ) -> atelier_llm::Result<String> {
        Ok(self.answer(prompt))
    }

    async fn list_models(&self) -> atelier_llm::Result<Vec<String>> {
        Ok(vec!["scripted".to_string()])
    }

    async fn is_available(&self) -> bool {
        true
    }
}

/// Validator answering from a queue of reports; the last report is sticky.
struct ScriptedValidator {
    reports: Mutex<VecDeque<ValidationReport>>,
}

impl ScriptedValidator {
    fn new(reports: Vec<ValidationReport>) -> Self {
        Self {
            reports: Mutex::new(reports.into()),
        }
    }
}

#[async_trait]
impl CodeValidator for ScriptedValidator {
    async fn validate(&self, _code: &str, _tests: &str) -> ValidationReport {
        let mut reports = self.reports.lock();
        if reports.len() > 1 {
            reports.pop_front().unwrap()
        } else {
            reports
                .front()
                .cloned()
                .unwrap_or_else(|| ValidationReport::failed("script exhausted"))
        }
    }

    async fn quick(&self, _code: &str, _tests: &str) -> QuickVerdict {
        QuickVerdict {
            passed: true,
            error: None,
        }
    }
}

fn passing_report() -> ValidationReport {
    ValidationReport::new(
        ToolReport::passed("ok"),
        ToolReport::passed("ok"),
        ToolReport::passed("ok"),
    )
}

fn failing_report(error: &str) -> ValidationReport {
    ValidationReport::new(
        ToolReport::failed(error),
        ToolReport::passed("ok"),
        ToolReport::passed("ok"),
    )
}

fn intent_json(kind: &str, complexity: &str, confidence: f64) -> Value {
    json!({
        "type": kind,
        "confidence": confidence,
        "complexity": complexity,
        "reasoning": "scripted"
    })
}

struct Harness {
    engine: Arc<WorkflowEngine>,
    store: Arc<InMemoryCheckpointStore>,
}

fn harness(
    model: PromptRouter,
    validator: ScriptedValidator,
    settings: WorkflowSettings,
) -> Harness {
    let adapter = Arc::new(LlmAdapter::new(
        Arc::new(model),
        AdapterConfig {
            backoff_base: std::time::Duration::from_millis(1),
            ..Default::default()
        },
        StructuredOutputConfig::default(),
    ));
    let graph = build_workflow(
        WorkflowServices {
            adapter,
            validator: Arc::new(validator),
            index: None,
            web: Arc::new(atelier_agents::DisabledWebSearch),
        },
        settings,
    );
    let store = Arc::new(InMemoryCheckpointStore::new());
    let engine = Arc::new(
        WorkflowEngine::new(
            Arc::new(graph),
            Arc::new(EventStreamManager::new()),
            store.clone(),
            EngineConfig {
                stage_timeout_overrides: stage_timeout_overrides(),
                ..Default::default()
            },
        )
        .unwrap(),
    );
    Harness { engine, store }
}

async fn run_and_collect(harness: &Harness, task: &Task) -> Vec<WorkflowEvent> {
    let mut rx = harness.engine.events().subscribe(&task.id);
    let state = AgentState::for_task(task, "scripted", true);
    harness.engine.run(task, state).await.unwrap();

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            break;
        }
    }
    events
}

fn stages_started(events: &[WorkflowEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            WorkflowEvent::StageStart { stage, .. } => Some(stage.clone()),
            _ => None,
        })
        .collect()
}

fn final_results(events: &[WorkflowEvent]) -> &Value {
    match events.last().unwrap() {
        WorkflowEvent::FinalResult { results } => results,
        other => panic!("expected final_result, got {other:?}"),
    }
}

// Scenario 1: greeting short-circuit.
#[tokio::test]
async fn greeting_short_circuits_to_terminal_response() {
    let model = PromptRouter::new(vec![
        (
            "Classify the user's request",
            vec![intent_json("greeting", "simple", 0.95)],
        ),
        (
            "Reply briefly",
            vec![json!("Привет! Я генерирую и проверяю Python-код.")],
        ),
    ]);
    let harness = harness(
        model,
        ScriptedValidator::new(vec![]),
        WorkflowSettings::default(),
    );

    let task = Task::new("Привет! Что ты умеешь?", TaskOptions::default());
    let events = run_and_collect(&harness, &task).await;

    let stages = stages_started(&events);
    assert_eq!(stages, vec!["intent", "greeting"]);
    assert!(!stages.iter().any(|s| s == "coding" || s == "validation"));

    let results = final_results(&events);
    assert_eq!(results["intent"]["type"], json!("greeting"));
    assert!(!results["greeting_message"].as_str().unwrap().is_empty());
    assert_eq!(results["success"], json!(true));
}

// Scenario 2: simple create, single-shot, validation passes.
#[tokio::test]
async fn simple_create_runs_the_full_pipeline() {
    let model = PromptRouter::new(vec![
        (
            "Classify the user's request",
            vec![intent_json("create", "simple", 0.9)],
        ),
        (
            "Draft an implementation plan",
            vec![json!({"plan": "1. define add(a, b)\n2. test it", "functions": []})],
        ),
        (
            "Write plain-assert Python tests",
            vec![json!("```python\nassert add(2, 3) == 5\nassert add(-1, 1) == 0\n```")],
        ),
        (
            "Implement the task below",
            vec![json!(
                "```python\ndef add(a: int, b: int) -> int:\n    \"\"\"Add two numbers.\"\"\"\n    return a + b\n```"
            )],
        ),
        (
            "Review this Python solution",
            vec![json!({"issues": [], "improved_code": null})],
        ),
        (
            "score each stage",
            vec![json!({
                "planning": 0.8, "research": 0.6, "testing": 0.7, "coding": 0.9,
                "analysis": "clean run", "improvements": ""
            })],
        ),
    ]);
    let harness = harness(
        model,
        ScriptedValidator::new(vec![passing_report()]),
        WorkflowSettings::default(),
    );

    let task = Task::new(
        "Напиши функцию сложения двух чисел с типами и тестами.",
        TaskOptions::default(),
    );
    let events = run_and_collect(&harness, &task).await;

    let stages = stages_started(&events);
    assert_eq!(
        stages,
        vec![
            "intent",
            "planning",
            "research",
            "testing",
            "coding",
            "validation",
            "critic",
            "reflection"
        ]
    );

    let results = final_results(&events);
    assert_eq!(results["success"], json!(true));
    assert_eq!(results["iteration"], json!(0));
    assert!(results["code"].as_str().unwrap().contains("def add"));
    assert!(results["tests"].as_str().unwrap().contains("add"));
    assert_eq!(results["validation_results"]["all_passed"], json!(true));

    let (meta, _) = harness.store.load(&task.id).await.unwrap().unwrap();
    assert_eq!(meta.status, TaskStatus::Completed);
}

// Scenario 3 (condensed): a failing validation goes through one
// debug → fixing → validation cycle and then passes.
#[tokio::test]
async fn fix_loop_recovers_from_a_failing_validation() {
    let model = PromptRouter::new(vec![
        (
            "Classify the user's request",
            vec![intent_json("create", "simple", 0.9)],
        ),
        (
            "Draft an implementation plan",
            vec![json!({"plan": "1. implement get/put", "functions": []})],
        ),
        (
            "Write plain-assert Python tests",
            vec![json!("```python\nassert cache_get(cache_put({}, 'k', 1), 'k') == 1\n```")],
        ),
        (
            "Implement the task below",
            vec![json!("```python\ndef cache_put(c, k, v):\n    return c\n```")],
        ),
        (
            "Diagnose the failure",
            vec![json!({
                "error_type": "AssertionError",
                "location": "cache_put",
                "root_cause": "value is never stored",
                "fix_instructions": "store v under k before returning",
                "confidence": 0.9
            })],
        ),
        (
            "Apply this fix",
            vec![json!(
                "```python\ndef cache_put(c, k, v):\n    c[k] = v\n    return c\n\ndef cache_get(c, k):\n    return c[k]\n```"
            )],
        ),
        (
            "Review this Python solution",
            vec![json!({"issues": [], "improved_code": null})],
        ),
        (
            "score each stage",
            vec![json!({
                "planning": 0.7, "research": 0.5, "testing": 0.7, "coding": 0.8,
                "analysis": "recovered after one fix", "improvements": ""
            })],
        ),
    ]);
    let harness = harness(
        model,
        ScriptedValidator::new(vec![
            failing_report("AssertionError: cache_get"),
            passing_report(),
        ]),
        WorkflowSettings::default(),
    );

    let task = Task::new(
        "Реализуй кэш с методами get и put.",
        TaskOptions {
            max_iterations: 2,
            ..Default::default()
        },
    );
    let events = run_and_collect(&harness, &task).await;

    let stages = stages_started(&events);
    let validations = stages.iter().filter(|s| *s == "validation").count();
    assert_eq!(validations, 2);
    assert!(stages.contains(&"debug".to_string()));
    assert!(stages.contains(&"fixing".to_string()));

    let results = final_results(&events);
    assert_eq!(results["success"], json!(true));
    let iteration = results["iteration"].as_u64().unwrap();
    assert!(iteration == 1 || iteration == 2);
    assert!(results["code"].as_str().unwrap().contains("c[k] = v"));
}

// Scenario 4: validation never passes with max_iterations = 1.
#[tokio::test]
async fn exhausted_fix_budget_ends_in_failed_reflection() {
    let model = PromptRouter::new(vec![
        (
            "Classify the user's request",
            vec![intent_json("create", "simple", 0.9)],
        ),
        (
            "Draft an implementation plan",
            vec![json!({"plan": "1. write broken code", "functions": []})],
        ),
        (
            "Write plain-assert Python tests",
            vec![json!("```python\nassert broken() == 1\n```")],
        ),
        (
            "Implement the task below",
            vec![json!("```python\ndef broken():\n    return 2\n```")],
        ),
        (
            "Diagnose the failure",
            vec![json!({
                "error_type": "AssertionError",
                "location": "broken",
                "root_cause": "wrong constant",
                "fix_instructions": "return 1",
                "confidence": 0.5
            })],
        ),
        (
            "Apply this fix",
            vec![json!("```python\ndef broken():\n    return 3\n```")],
        ),
        (
            "score each stage",
            vec![json!({
                "planning": 0.4, "research": 0.4, "testing": 0.4, "coding": 0.2,
                "analysis": "the fix loop never converged", "improvements": "tighten the plan"
            })],
        ),
    ]);
    let harness = harness(
        model,
        ScriptedValidator::new(vec![failing_report("AssertionError: broken")]),
        WorkflowSettings::default(),
    );

    let task = Task::new(
        "Сломай мне код специально: синтаксическая ошибка в def",
        TaskOptions {
            max_iterations: 1,
            ..Default::default()
        },
    );
    let events = run_and_collect(&harness, &task).await;

    let stages = stages_started(&events);
    let validations = stages.iter().filter(|s| *s == "validation").count();
    assert_eq!(validations, 2);
    assert!(stages.contains(&"reflection".to_string()));

    let results = final_results(&events);
    assert_eq!(results["success"], json!(false));
    assert_eq!(results["validation_results"]["all_passed"], json!(false));
    assert!(results["reflection_result"]["overall"].as_f64().unwrap() < 0.5);

    let (meta, _) = harness.store.load(&task.id).await.unwrap().unwrap();
    assert_eq!(meta.status, TaskStatus::Failed);
}

// Scenario 5: the debate finds a security issue and fixes it.
#[tokio::test]
async fn debate_finds_and_fixes_a_security_issue() {
    let unsafe_code = "```python\ndef run_query(db, user_id):\n    return db.execute(\"SELECT * FROM users WHERE id = \" + user_id)\n```";
    let safe_code = "```python\ndef run_query(db, user_id):\n    return db.execute(\"SELECT * FROM users WHERE id = ?\", (user_id,))\n```";

    let model = PromptRouter::new(vec![
        (
            "Classify the user's request",
            vec![intent_json("create", "medium", 0.9)],
        ),
        (
            "Draft an implementation plan",
            vec![json!({"plan": "1. build the query runner", "functions": []})],
        ),
        (
            "Write plain-assert Python tests",
            vec![json!("```python\nassert callable(run_query)\n```")],
        ),
        ("Implement the task below", vec![json!(unsafe_code)]),
        (
            "security reviewer",
            vec![
                json!({"issues": [{
                    "category": "security",
                    "severity": "critical",
                    "location": "run_query",
                    "description": "SQL injection via string concatenation",
                    "evidence": "\"SELECT ... \" + user_id",
                    "suggestion": "use a parameterized query"
                }]}),
                json!({"issues": []}),
            ],
        ),
        ("performance reviewer", vec![json!({"issues": []})]),
        ("correctness reviewer", vec![json!({"issues": []})]),
        ("Rewrite this Python solution", vec![json!(safe_code)]),
        (
            "score each stage",
            vec![json!({
                "planning": 0.8, "research": 0.6, "testing": 0.6, "coding": 0.8,
                "analysis": "debate caught an injection", "improvements": ""
            })],
        ),
    ]);
    let harness = harness(
        model,
        ScriptedValidator::new(vec![passing_report()]),
        WorkflowSettings::default(),
    );

    let task = Task::new(
        "Напиши функцию, которая выполняет SQL-запрос по user_id",
        TaskOptions::default(),
    );
    let events = run_and_collect(&harness, &task).await;

    assert!(stages_started(&events).contains(&"debate".to_string()));
    let debate_result = events
        .iter()
        .find_map(|e| match e {
            WorkflowEvent::DebateResult {
                total_issues,
                consensus,
                rounds,
                ..
            } => Some((*total_issues, *consensus, *rounds)),
            _ => None,
        })
        .expect("debate_result event");
    assert!(debate_result.0 >= 1);
    assert!(debate_result.1, "expected consensus");
    assert!(debate_result.2 <= atelier_agents::MAX_ROUNDS);

    let results = final_results(&events);
    let code = results["code"].as_str().unwrap();
    assert!(code.contains('?'), "code was not rewritten: {code}");
    assert_eq!(
        results["debate_result"]["issues"][0]["category"],
        json!("security")
    );
}

// Scenario 6 (replay half): resume replays recorded stage events.
#[tokio::test]
async fn resume_replays_the_recorded_run() {
    let model = PromptRouter::new(vec![
        (
            "Classify the user's request",
            vec![intent_json("greeting", "simple", 0.95)],
        ),
        ("Reply briefly", vec![json!("Hello!")]),
    ]);
    let harness = harness(
        model,
        ScriptedValidator::new(vec![]),
        WorkflowSettings::default(),
    );

    let task = Task::new("hi", TaskOptions::default());
    let _ = run_and_collect(&harness, &task).await;

    let mut rx = harness.engine.events().subscribe(&task.id);
    harness.engine.resume(&task.id).await.unwrap();

    let mut replayed = Vec::new();
    while let Some(event) = rx.recv().await {
        let terminal = event.is_terminal();
        replayed.push(event);
        if terminal {
            break;
        }
    }

    let stages = stages_started(&replayed);
    assert_eq!(stages, vec!["intent", "greeting"]);
    assert!(replayed.last().unwrap().is_terminal());
}
