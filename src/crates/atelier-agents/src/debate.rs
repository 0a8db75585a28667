//! Critique stages: the single critic and the multi-reviewer debate.

use crate::prompts;
use crate::support::{extract_code, params_for, stage_err};
use atelier_core::domain::{DebateReport, IssueCategory, IssueSeverity, ReviewIssue};
use atelier_core::error::WorkflowError;
use atelier_core::event::{LogLevel, WorkflowEvent};
use atelier_core::graph::{StageAgent, StageContext};
use atelier_core::state::AgentState;
use atelier_llm::{GenerationParams, LlmAdapter};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

pub const CRITIC_STAGE: &str = "critic";
pub const DEBATE_STAGE: &str = "debate";

/// Upper bound on debate rounds.
pub const MAX_ROUNDS: usize = 3;

const ROUND_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Debug, Deserialize)]
struct RawIssue {
    category: IssueCategory,
    severity: IssueSeverity,
    #[serde(default)]
    location: String,
    description: String,
    #[serde(default)]
    evidence: String,
    #[serde(default)]
    suggestion: String,
}

impl RawIssue {
    fn into_issue(self, reviewer: &str) -> ReviewIssue {
        ReviewIssue {
            category: self.category,
            severity: self.severity,
            location: self.location,
            description: self.description,
            evidence: self.evidence,
            suggestion: self.suggestion,
            reviewer: reviewer.to_string(),
        }
    }
}

fn issues_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "issues": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "category": {
                            "type": "string",
                            "enum": ["security", "performance", "correctness", "maintainability", "style"]
                        },
                        "severity": {
                            "type": "string",
                            "enum": ["critical", "high", "medium", "low"]
                        },
                        "location": {"type": "string"},
                        "description": {"type": "string"},
                        "evidence": {"type": "string"},
                        "suggestion": {"type": "string"}
                    },
                    "required": ["category", "severity", "description"]
                }
            }
        },
        "required": ["issues"]
    })
}

/// Lightweight single-model critique; may rewrite the code once.
pub struct CriticAgent {
    adapter: Arc<LlmAdapter>,
}

impl CriticAgent {
    pub fn new(adapter: Arc<LlmAdapter>) -> Self {
        Self { adapter }
    }

    fn schema() -> Value {
        let mut schema = issues_schema();
        schema["properties"]["improved_code"] = json!({"type": ["string", "null"]});
        schema
    }
}

#[derive(Debug, Deserialize)]
struct CriticVerdict {
    #[serde(default)]
    issues: Vec<RawIssue>,
    #[serde(default)]
    improved_code: Option<String>,
}

#[async_trait]
impl StageAgent for CriticAgent {
    fn name(&self) -> &str {
        CRITIC_STAGE
    }

    async fn execute(
        &self,
        state: &mut AgentState,
        _ctx: &StageContext,
    ) -> Result<Value, WorkflowError> {
        let code = state.code().unwrap_or("").to_string();
        if code.trim().is_empty() {
            return Ok(json!({ "issues": 0, "rewrote": false }));
        }
        let prompt = prompts::critic(&state.task, &code);
        let params = params_for(state);

        let verdict: CriticVerdict = self
            .adapter
            .generate_with_fallback(&prompt, &Self::schema(), &params, |_text| {
                Some(CriticVerdict {
                    issues: Vec::new(),
                    improved_code: None,
                })
            })
            .await
            .map_err(|e| stage_err(CRITIC_STAGE, e))?;

        let mut rewrote = false;
        if let Some(improved) = verdict
            .improved_code
            .map(|c| extract_code(&c))
            .filter(|c| !c.trim().is_empty() && *c != code)
        {
            state.set_code(improved);
            rewrote = true;
        }

        let issues: Vec<ReviewIssue> = verdict
            .issues
            .into_iter()
            .map(|i| i.into_issue("critic"))
            .collect();
        Ok(json!({ "issues": issues, "rewrote": rewrote }))
    }
}

/// Reviewer roles taking part in the debate.
#[derive(Debug, Clone)]
pub struct DebateSettings {
    pub reviewers: Vec<String>,
    pub max_rounds: usize,
    /// Model override for reviewers; the task model is used when empty.
    pub reviewer_model: Option<String>,
}

impl Default for DebateSettings {
    fn default() -> Self {
        Self {
            reviewers: vec![
                "security".to_string(),
                "performance".to_string(),
                "correctness".to_string(),
            ],
            max_rounds: MAX_ROUNDS,
            reviewer_model: None,
        }
    }
}

/// Parallel multi-reviewer critique with bounded fix rounds.
///
/// Each round runs every reviewer concurrently; a reviewer error drops that
/// reviewer's findings for the round. Any critical or high issue triggers an
/// implementer rewrite and another round; consensus is a round with no
/// blocking issue.
pub struct DebateAgent {
    adapter: Arc<LlmAdapter>,
    settings: DebateSettings,
}

impl DebateAgent {
    pub fn new(adapter: Arc<LlmAdapter>, settings: DebateSettings) -> Self {
        Self { adapter, settings }
    }

    fn reviewer_params(&self, base: &GenerationParams) -> GenerationParams {
        let mut params = base.clone();
        if let Some(model) = self
            .settings
            .reviewer_model
            .as_ref()
            .filter(|m| !m.is_empty())
        {
            params.model = Some(model.clone());
        }
        params
    }

    async fn run_reviewer(
        &self,
        focus: &str,
        task: &str,
        code: &str,
        known: &[ReviewIssue],
        params: &GenerationParams,
    ) -> Result<Vec<ReviewIssue>, String> {
        #[derive(Deserialize)]
        struct Issues {
            #[serde(default)]
            issues: Vec<RawIssue>,
        }

        let prompt = prompts::reviewer(focus, task, code, known);
        let result: Issues = self
            .adapter
            .generate_structured(&prompt, &issues_schema(), params)
            .await
            .map_err(|e| e.to_string())?;
        Ok(result
            .issues
            .into_iter()
            .map(|i| i.into_issue(focus))
            .collect())
    }
}

fn issue_key(issue: &ReviewIssue) -> (IssueCategory, String, String) {
    (
        issue.category,
        issue.location.trim().to_lowercase(),
        issue.description.trim().to_lowercase(),
    )
}

#[async_trait]
impl StageAgent for DebateAgent {
    fn name(&self) -> &str {
        DEBATE_STAGE
    }

    async fn execute(
        &self,
        state: &mut AgentState,
        ctx: &StageContext,
    ) -> Result<Value, WorkflowError> {
        let task = state.task.clone();
        let base_params = params_for(state);
        let reviewer_params = self.reviewer_params(&base_params);
        let max_rounds = self.settings.max_rounds.min(MAX_ROUNDS).max(1);

        let mut all_issues: Vec<ReviewIssue> = Vec::new();
        let mut seen: HashSet<(IssueCategory, String, String)> = HashSet::new();
        let mut fixed_issues = 0usize;
        let mut rounds = 0usize;
        let mut consensus = false;

        for round in 1..=max_rounds {
            rounds = round;
            let code = state.code().unwrap_or("").to_string();

            for reviewer in &self.settings.reviewers {
                ctx.emitter
                    .publish(WorkflowEvent::DebateProgress {
                        round,
                        max_rounds,
                        reviewer: reviewer.clone(),
                        status: "reviewing".to_string(),
                        issue: None,
                    })
                    .await;
            }

            let review_futures = self.settings.reviewers.iter().map(|reviewer| {
                self.run_reviewer(reviewer, &task, &code, &all_issues, &reviewer_params)
            });
            let outcome =
                tokio::time::timeout(ROUND_TIMEOUT, futures::future::join_all(review_futures))
                    .await;
            let results = match outcome {
                Ok(results) => results,
                Err(_) => {
                    ctx.emitter
                        .log(LogLevel::Warning, format!("debate round {round} timed out"))
                        .await;
                    break;
                }
            };

            // Issues accumulate in completion order; severity filtering
            // below is deterministic regardless.
            let mut round_issues: Vec<ReviewIssue> = Vec::new();
            for (reviewer, result) in self.settings.reviewers.iter().zip(results) {
                match result {
                    Ok(issues) => round_issues.extend(issues),
                    Err(error) => {
                        ctx.emitter
                            .log(
                                LogLevel::Warning,
                                format!("reviewer `{reviewer}` failed, dropping its findings: {error}"),
                            )
                            .await;
                    }
                }
            }

            let fresh: Vec<ReviewIssue> = round_issues
                .into_iter()
                .filter(|issue| seen.insert(issue_key(issue)))
                .collect();
            for issue in &fresh {
                ctx.emitter
                    .publish(WorkflowEvent::DebateProgress {
                        round,
                        max_rounds,
                        reviewer: issue.reviewer.clone(),
                        status: "issue_found".to_string(),
                        issue: Some(issue.clone()),
                    })
                    .await;
            }
            all_issues.extend(fresh.iter().cloned());

            let blocking: Vec<ReviewIssue> = fresh
                .iter()
                .filter(|i| i.severity.is_blocking())
                .cloned()
                .collect();
            if blocking.is_empty() {
                consensus = true;
                break;
            }

            let fix_prompt = prompts::debate_fix(&task, &code, &blocking);
            match self.adapter.generate(&fix_prompt, &base_params).await {
                Ok(response) => {
                    let rewritten = extract_code(&response);
                    if !rewritten.trim().is_empty() {
                        state.set_code(rewritten);
                        fixed_issues += blocking.len();
                    }
                }
                Err(error) => {
                    ctx.emitter
                        .log(LogLevel::Warning, format!("debate fix failed: {error}"))
                        .await;
                }
            }
        }

        let report = DebateReport {
            total_issues: all_issues.len(),
            fixed_issues,
            rounds,
            consensus,
            issues: all_issues,
        };
        ctx.emitter
            .publish(WorkflowEvent::DebateResult {
                total_issues: report.total_issues,
                fixed_issues: report.fixed_issues,
                rounds: report.rounds,
                consensus: report.consensus,
            })
            .await;

        let summary = serde_json::to_value(&report)
            .map_err(|e| WorkflowError::State(e.to_string()))?;
        state.set_debate(report)?;
        Ok(summary)
    }
}
