//! Stage output types shared across agents, the engine, and the API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The ten recognized task intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentKind {
    Greeting,
    Help,
    Create,
    Modify,
    Debug,
    Optimize,
    Explain,
    Test,
    Refactor,
    Analyze,
}

impl IntentKind {
    /// Whether this intent short-circuits to a conversational response.
    pub fn is_conversational(&self) -> bool {
        matches!(self, IntentKind::Greeting | IntentKind::Help)
    }
}

/// Estimated task complexity, drives the coding strategy and debate gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl Complexity {
    /// One step down, saturating at `Simple`.
    pub fn downgraded(self) -> Self {
        match self {
            Complexity::Complex => Complexity::Medium,
            _ => Complexity::Simple,
        }
    }
}

/// Output of the intent classification stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentResult {
    #[serde(rename = "type")]
    pub kind: IntentKind,
    /// Classifier confidence in `[0, 1]`.
    pub confidence: f64,
    pub complexity: Complexity,
    pub reasoning: String,
}

impl IntentResult {
    /// Neutral fallback used when the classifier fails entirely.
    pub fn fallback() -> Self {
        Self {
            kind: IntentKind::Create,
            confidence: 0.0,
            complexity: Complexity::Medium,
            reasoning: "intent classification unavailable".to_string(),
        }
    }
}

/// One function of a structured plan, in topological order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub signature: String,
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Check that every spec's dependencies refer only to names preceding it.
///
/// A list failing this check is discarded in favor of the free-text plan.
pub fn specs_topologically_ordered(specs: &[FunctionSpec]) -> bool {
    let mut seen = std::collections::HashSet::new();
    for spec in specs {
        if spec.dependencies.iter().any(|d| !seen.contains(d.as_str())) {
            return false;
        }
        seen.insert(spec.name.as_str());
    }
    true
}

/// Result of one validation tool run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolReport {
    pub success: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub errors: String,
    #[serde(default)]
    pub issues: String,
}

impl ToolReport {
    pub fn passed(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: truncate_report(output.into()),
            ..Default::default()
        }
    }

    pub fn failed(errors: impl Into<String>) -> Self {
        Self {
            success: false,
            errors: truncate_report(errors.into()),
            ..Default::default()
        }
    }

    pub fn with_issues(mut self, issues: impl Into<String>) -> Self {
        self.issues = truncate_report(issues.into());
        self
    }
}

/// Validation tool output is truncated to this many characters.
pub const REPORT_TRUNCATE_CHARS: usize = 500;

fn truncate_report(s: String) -> String {
    if s.chars().count() <= REPORT_TRUNCATE_CHARS {
        return s;
    }
    s.chars().take(REPORT_TRUNCATE_CHARS).collect()
}

/// Aggregate validation verdict over the three tool passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub pytest: ToolReport,
    pub mypy: ToolReport,
    pub bandit: ToolReport,
    pub all_passed: bool,
}

impl ValidationReport {
    pub fn new(pytest: ToolReport, mypy: ToolReport, bandit: ToolReport) -> Self {
        let all_passed = pytest.success && mypy.success && bandit.success;
        Self {
            pytest,
            mypy,
            bandit,
            all_passed,
        }
    }

    /// A report with every sub-report failed, used as the stage fallback.
    pub fn failed(reason: &str) -> Self {
        Self::new(
            ToolReport::failed(reason),
            ToolReport::failed(reason),
            ToolReport::failed(reason),
        )
    }

    /// First failing tool output, for the debugger prompt.
    pub fn first_failure(&self) -> Option<&str> {
        [&self.pytest, &self.mypy, &self.bandit]
            .into_iter()
            .find(|r| !r.success)
            .map(|r| r.errors.as_str())
    }
}

/// Output of the debugging stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugResult {
    pub error_type: String,
    pub location: String,
    pub root_cause: String,
    pub fix_instructions: String,
    /// Debugger confidence in `[0, 1]`; below 0.4 the fix is speculative.
    pub confidence: f64,
}

/// Per-stage quality scores produced by the reflection stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionResult {
    pub planning: f64,
    pub research: f64,
    pub testing: f64,
    pub coding: f64,
    pub overall: f64,
    pub analysis: String,
    pub improvements: String,
}

impl ReflectionResult {
    /// Combine sub-scores with the fixed stage weights.
    pub fn weighted(
        planning: f64,
        research: f64,
        testing: f64,
        coding: f64,
        analysis: String,
        improvements: String,
    ) -> Self {
        let overall = 0.25 * planning + 0.2 * research + 0.2 * testing + 0.35 * coding;
        Self {
            planning,
            research,
            testing,
            coding,
            overall: overall.clamp(0.0, 1.0),
            analysis,
            improvements,
        }
    }
}

/// Review dimensions covered by the debate reviewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueCategory {
    Security,
    Performance,
    Correctness,
    Maintainability,
    Style,
}

/// Severity of a review issue; `Critical` and `High` block consensus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl IssueSeverity {
    pub fn is_blocking(&self) -> bool {
        matches!(self, IssueSeverity::High | IssueSeverity::Critical)
    }
}

/// A single issue raised by a reviewer during the debate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewIssue {
    pub category: IssueCategory,
    pub severity: IssueSeverity,
    pub location: String,
    pub description: String,
    #[serde(default)]
    pub evidence: String,
    #[serde(default)]
    pub suggestion: String,
    /// Tag of the reviewer that raised the issue.
    pub reviewer: String,
}

/// Terminal summary of a multi-reviewer debate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateReport {
    pub total_issues: usize,
    pub fixed_issues: usize,
    pub rounds: usize,
    /// True when the final round produced no critical or high issue.
    pub consensus: bool,
    #[serde(default)]
    pub issues: Vec<ReviewIssue>,
}

/// Recorded outcome of one executed stage, kept for resume replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: String,
    pub result: Value,
    pub completed_at: DateTime<Utc>,
    /// Set when the stage ended with `stage_error` and a fallback value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
