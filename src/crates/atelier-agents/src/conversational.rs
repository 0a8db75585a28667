//! Terminal conversational stages: greeting/help and project analysis.

use crate::prompts;
use crate::support::params_for;
use atelier_analysis::{DependencyGraph, FileAnalysis, PythonAnalyzer};
use atelier_core::domain::IntentKind;
use atelier_core::error::WorkflowError;
use atelier_core::graph::{StageAgent, StageContext};
use atelier_core::state::AgentState;
use atelier_llm::{ChatMessage, LlmAdapter};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

pub const GREETING_STAGE: &str = "greeting";
pub const ANALYZE_STAGE: &str = "analyze_project";

const CANNED_GREETING: &str =
    "Hi! I generate Python code with tests, validate it, and review the result. \
     Describe what you need and I will build it.";

/// Short-circuit stage for greeting and help intents.
pub struct GreetingAgent {
    adapter: Arc<LlmAdapter>,
}

impl GreetingAgent {
    pub fn new(adapter: Arc<LlmAdapter>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl StageAgent for GreetingAgent {
    fn name(&self) -> &str {
        GREETING_STAGE
    }

    async fn execute(
        &self,
        state: &mut AgentState,
        _ctx: &StageContext,
    ) -> Result<Value, WorkflowError> {
        let help_requested = state
            .intent()
            .map(|i| i.kind == IntentKind::Help)
            .unwrap_or(false);
        let prompt = prompts::greeting(&state.task, help_requested);
        let params = params_for(state);

        // A failed chat call still yields a usable canned response; the
        // greeting path never escalates to a stage error.
        let message = match self
            .adapter
            .chat(&[ChatMessage::user(prompt)], &params)
            .await
        {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) | Err(_) => CANNED_GREETING.to_string(),
        };

        state.set_greeting_message(message.clone())?;
        Ok(json!({ "greeting_message": message }))
    }

    fn fallback(&self, state: &mut AgentState) {
        let _ = state.set_greeting_message(CANNED_GREETING.to_string());
    }
}

/// Terminal stage for `analyze` intents: structural report of the
/// configured project.
pub struct AnalyzeProjectAgent {
    project_root: Option<PathBuf>,
    analyzer: PythonAnalyzer,
}

impl AnalyzeProjectAgent {
    pub fn new(project_root: Option<PathBuf>) -> Self {
        Self {
            project_root,
            analyzer: PythonAnalyzer::new(),
        }
    }

    fn analyze(&self, root: &std::path::Path) -> (usize, Vec<FileAnalysis>) {
        let mut analyses = Vec::new();
        let mut files = 0;
        for entry in crate::support::walk_python_files(root) {
            files += 1;
            analyses.push(self.analyzer.analyze_file(&entry));
        }
        (files, analyses)
    }
}

#[async_trait]
impl StageAgent for AnalyzeProjectAgent {
    fn name(&self) -> &str {
        ANALYZE_STAGE
    }

    async fn execute(
        &self,
        state: &mut AgentState,
        _ctx: &StageContext,
    ) -> Result<Value, WorkflowError> {
        let Some(root) = self.project_root.as_deref() else {
            let message = "No project root is configured; nothing to analyze.".to_string();
            state.set_greeting_message(message.clone())?;
            return Ok(json!({ "analysis": message }));
        };

        let (files, analyses) = self.analyze(root);
        let graph = DependencyGraph::from_analyses(analyses.iter());
        let functions: usize = analyses.iter().map(|a| a.all_functions().count()).sum();
        let classes: usize = analyses.iter().map(|a| a.classes.len()).sum();
        let failed: usize = analyses.iter().filter(|a| a.error.is_some()).count();
        let central = graph.important_entities(5);

        let mut report = format!(
            "Project `{}`: {files} Python files, {functions} functions, {classes} classes",
            root.display()
        );
        if failed > 0 {
            report.push_str(&format!(" ({failed} unparseable)"));
        }
        if !central.is_empty() {
            let names: Vec<&str> = central.iter().map(|(n, _)| n.as_str()).collect();
            report.push_str(&format!(". Most central entities: {}", names.join(", ")));
        }
        report.push('.');

        state.set_greeting_message(report.clone())?;
        Ok(json!({
            "analysis": report,
            "files": files,
            "functions": functions,
            "classes": classes,
            "central_entities": central.iter().map(|(n, _)| n.clone()).collect::<Vec<_>>(),
        }))
    }

    fn fallback(&self, state: &mut AgentState) {
        let _ = state.set_greeting_message("Project analysis is unavailable.".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::task::{Task, TaskOptions};
    use atelier_core::stream::EventStreamManager;
    use tokio::sync::watch;

    fn ctx() -> StageContext {
        let manager = Arc::new(EventStreamManager::new());
        let (_tx, rx) = watch::channel(false);
        // The sender is dropped; agents under test never cancel.
        StageContext::new(manager.emitter("t", ANALYZE_STAGE), rx)
    }

    fn state() -> AgentState {
        let task = Task::new("проанализируй проект", TaskOptions::default());
        AgentState::for_task(&task, "m", false)
    }

    #[tokio::test]
    async fn analyze_without_root_reports_gracefully() {
        let agent = AnalyzeProjectAgent::new(None);
        let mut s = state();
        let summary = agent.execute(&mut s, &ctx()).await.unwrap();
        assert!(summary["analysis"].as_str().unwrap().contains("No project root"));
        assert!(s.greeting_message().is_some());
    }

    #[tokio::test]
    async fn analyze_reports_structure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("app.py"),
            "def main():\n    \"\"\"Entry.\"\"\"\n    return helper()\n\ndef helper():\n    return 1\n",
        )
        .unwrap();

        let agent = AnalyzeProjectAgent::new(Some(dir.path().to_path_buf()));
        let mut s = state();
        let summary = agent.execute(&mut s, &ctx()).await.unwrap();
        assert_eq!(summary["files"], json!(1));
        assert_eq!(summary["functions"], json!(2));
        let report = s.greeting_message().unwrap();
        assert!(report.contains("1 Python files"));
        assert!(report.contains("helper"));
    }
}
