//! Full validation pass: test execution, static typing, security lint.
//!
//! Produces the three-part [`ValidationReport`] the workflow routes on. A
//! tool that cannot run at all marks only its own sub-report failed; the
//! other passes still execute.

use crate::quick::{QuickValidator, QuickVerdict};
use atelier_core::domain::{ToolReport, ValidationReport};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Validation seam used by the validator stage.
#[async_trait]
pub trait CodeValidator: Send + Sync {
    /// Full three-tool validation.
    async fn validate(&self, code: &str, tests: &str) -> ValidationReport;

    /// Fast syntax/compile/test verdict used to gate generation steps.
    async fn quick(&self, code: &str, tests: &str) -> QuickVerdict;
}

/// Subprocess-backed validator running the Python toolchain.
#[derive(Debug, Clone)]
pub struct ToolValidator {
    quick: QuickValidator,
    python: String,
    tool_timeout: Duration,
}

impl Default for ToolValidator {
    fn default() -> Self {
        Self {
            quick: QuickValidator::default(),
            python: "python3".to_string(),
            tool_timeout: Duration::from_secs(30),
        }
    }
}

impl ToolValidator {
    pub fn new(python: impl Into<String>, quick: QuickValidator, tool_timeout: Duration) -> Self {
        Self {
            quick,
            python: python.into(),
            tool_timeout,
        }
    }

    async fn run_tool(&self, dir: &Path, tool: &str, args: &[&str]) -> ToolReport {
        let child = Command::new(&self.python)
            .arg("-m")
            .arg(tool)
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) => return ToolReport::failed(format!("{tool} failed to run: {e}")),
        };

        let output = match tokio::time::timeout(self.tool_timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return ToolReport::failed(format!("{tool} failed: {e}")),
            Err(_) => return ToolReport::failed(format!("{tool} timed out")),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if output.status.success() {
            ToolReport::passed(stdout)
        } else if stderr.contains("No module named") {
            ToolReport::failed(format!("{tool} is not installed"))
        } else {
            ToolReport::failed(format!("{stdout}\n{stderr}")).with_issues(stdout)
        }
    }
}

#[async_trait]
impl CodeValidator for ToolValidator {
    async fn validate(&self, code: &str, tests: &str) -> ValidationReport {
        let scratch = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => return ValidationReport::failed(&format!("scratch dir failed: {e}")),
        };
        let dir = scratch.path();
        for (name, content) in [("solution.py", code), ("tests.py", tests)] {
            if let Err(e) = tokio::fs::write(dir.join(name), content).await {
                return ValidationReport::failed(&format!("write {name} failed: {e}"));
            }
        }

        // Test execution first; its verdict comes from the quick harness so
        // failures are classified consistently with the incremental coder.
        let verdict = self.quick.validate(code, tests).await;
        let pytest = if verdict.passed {
            ToolReport::passed("all tests passed")
        } else {
            ToolReport::failed(verdict.error.unwrap_or_else(|| "tests failed".to_string()))
        };

        let mypy = self
            .run_tool(
                dir,
                "mypy",
                &["--ignore-missing-imports", "--no-error-summary", "solution.py"],
            )
            .await;
        let bandit = self.run_tool(dir, "bandit", &["-q", "solution.py"]).await;

        ValidationReport::new(pytest, mypy, bandit)
    }

    async fn quick(&self, code: &str, tests: &str) -> QuickVerdict {
        self.quick.validate(code, tests).await
    }
}
