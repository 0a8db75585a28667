//! Quick validator: fast verdicts on generated code without a test runner.
//!
//! Runs a small harness in a separate `python3` process under a scratch
//! directory: parse and compile first, then — only when tests are provided —
//! execute code and tests in a shared namespace. The subprocess is killed at
//! the time budget. Generated code never executes in-process.

use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Outcome of a quick validation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickVerdict {
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QuickVerdict {
    fn pass() -> Self {
        Self {
            passed: true,
            error: None,
        }
    }

    fn fail(error: impl Into<String>) -> Self {
        Self {
            passed: false,
            error: Some(error.into()),
        }
    }
}

/// Failure classification derived from the harness exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuickFailure {
    Syntax,
    Runtime,
    Assertion,
    TestError,
}

const HARNESS: &str = r#"
import sys
import traceback


def _load(name):
    with open(name, "r", encoding="utf-8") as fh:
        return fh.read()


source = _load("solution.py")
try:
    compiled = compile(source, "solution.py", "exec")
except SyntaxError as exc:
    print("SYNTAX line %s: %s" % (exc.lineno, exc.msg), file=sys.stderr)
    sys.exit(10)

tests = _load("tests.py")
if not tests.strip():
    sys.exit(0)

namespace = {"__name__": "__main__"}
try:
    exec(compiled, namespace)
except Exception:
    traceback.print_exc()
    sys.exit(11)

try:
    exec(compile(tests, "tests.py", "exec"), namespace)
except AssertionError:
    traceback.print_exc()
    sys.exit(12)
except Exception:
    traceback.print_exc()
    sys.exit(13)

sys.exit(0)
"#;

/// Subprocess-backed quick validator.
#[derive(Debug, Clone)]
pub struct QuickValidator {
    python: String,
    timeout: Duration,
}

impl Default for QuickValidator {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

impl QuickValidator {
    pub fn new(python: impl Into<String>, timeout: Duration) -> Self {
        Self {
            python: python.into(),
            timeout,
        }
    }

    /// Validate code against optional tests.
    ///
    /// Empty tests stop after the compile check. Over the time budget the
    /// verdict is `{passed: false, error: "timeout"}`.
    pub async fn validate(&self, code: &str, tests: &str) -> QuickVerdict {
        let scratch = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => return QuickVerdict::fail(format!("scratch dir failed: {e}")),
        };
        let dir = scratch.path();
        for (name, content) in [
            ("solution.py", code),
            ("tests.py", tests),
            ("_runner.py", HARNESS),
        ] {
            if let Err(e) = tokio::fs::write(dir.join(name), content).await {
                return QuickVerdict::fail(format!("write {name} failed: {e}"));
            }
        }

        let child = Command::new(&self.python)
            .arg("_runner.py")
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) => return QuickVerdict::fail(format!("python3 not available: {e}")),
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return QuickVerdict::fail(format!("harness failed: {e}")),
            Err(_) => return QuickVerdict::fail("timeout"),
        };

        if output.status.success() {
            return QuickVerdict::pass();
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let classified = classify(output.status.code(), &stderr);
        QuickVerdict::fail(classified)
    }

    /// Syntax and compile check only.
    pub async fn check_syntax(&self, code: &str) -> QuickVerdict {
        self.validate(code, "").await
    }
}

/// Map harness exit codes to a labeled error string with the stderr tail.
fn classify(code: Option<i32>, stderr: &str) -> String {
    let label = match code {
        Some(10) => Some(QuickFailure::Syntax),
        Some(11) => Some(QuickFailure::Runtime),
        Some(12) => Some(QuickFailure::Assertion),
        Some(13) => Some(QuickFailure::TestError),
        _ => None,
    };
    let tail = stderr_tail(stderr, 12);
    match label {
        Some(QuickFailure::Syntax) => format!("SyntaxError: {tail}"),
        Some(QuickFailure::Runtime) => format!("runtime error executing code: {tail}"),
        Some(QuickFailure::Assertion) => format!("AssertionError: {tail}"),
        Some(QuickFailure::TestError) => format!("test execution error: {tail}"),
        None => format!("harness exited with {code:?}: {tail}"),
    }
}

fn stderr_tail(stderr: &str, lines: usize) -> String {
    let all: Vec<&str> = stderr.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}
