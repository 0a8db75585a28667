//! Prompt templates for the stage agents.
//!
//! All prompts instruct the model to answer for Python 3, matching the
//! validator toolchain. Schema-constrained calls keep their schemas next to
//! the agent that owns them.

use atelier_core::domain::{DebugResult, IntentResult, ReviewIssue};
use atelier_retrieval::CodeExample;

pub fn intent(task: &str) -> String {
    format!(
        "Classify the user's request into exactly one intent type out of: \
         greeting, help, create, modify, debug, optimize, explain, test, refactor, analyze.\n\
         Estimate complexity as simple, medium or complex, give a confidence \
         between 0 and 1, and explain your reasoning in one or two sentences.\n\n\
         Request:\n{task}"
    )
}

pub fn greeting(task: &str, help_requested: bool) -> String {
    if help_requested {
        format!(
            "You are a local code-generation assistant. The user asks what you \
             can do. Answer briefly in the language of the request: you plan, \
             research, generate Python code with tests, validate it, debug \
             failures, and review the result. Request:\n{task}"
        )
    } else {
        format!(
            "You are a friendly local code-generation assistant. Reply briefly \
             to this greeting, in its language, and mention you can generate \
             and validate Python code:\n{task}"
        )
    }
}

pub fn plan(task: &str, intent: &IntentResult, context: Option<&str>) -> String {
    let mut prompt = format!(
        "Draft an implementation plan for this {complexity:?} {kind:?} task, as a \
         short numbered list of steps, then list the functions to implement in \
         dependency order (a function may only depend on ones listed before it).\n\n\
         Task:\n{task}\n",
        complexity = intent.complexity,
        kind = intent.kind,
    );
    if let Some(context) = context.filter(|c| !c.is_empty()) {
        prompt.push_str(&format!("\nRelevant context:\n{context}\n"));
    }
    prompt
}

pub fn tests(task: &str, plan: &str) -> String {
    format!(
        "Write plain-assert Python tests for the task below, following the \
         plan. Output only the test code in a single ```python block. Tests \
         must be self-contained: no imports of the solution module, the \
         functions will be defined in the same namespace.\n\n\
         Task:\n{task}\n\nPlan:\n{plan}"
    )
}

pub fn code(task: &str, plan: &str, tests: &str, context: Option<&str>, examples: &[CodeExample]) -> String {
    let mut prompt = format!(
        "Implement the task below in Python 3. Follow the plan and make the \
         provided tests pass. Output only the implementation in a single \
         ```python block, with type hints and docstrings.\n\n\
         Task:\n{task}\n\nPlan:\n{plan}\n\nTests:\n{tests}\n"
    );
    if let Some(context) = context.filter(|c| !c.is_empty()) {
        prompt.push_str(&format!("\nContext:\n{context}\n"));
    }
    if !examples.is_empty() {
        prompt.push_str("\nReference examples (adapt the approach, do not copy verbatim):\n");
        for (i, example) in examples.iter().enumerate() {
            prompt.push_str(&format!(
                "\n# Example {n}: {desc}\n```python\n{code}\n```\n",
                n = i + 1,
                desc = example.description,
                code = example.code,
            ));
        }
    }
    prompt
}

pub fn no_copy_addendum() -> &'static str {
    "\nYour previous draft copied a reference example too closely. Write an \
     original implementation with different structure and naming."
}

pub fn function_increment(
    task: &str,
    name: &str,
    signature: &str,
    description: &str,
    accumulated: &str,
) -> String {
    format!(
        "Implement exactly one Python function for the task below.\n\
         Function: {name}\nSignature: {signature}\nPurpose: {description}\n\n\
         Code written so far (your function may use it):\n```python\n{accumulated}\n```\n\n\
         Task:\n{task}\n\nOutput only the new function in a single ```python block."
    )
}

pub fn function_fix(name: &str, code: &str, error: &str) -> String {
    format!(
        "The function `{name}` fails validation.\n\nCurrent code:\n```python\n{code}\n```\n\n\
         Error:\n{error}\n\nOutput the corrected version of `{name}` only, in a \
         single ```python block. Keep its signature unchanged."
    )
}

pub fn debug(code: &str, tests: &str, plan: &str, failure: &str) -> String {
    format!(
        "The generated code fails validation. Diagnose the failure.\n\n\
         Failure output:\n{failure}\n\nCode:\n```python\n{code}\n```\n\n\
         Tests:\n```python\n{tests}\n```\n\nPlan:\n{plan}\n\n\
         Identify the error type, its location, the root cause, concrete fix \
         instructions, and your confidence between 0 and 1."
    )
}

pub fn fix(code: &str, debug: &DebugResult) -> String {
    format!(
        "Apply this fix to the code. Preserve every existing function \
         signature unless the instructions explicitly change one. Output the \
         complete corrected file in a single ```python block.\n\n\
         Root cause: {root_cause}\nLocation: {location}\n\
         Instructions: {instructions}\n\nCode:\n```python\n{code}\n```",
        root_cause = debug.root_cause,
        location = debug.location,
        instructions = debug.fix_instructions,
    )
}

pub fn reflection(
    task: &str,
    plan: Option<&str>,
    context: Option<&str>,
    tests: Option<&str>,
    code: Option<&str>,
    validation_passed: bool,
) -> String {
    format!(
        "Review this completed code-generation run and score each stage \
         between 0 and 1: planning, research, testing, coding. Add a short \
         analysis and concrete improvements.\n\n\
         Task:\n{task}\n\nPlan:\n{plan}\n\nResearch context present: {ctx}\n\n\
         Tests:\n{tests}\n\nCode:\n{code}\n\nValidation passed: {validation_passed}",
        plan = plan.unwrap_or("(none)"),
        ctx = context.map(|c| !c.is_empty()).unwrap_or(false),
        tests = tests.unwrap_or("(none)"),
        code = code.unwrap_or("(none)"),
    )
}

pub fn critic(task: &str, code: &str) -> String {
    format!(
        "Review this Python solution for correctness, security and style. \
         List concrete issues with severity (critical, high, medium, low). If \
         an issue warrants it, provide a corrected version of the whole file \
         as `improved_code`; otherwise leave it null.\n\n\
         Task:\n{task}\n\nCode:\n```python\n{code}\n```"
    )
}

pub fn reviewer(focus: &str, task: &str, code: &str, known_issues: &[ReviewIssue]) -> String {
    let mut prompt = format!(
        "You are a {focus} reviewer. Examine this Python solution strictly \
         from the {focus} angle and report concrete issues with severity \
         (critical, high, medium, low), location, evidence and a suggestion. \
         Report nothing when the code is acceptable.\n\n\
         Task:\n{task}\n\nCode:\n```python\n{code}\n```\n"
    );
    if !known_issues.is_empty() {
        prompt.push_str("\nAlready reported (do not repeat):\n");
        for issue in known_issues {
            prompt.push_str(&format!(
                "- [{severity:?}] {location}: {description}\n",
                severity = issue.severity,
                location = issue.location,
                description = issue.description,
            ));
        }
    }
    prompt
}

pub fn debate_fix(task: &str, code: &str, blocking: &[ReviewIssue]) -> String {
    let mut prompt = format!(
        "Rewrite this Python solution to resolve the blocking review issues. \
         Change only what the issues require and output the complete file in \
         a single ```python block.\n\nTask:\n{task}\n\nCode:\n```python\n{code}\n```\n\nIssues:\n"
    );
    for issue in blocking {
        prompt.push_str(&format!(
            "- [{severity:?}/{category:?}] {location}: {description} — {suggestion}\n",
            severity = issue.severity,
            category = issue.category,
            location = issue.location,
            description = issue.description,
            suggestion = issue.suggestion,
        ));
    }
    prompt
}
