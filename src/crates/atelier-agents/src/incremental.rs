//! Incremental coding: per-function generation with immediate validation.
//!
//! Complex tasks are built one function at a time in plan order. Each
//! candidate is appended to the accumulated code and gated by the quick
//! validator; a failing function gets targeted fix prompts, bounded by
//! `max_fix_attempts`. Progress is externalized as `incremental_progress`
//! events, strictly in plan order.

use crate::prompts;
use crate::support::{extract_code, stage_err};
use atelier_analysis::CodeValidator;
use atelier_core::domain::{Complexity, FunctionSpec};
use atelier_core::error::WorkflowError;
use atelier_core::event::{IncrementalStatus, ProgressCounter, WorkflowEvent};
use atelier_core::stream::EventEmitter;
use atelier_llm::{GenerationParams, LlmAdapter};

/// Incremental-coding policy.
#[derive(Debug, Clone)]
pub struct IncrementalSettings {
    pub enabled: bool,
    /// Minimum task complexity that triggers per-function generation.
    pub min_complexity: Complexity,
    /// Fix attempts per function before moving on.
    pub max_fix_attempts: u32,
}

impl Default for IncrementalSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_complexity: Complexity::Complex,
            max_fix_attempts: 3,
        }
    }
}

pub(crate) struct IncrementalRun<'a> {
    pub adapter: &'a LlmAdapter,
    pub validator: &'a dyn CodeValidator,
    pub emitter: &'a EventEmitter,
    pub params: &'a GenerationParams,
    pub task: &'a str,
    pub tests: &'a str,
    pub max_fix_attempts: u32,
}

impl IncrementalRun<'_> {
    /// Generate every function of the plan, returning the accumulated file.
    pub async fn generate(&self, specs: &[FunctionSpec]) -> Result<String, WorkflowError> {
        let stage = self.emitter.stage().to_string();
        let total = specs.len();
        let mut accumulated = String::new();

        for (position, spec) in specs.iter().enumerate() {
            let progress = ProgressCounter {
                current: position + 1,
                total,
            };
            self.emit(spec, IncrementalStatus::Generating, 0, progress).await;

            let prompt = prompts::function_increment(
                self.task,
                &spec.name,
                &spec.signature,
                &spec.description,
                &accumulated,
            );
            let response = self
                .adapter
                .generate(&prompt, self.params)
                .await
                .map_err(|e| stage_err(&stage, e))?;
            let mut candidate = extract_code(&response);

            self.emit(spec, IncrementalStatus::Validating, 0, progress).await;
            let mut verdict = self
                .validator
                .quick(&join(&accumulated, &candidate), self.tests)
                .await;

            let mut attempts = 0;
            while !verdict.passed && attempts < self.max_fix_attempts {
                attempts += 1;
                self.emit(spec, IncrementalStatus::Fixing, attempts, progress).await;

                let error = verdict.error.clone().unwrap_or_default();
                let fix_prompt = prompts::function_fix(&spec.name, &candidate, &error);
                let fixed = self
                    .adapter
                    .generate(&fix_prompt, self.params)
                    .await
                    .map_err(|e| stage_err(&stage, e))?;
                candidate = extract_code(&fixed);
                verdict = self
                    .validator
                    .quick(&join(&accumulated, &candidate), self.tests)
                    .await;
            }

            let status = if verdict.passed {
                IncrementalStatus::Passed
            } else {
                IncrementalStatus::Failed
            };
            self.emit(spec, status, attempts, progress).await;

            // The best candidate is kept even when it still fails; the
            // validation stage and fix loop take it from there.
            accumulated = join(&accumulated, &candidate);
        }

        Ok(accumulated)
    }

    async fn emit(
        &self,
        spec: &FunctionSpec,
        status: IncrementalStatus,
        fix_attempts: u32,
        progress: ProgressCounter,
    ) {
        self.emitter
            .publish(WorkflowEvent::IncrementalProgress {
                function: spec.name.clone(),
                status,
                fix_attempts,
                progress,
            })
            .await;
    }
}

fn join(accumulated: &str, candidate: &str) -> String {
    if accumulated.is_empty() {
        candidate.to_string()
    } else {
        format!("{accumulated}\n\n{candidate}")
    }
}
