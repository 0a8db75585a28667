//! Validation stage.

use atelier_analysis::CodeValidator;
use atelier_core::domain::ValidationReport;
use atelier_core::error::WorkflowError;
use atelier_core::graph::{StageAgent, StageContext};
use atelier_core::state::AgentState;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub const STAGE: &str = "validation";

/// Runs the three-tool validation pass over the generated code.
pub struct ValidatorAgent {
    validator: Arc<dyn CodeValidator>,
}

impl ValidatorAgent {
    pub fn new(validator: Arc<dyn CodeValidator>) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl StageAgent for ValidatorAgent {
    fn name(&self) -> &str {
        STAGE
    }

    async fn execute(
        &self,
        state: &mut AgentState,
        ctx: &StageContext,
    ) -> Result<Value, WorkflowError> {
        let code = state.code().unwrap_or("").to_string();
        let tests = state.tests().unwrap_or("").to_string();

        let report = if code.trim().is_empty() {
            ValidationReport::failed("no code to validate")
        } else {
            ctx.emitter.progress("running validation tools", None).await;
            self.validator.validate(&code, &tests).await
        };

        let summary = serde_json::to_value(&report)
            .map_err(|e| WorkflowError::State(e.to_string()))?;
        state.set_validation(report);
        Ok(summary)
    }

    fn fallback(&self, state: &mut AgentState) {
        state.set_validation(ValidationReport::failed("validator unavailable"));
    }
}
