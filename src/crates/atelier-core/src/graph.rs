//! Stage graph: named agent nodes connected by direct and conditional edges.
//!
//! A workflow is a directed graph whose nodes are stage agents and whose
//! edges decide the next stage from the current [`AgentState`]. Conditional
//! edges carry a router function; routing to [`END`] terminates the run.

use crate::error::WorkflowError;
use crate::state::AgentState;
use crate::stream::EventEmitter;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Terminal pseudo-stage.
pub const END: &str = "__end__";

/// Router function for conditional edges.
pub type Router = Arc<dyn Fn(&AgentState) -> String + Send + Sync>;

/// Execution context handed to a stage agent.
///
/// Carries the per-task event emitter (already scoped to the stage) and the
/// cooperative cancellation signal.
pub struct StageContext {
    pub emitter: EventEmitter,
    cancel: watch::Receiver<bool>,
}

impl StageContext {
    pub fn new(emitter: EventEmitter, cancel: watch::Receiver<bool>) -> Self {
        Self { emitter, cancel }
    }

    /// Whether cancellation has been requested for this task.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// A clone of the cancellation receiver, for select arms.
    pub fn cancel_signal(&self) -> watch::Receiver<bool> {
        self.cancel.clone()
    }
}

/// A single workflow stage.
///
/// Agents mutate only the state keys they own and return a JSON summary for
/// the `stage_end` event and the resume log. On failure the engine invokes
/// [`fallback`](StageAgent::fallback) so downstream stages see a usable
/// value instead of a missing key.
#[async_trait]
pub trait StageAgent: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        state: &mut AgentState,
        ctx: &StageContext,
    ) -> Result<Value, WorkflowError>;

    /// Install this stage's neutral output after a stage error.
    fn fallback(&self, _state: &mut AgentState) {}
}

enum StageEdge {
    Direct(String),
    Conditional(Router),
}

/// The directed stage graph executed by the engine.
pub struct StageGraph {
    agents: HashMap<String, Arc<dyn StageAgent>>,
    edges: HashMap<String, StageEdge>,
    entry: String,
}

impl StageGraph {
    pub fn new(entry: impl Into<String>) -> Self {
        Self {
            agents: HashMap::new(),
            edges: HashMap::new(),
            entry: entry.into(),
        }
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Register a stage under its agent's name.
    pub fn add_stage(&mut self, agent: Arc<dyn StageAgent>) -> &mut Self {
        self.agents.insert(agent.name().to_string(), agent);
        self
    }

    /// Unconditional transition.
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edges.insert(from.into(), StageEdge::Direct(to.into()));
        self
    }

    /// State-dependent transition.
    pub fn add_conditional_edge(&mut self, from: impl Into<String>, router: Router) -> &mut Self {
        self.edges.insert(from.into(), StageEdge::Conditional(router));
        self
    }

    pub fn agent(&self, stage: &str) -> Option<&Arc<dyn StageAgent>> {
        self.agents.get(stage)
    }

    /// Resolve the stage following `current` for the given state.
    pub fn next_stage(&self, current: &str, state: &AgentState) -> Result<String, WorkflowError> {
        match self.edges.get(current) {
            Some(StageEdge::Direct(to)) => Ok(to.clone()),
            Some(StageEdge::Conditional(router)) => Ok(router(state)),
            None => Err(WorkflowError::Graph(format!(
                "stage `{current}` has no outgoing edge"
            ))),
        }
    }

    /// Structural validation: the entry exists, every stage has an outgoing
    /// edge, and every direct edge targets a known stage or [`END`].
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if !self.agents.contains_key(&self.entry) {
            return Err(WorkflowError::Graph(format!(
                "entry stage `{}` is not registered",
                self.entry
            )));
        }
        for name in self.agents.keys() {
            if !self.edges.contains_key(name) {
                return Err(WorkflowError::Graph(format!(
                    "stage `{name}` has no outgoing edge"
                )));
            }
        }
        for (from, edge) in &self.edges {
            if let StageEdge::Direct(to) = edge {
                if to != END && !self.agents.contains_key(to) {
                    return Err(WorkflowError::Graph(format!(
                        "edge `{from}` -> `{to}` targets an unknown stage"
                    )));
                }
            }
        }
        Ok(())
    }
}
