//! Stage agents for the atelier code-generation workflow.
//!
//! One agent per stage — intent, greeting/analyze, planning, research,
//! testing, coding (single-shot and incremental), validation, debug, fixing,
//! critic, debate, reflection — plus [`workflow::build_workflow`], which
//! wires them into the stage graph the engine executes.
//!
//! Agents talk to the model through the `atelier-llm` adapter, to the
//! Python toolchain through `atelier-analysis`, and to the example index
//! through `atelier-retrieval`. Streaming stages mirror reasoning deltas
//! onto the task's event stream.

pub mod coder;
pub mod conversational;
pub mod debate;
pub mod debugger;
pub mod incremental;
pub mod intent;
pub mod planner;
pub mod prompts;
pub mod reflection;
pub mod researcher;
pub mod support;
pub mod testgen;
pub mod validator;
pub mod web;
pub mod workflow;

pub use coder::CoderAgent;
pub use conversational::{AnalyzeProjectAgent, GreetingAgent};
pub use debate::{CriticAgent, DebateAgent, DebateSettings, MAX_ROUNDS};
pub use debugger::{DebuggerAgent, FixerAgent, SPECULATIVE_CONFIDENCE};
pub use incremental::IncrementalSettings;
pub use intent::IntentAgent;
pub use planner::PlannerAgent;
pub use reflection::ReflectionAgent;
pub use researcher::ResearcherAgent;
pub use testgen::TestGeneratorAgent;
pub use validator::ValidatorAgent;
pub use web::{DisabledWebSearch, SearchHit, SearxSearch, WebSearch};
pub use workflow::{build_workflow, stage_timeout_overrides, WorkflowServices, WorkflowSettings};
