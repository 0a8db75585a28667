//! Core primitives of the atelier code-generation service.
//!
//! This crate holds everything the workflow shares: the per-run
//! [`AgentState`](state::AgentState), the stage output types, the typed
//! event stream, the stage graph and its driving
//! [`WorkflowEngine`](engine::WorkflowEngine), and the
//! [`CheckpointStore`](checkpoint::CheckpointStore) seam that durable
//! backends implement.
//!
//! Agents, LLM access, persistence backends, retrieval, and the HTTP
//! surface live in their own crates on top of this one.

pub mod checkpoint;
pub mod domain;
pub mod engine;
pub mod error;
pub mod event;
pub mod graph;
pub mod state;
pub mod stream;
pub mod task;

pub use checkpoint::{CheckpointMetadata, CheckpointStore};
pub use domain::{
    Complexity, DebateReport, DebugResult, FunctionSpec, IntentKind, IntentResult, IssueCategory,
    IssueSeverity, ReflectionResult, ReviewIssue, StageRecord, ToolReport, ValidationReport,
};
pub use engine::{EngineConfig, WorkflowEngine};
pub use error::{CheckpointError, Result, WorkflowError};
pub use event::{IncrementalStatus, LogLevel, ProgressCounter, WorkflowEvent};
pub use graph::{StageAgent, StageContext, StageGraph, END};
pub use state::AgentState;
pub use stream::{EventEmitter, EventStreamManager};
pub use task::{GenerationMode, Task, TaskOptions, TaskStatus};
