//! Typed progress events externalized on the per-task stream.
//!
//! Every event serializes as a flat `{type, ...payload}` record. Consumers
//! must ignore unknown event types and unknown payload fields.

use crate::domain::ReviewIssue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Log levels mirrored onto the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Per-function status of the incremental coder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncrementalStatus {
    Generating,
    Validating,
    Fixing,
    Passed,
    Failed,
}

/// `{current, total}` counter for incremental progress.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProgressCounter {
    pub current: usize,
    pub total: usize,
}

/// All event kinds emitted by a task.
///
/// The inner tool-call type field is serialized as `call_type`: the canonical
/// envelope already claims `type` for the event kind, and a flat record
/// cannot carry the key twice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    StageStart {
        stage: String,
        message: String,
    },
    StageProgress {
        stage: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<f64>,
    },
    StageEnd {
        stage: String,
        result: Value,
    },
    StageError {
        stage: String,
        error: String,
    },
    ThinkingStarted {
        stage: String,
    },
    ThinkingInProgress {
        stage: String,
        delta: String,
        total_chars: usize,
        elapsed_ms: u64,
    },
    ThinkingCompleted {
        stage: String,
        summary: String,
        total_chars: usize,
        elapsed_ms: u64,
    },
    ThinkingInterrupted {
        stage: String,
        reason: String,
    },
    IncrementalProgress {
        function: String,
        status: IncrementalStatus,
        fix_attempts: u32,
        progress: ProgressCounter,
    },
    ToolCallStart {
        id: String,
        call_type: String,
        name: String,
        input_preview: String,
    },
    ToolCallEnd {
        id: String,
        status: String,
        duration_ms: u64,
        output_preview: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tokens_in: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tokens_out: Option<u64>,
    },
    Log {
        timestamp: DateTime<Utc>,
        level: LogLevel,
        stage: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
    DebateProgress {
        round: usize,
        max_rounds: usize,
        reviewer: String,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        issue: Option<ReviewIssue>,
    },
    DebateResult {
        total_issues: usize,
        fixed_issues: usize,
        rounds: usize,
        consensus: bool,
    },
    FinalResult {
        results: Value,
    },
    WorkflowError {
        error: String,
    },
}

impl WorkflowEvent {
    /// Event kind on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowEvent::StageStart { .. } => "stage_start",
            WorkflowEvent::StageProgress { .. } => "stage_progress",
            WorkflowEvent::StageEnd { .. } => "stage_end",
            WorkflowEvent::StageError { .. } => "stage_error",
            WorkflowEvent::ThinkingStarted { .. } => "thinking_started",
            WorkflowEvent::ThinkingInProgress { .. } => "thinking_in_progress",
            WorkflowEvent::ThinkingCompleted { .. } => "thinking_completed",
            WorkflowEvent::ThinkingInterrupted { .. } => "thinking_interrupted",
            WorkflowEvent::IncrementalProgress { .. } => "incremental_progress",
            WorkflowEvent::ToolCallStart { .. } => "tool_call_start",
            WorkflowEvent::ToolCallEnd { .. } => "tool_call_end",
            WorkflowEvent::Log { .. } => "log",
            WorkflowEvent::DebateProgress { .. } => "debate_progress",
            WorkflowEvent::DebateResult { .. } => "debate_result",
            WorkflowEvent::FinalResult { .. } => "final_result",
            WorkflowEvent::WorkflowError { .. } => "workflow_error",
        }
    }

    /// Terminal events end the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowEvent::FinalResult { .. } | WorkflowEvent::WorkflowError { .. }
        )
    }

    /// Thinking deltas are the first casualties of back-pressure: their
    /// content is derivable from the eventual `thinking_completed` totals.
    pub fn is_delta(&self) -> bool {
        matches!(self, WorkflowEvent::ThinkingInProgress { .. })
    }

    /// Sub-warning log events are dropped under sustained back-pressure.
    pub fn is_low_priority_log(&self) -> bool {
        matches!(
            self,
            WorkflowEvent::Log { level, .. } if *level < LogLevel::Warning
        )
    }

    /// Structural events are never dropped.
    pub fn is_structural(&self) -> bool {
        !self.is_delta() && !self.is_low_priority_log()
    }

    /// Convenience constructor for log events.
    pub fn log(level: LogLevel, stage: impl Into<String>, message: impl Into<String>) -> Self {
        WorkflowEvent::Log {
            timestamp: Utc::now(),
            level,
            stage: stage.into(),
            message: message.into(),
            details: None,
        }
    }
}
