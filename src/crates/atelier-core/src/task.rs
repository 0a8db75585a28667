//! Task submission types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The unit of work submitted by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Globally unique task identifier.
    pub id: String,

    /// The natural-language task text.
    pub prompt: String,

    /// Per-task generation options.
    #[serde(default)]
    pub options: TaskOptions,

    /// Submission timestamp.
    pub created_at: DateTime<Utc>,

    /// Owning conversation, when the task came from a chat session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl Task {
    /// Create a task with a fresh id.
    pub fn new(prompt: impl Into<String>, options: TaskOptions) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            options,
            created_at: Utc::now(),
            conversation_id: None,
        }
    }

    /// Attach the owning conversation.
    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }
}

/// Generation mode requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    #[default]
    Auto,
    Fast,
    Quality,
}

/// Options recognized on task submission.
///
/// Unset fields inherit the server defaults; `max_iterations` is clamped to
/// the 1..=5 range the fix loop supports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_iterations: u32,
    pub disable_web_search: bool,
    pub mode: GenerationMode,
    pub max_tokens: Option<u32>,
    pub quality_threshold: f32,
    pub rag_similarity_threshold: f32,
    pub web_search_max_results: usize,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            model: None,
            temperature: None,
            top_p: None,
            max_iterations: 3,
            disable_web_search: false,
            mode: GenerationMode::Auto,
            max_tokens: None,
            quality_threshold: 0.7,
            rag_similarity_threshold: 0.4,
            web_search_max_results: 5,
        }
    }
}

impl TaskOptions {
    /// Clamp option values into their supported ranges.
    pub fn normalized(mut self) -> Self {
        self.max_iterations = self.max_iterations.clamp(1, 5);
        self.quality_threshold = self.quality_threshold.clamp(0.0, 1.0);
        self.rag_similarity_threshold = self.rag_similarity_threshold.clamp(0.0, 1.0);
        if let Some(t) = self.temperature {
            self.temperature = Some(t.clamp(0.0, 2.0));
        }
        if let Some(p) = self.top_p {
            self.top_p = Some(p.clamp(0.0, 1.0));
        }
        self
    }
}

/// Lifecycle status of a task checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Paused,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Whether the task can still make progress.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Running | TaskStatus::Paused)
    }

    /// Whether the task reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}
