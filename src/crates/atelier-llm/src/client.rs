//! The `LanguageModel` trait: uniform access to a single-host LLM backend.

use crate::error::Result;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

/// Chat roles understood by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Per-call sampling parameters; unset fields use backend defaults.
#[derive(Debug, Clone, Default)]
pub struct GenerationParams {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl GenerationParams {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Raw text chunks as produced by the backend, before `<think>` splitting.
pub type RawDeltaStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Uniform access to the model backend.
///
/// Implementations talk to one physical server; concurrency limits are the
/// adapter's concern, not the client's. `chat` must not embed role markers
/// into a flattened prompt — the backend would echo them back.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Single-shot completion.
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String>;

    /// Dialog completion over role-tagged messages.
    async fn chat(&self, messages: &[ChatMessage], params: &GenerationParams) -> Result<String>;

    /// Streaming completion yielding raw text deltas.
    async fn generate_stream(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<RawDeltaStream>;

    /// JSON-mode completion constrained by the supplied schema.
    ///
    /// Returns the raw JSON text; schema validation happens in the adapter.
    async fn generate_json(
        &self,
        prompt: &str,
        schema: &Value,
        params: &GenerationParams,
    ) -> Result<String>;

    /// Names of the models installed on the backend.
    async fn list_models(&self) -> Result<Vec<String>>;

    /// Cheap liveness probe.
    async fn is_available(&self) -> bool;
}
