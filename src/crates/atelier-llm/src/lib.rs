//! LLM access for atelier.
//!
//! This crate wraps a locally hosted, Ollama-compatible model server behind
//! the [`LanguageModel`] trait and layers the [`LlmAdapter`] on top: a
//! concurrency-capped, retrying facade with four modes — `generate`, `chat`,
//! `generate_stream` (with `<think>` reasoning deltas split out), and
//! schema-validated `generate_structured` with manual-parse fallback.

pub mod adapter;
pub mod client;
pub mod config;
pub mod error;
pub mod ollama;
pub mod stream;
pub mod structured;

pub use adapter::{LlmAdapter, SplitDeltaStream, StreamDelta};
pub use client::{ChatMessage, ChatRole, GenerationParams, LanguageModel, RawDeltaStream};
pub use config::{AdapterConfig, LlmConfig, StructuredOutputConfig};
pub use error::{LlmError, Result};
pub use ollama::OllamaClient;
pub use stream::{Piece, ReasoningState, ReasoningStatus, ThinkSplitter};
pub use structured::extract_json;
