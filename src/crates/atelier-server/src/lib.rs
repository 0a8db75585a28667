//! HTTP surface and process-wide services of the atelier code-generation
//! service.
//!
//! The server wires the workflow engine, LLM adapter, validators, retrieval
//! index, checkpoint store, conversation store, and metrics registry into
//! one [`services::AppServices`] value, and exposes the REST + SSE API
//! described by the route table in [`api::routes`].

pub mod api;
pub mod config;
pub mod conversations;
pub mod metrics;
pub mod services;

pub use api::{create_router, AppState};
pub use config::Config;
pub use conversations::{Conversation, ConversationStore, Message, Role};
pub use metrics::MetricsRegistry;
pub use services::AppServices;
