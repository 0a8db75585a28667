//! Route table.

use crate::api::handlers::{conversations, system, tasks};
use crate::services::AppServices;
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub type AppState = Arc<AppServices>;

/// Build the HTTP router over the shared services.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/tasks", post(tasks::create_task))
        .route("/api/tasks/active", get(tasks::active_tasks))
        .route("/api/tasks/history", get(tasks::task_history))
        .route(
            "/api/tasks/:id",
            get(tasks::get_task).delete(tasks::delete_task),
        )
        .route("/api/tasks/:id/stream", get(tasks::stream_task))
        .route("/api/tasks/:id/resume", post(tasks::resume_task))
        .route("/api/tasks/:id/cancel", post(tasks::cancel_task))
        .route("/api/feedback", post(tasks::feedback))
        .route("/api/models", get(system::list_models))
        .route("/api/metrics", get(system::metrics))
        .route("/api/health", get(system::health))
        .route("/api/conversations", get(conversations::list_conversations))
        .route(
            "/api/conversations/:id",
            delete(conversations::delete_conversation),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
