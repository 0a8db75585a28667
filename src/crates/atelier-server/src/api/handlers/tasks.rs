//! Task endpoints: submission, streaming, lifecycle.

use crate::api::error::{ApiError, ApiResult};
use crate::api::routes::AppState;
use atelier_core::event::WorkflowEvent;
use atelier_core::task::TaskOptions;
use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::Json;
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use tokio::sync::mpsc;

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub task: String,
    #[serde(default)]
    pub options: TaskOptions,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// POST /api/tasks
pub async fn create_task(
    State(state): State<AppState>,
    Json(request): Json<CreateTaskRequest>,
) -> ApiResult<Json<Value>> {
    if request.task.trim().is_empty() {
        return Err(ApiError::BadRequest("task text is empty".to_string()));
    }
    let task_id = state.start_task(request.task, request.options, request.conversation_id);
    tracing::info!(%task_id, "task queued");
    Ok(Json(json!({ "task_id": task_id, "status": "queued" })))
}

fn event_stream(
    mut rx: mpsc::Receiver<WorkflowEvent>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            let data = serde_json::to_string(&event)
                .unwrap_or_else(|_| "{\"type\":\"workflow_error\",\"error\":\"serialization\"}".to_string());
            yield Ok::<SseEvent, Infallible>(SseEvent::default().data(data));
            if terminal {
                break;
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// GET /api/tasks/:id/stream
pub async fn stream_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    let events = state.engine.events();
    if !events.is_registered(&task_id) {
        // No live run: only known checkpointed tasks may attach.
        if state.engine.checkpoints().load(&task_id).await?.is_none() {
            return Err(ApiError::NotFound(format!("task not found: {task_id}")));
        }
    }
    Ok(event_stream(events.subscribe(&task_id)))
}

/// POST /api/tasks/:id/resume
pub async fn resume_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    if state.engine.checkpoints().load(&task_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("task not found: {task_id}")));
    }

    // Subscribe before the replay starts so no event is missed.
    state.engine.events().register(&task_id);
    let rx = state.engine.events().subscribe(&task_id);
    let engine = state.engine.clone();
    tokio::spawn(async move {
        if let Err(error) = engine.resume(&task_id).await {
            tracing::error!(%task_id, %error, "resume failed");
        }
    });
    Ok(event_stream(rx))
}

/// GET /api/tasks/active
pub async fn active_tasks(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let tasks = state.engine.checkpoints().list_active().await?;
    Ok(Json(json!({ "tasks": tasks })))
}

/// GET /api/tasks/history
pub async fn task_history(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let tasks = state.engine.checkpoints().list_history().await?;
    Ok(Json(json!({ "tasks": tasks })))
}

/// GET /api/tasks/:id
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let Some((metadata, task_state)) = state.engine.checkpoints().load(&task_id).await? else {
        return Err(ApiError::NotFound(format!("task not found: {task_id}")));
    };
    Ok(Json(json!({ "metadata": metadata, "state": task_state })))
}

/// POST /api/tasks/:id/cancel
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<Value>> {
    if state.engine.checkpoints().load(&task_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("task not found: {task_id}")));
    }
    state.engine.cancel(&task_id);
    Ok(Json(json!({ "status": "paused" })))
}

/// DELETE /api/tasks/:id
pub async fn delete_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.engine.checkpoints().delete(&task_id).await?;
    Ok(Json(json!({ "status": "deleted" })))
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub task: String,
    pub feedback: String,
}

/// POST /api/feedback
pub async fn feedback(
    State(state): State<AppState>,
    Json(request): Json<FeedbackRequest>,
) -> ApiResult<Json<Value>> {
    let positive = match request.feedback.as_str() {
        "positive" => true,
        "negative" => false,
        other => {
            return Err(ApiError::BadRequest(format!(
                "feedback must be `positive` or `negative`, got `{other}`"
            )))
        }
    };
    state.metrics.record_feedback(positive);
    tracing::debug!(task = %request.task, positive, "feedback recorded");
    Ok(Json(json!({ "ok": true })))
}
