//! Conversation endpoints.

use crate::api::error::{ApiError, ApiResult};
use crate::api::routes::AppState;
use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

/// GET /api/conversations
pub async fn list_conversations(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "conversations": state.conversations.list() }))
}

/// DELETE /api/conversations/:id
pub async fn delete_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> ApiResult<Json<Value>> {
    if !state.conversations.delete(&conversation_id) {
        return Err(ApiError::NotFound(format!(
            "conversation not found: {conversation_id}"
        )));
    }
    Ok(Json(json!({ "status": "deleted" })))
}
