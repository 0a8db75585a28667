//! Models, metrics, and health endpoints.

use crate::api::error::{ApiError, ApiResult};
use crate::api::routes::AppState;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

/// GET /api/models
pub async fn list_models(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let models = state
        .adapter
        .list_models()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(json!({ "models": models })))
}

/// GET /api/metrics
pub async fn metrics(State(state): State<AppState>) -> Json<Value> {
    Json(state.metrics.snapshot())
}

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let llm_available = state.adapter.is_available().await;
    Json(json!({
        "status": "ok",
        "llm_available": llm_available,
        "model": state.config.default.default_model,
    }))
}
