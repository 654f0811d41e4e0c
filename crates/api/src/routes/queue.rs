//! Queue inspection and manual maintenance routes.

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use courier_common::error::AppError;
use courier_dispatch::store::MessageStore;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/queue", get(list_queue))
        .route("/api/queue/scan", post(trigger_scan))
        .route("/api/queue/release-stale", post(release_stale))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<i64>,
}

/// GET /api/queue: pending queue entries in claim order.
async fn list_queue(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let entries = MessageStore::queue_entries(&state.pool, limit).await?;
    Ok(Json(json!({
        "success": true,
        "data": { "entries": entries }
    })))
}

/// POST /api/queue/scan: run one claim-and-dispatch cycle immediately
/// instead of waiting for the worker's next scan interval.
async fn trigger_scan(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let summary = state
        .scanner
        .scan_once()
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(json!({
        "success": true,
        "data": summary
    })))
}

/// POST /api/queue/release-stale: return messages held by crashed or hung
/// workers to the queue.
async fn release_stale(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let released = state
        .sweeper
        .release_stale()
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(json!({
        "success": true,
        "data": { "released": released }
    })))
}
