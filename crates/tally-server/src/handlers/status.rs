//! Status and maintenance handlers

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;
use tracing::info;

use tally_core::SyncRecord;

use crate::{AppError, AppState, SuccessResponse};

#[derive(Serialize)]
pub struct StatusResponse {
    pub record_count: usize,
    pub service_count: usize,
    pub insight_count: usize,
    pub index_size: usize,
    pub last_sync: Option<SyncRecord>,
    pub recent_syncs: Vec<SyncRecord>,
    pub ai_backend: AIBackendStatus,
}

#[derive(Serialize)]
pub struct AIBackendStatus {
    pub host: String,
    pub model: String,
    pub healthy: bool,
}

/// GET /api/status - Engine and backend health overview
pub async fn get_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusResponse>, AppError> {
    let engine = &state.engine;
    let summary = engine.get_summary()?;

    Ok(Json(StatusResponse {
        record_count: summary.record_count,
        service_count: summary.service_count,
        insight_count: summary.total_insights,
        index_size: engine.index_size(),
        last_sync: engine.last_sync()?,
        recent_syncs: engine.sync_history(10)?,
        ai_backend: AIBackendStatus {
            host: engine.ai_host().to_string(),
            model: engine.ai_model().to_string(),
            healthy: engine.ai_healthy().await,
        },
    }))
}

/// POST /api/clear - Delete all stored billing data and insights
pub async fn clear_data(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SuccessResponse>, AppError> {
    state.engine.clear()?;
    info!("All data cleared via API");
    Ok(Json(SuccessResponse { success: true }))
}

/// GET /api/health - Liveness check
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
