//! Sync handlers

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Deserialize;
use tracing::info;

use tally_core::SyncOutcome;

use crate::{AppError, AppState};

#[derive(Deserialize)]
pub struct SyncRequest {
    /// How many days of billing history to pull
    #[serde(default = "default_days")]
    pub days: i64,
}

fn default_days() -> i64 {
    30
}

impl Default for SyncRequest {
    fn default() -> Self {
        Self {
            days: default_days(),
        }
    }
}

/// POST /api/sync - Pull billing data and regenerate insights
pub async fn run_sync(
    State(state): State<Arc<AppState>>,
    body: Option<Json<SyncRequest>>,
) -> Result<Json<SyncOutcome>, AppError> {
    let params = body.map(|Json(b)| b).unwrap_or_default();

    if params.days <= 0 {
        return Err(AppError::bad_request("days must be positive"));
    }

    info!(days = params.days, "Sync requested via API");

    let outcome = state.engine.sync(params.days).await?;
    Ok(Json(outcome))
}
