//! Summary and insight handlers

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use tally_core::{CostSummary, Insight, InsightFilter};

use crate::{AppError, AppState};

/// GET /api/summary - Aggregate spend summary
pub async fn get_summary(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CostSummary>, AppError> {
    let summary = state.engine.get_summary()?;
    Ok(Json(summary))
}

#[derive(Deserialize)]
pub struct InsightQuery {
    pub category: Option<String>,
    pub priority: Option<String>,
    pub service: Option<String>,
    pub limit: Option<usize>,
}

/// GET /api/insights - Ranked insights, optionally filtered
pub async fn list_insights(
    State(state): State<Arc<AppState>>,
    Query(params): Query<InsightQuery>,
) -> Result<Json<Vec<Insight>>, AppError> {
    let filter = InsightFilter {
        category: params
            .category
            .as_deref()
            .map(|s| s.parse().map_err(|e: String| AppError::bad_request(&e)))
            .transpose()?,
        priority: params
            .priority
            .as_deref()
            .map(|s| s.parse().map_err(|e: String| AppError::bad_request(&e)))
            .transpose()?,
        service: params.service.clone(),
    };

    let insights = state.engine.list_insights(&filter, params.limit)?;
    Ok(Json(insights))
}
