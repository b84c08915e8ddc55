//! Report handlers

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue},
};

use crate::{AppError, AppState};

/// GET /api/report - Markdown optimization report
pub async fn get_report(
    State(state): State<Arc<AppState>>,
) -> Result<(HeaderMap, String), AppError> {
    let report = state.engine.generate_report()?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/markdown; charset=utf-8"),
    );

    Ok((headers, report))
}
