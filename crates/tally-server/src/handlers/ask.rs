//! Question handlers

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Deserialize;
use tracing::info;

use tally_core::AskResponse;

use crate::{AppError, AppState};

const MAX_QUESTION_LENGTH: usize = 2000;

#[derive(Deserialize)]
pub struct AskRequest {
    pub question: String,
    /// Conversation id for multi-turn follow-ups
    #[serde(default = "default_conversation")]
    pub conversation_id: String,
}

fn default_conversation() -> String {
    "default".to_string()
}

/// POST /api/ask - Ask a natural-language question about costs
pub async fn ask_question(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    let question = req.question.trim();

    if question.is_empty() {
        return Err(AppError::bad_request("question must not be empty"));
    }
    if question.len() > MAX_QUESTION_LENGTH {
        return Err(AppError::bad_request(
            "question is too long (max 2000 characters)",
        ));
    }

    info!(conversation_id = %req.conversation_id, "Question received via API");

    let response = state.engine.ask(question, &req.conversation_id).await?;
    Ok(Json(response))
}
