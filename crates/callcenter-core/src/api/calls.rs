//! Answer endpoint

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use crate::call::CallSession;
use crate::ids::{AgentId, CallId};

use super::{ApiError, ApiState};

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    pub agent_id: AgentId,
}

/// `POST /calls/:id/answer`
///
/// The first agent to answer gets the call; everyone else receives `409 Conflict`.
pub async fn answer_call(
    State(engine): State<ApiState>,
    Path(call_id): Path<String>,
    Json(request): Json<AnswerRequest>,
) -> Result<Json<CallSession>, ApiError> {
    let session = engine
        .inbound()
        .on_answer(&CallId::from(call_id), &request.agent_id)
        .await?;
    Ok(Json(session))
}
