//! Agent-boundary endpoint: an executor (or the orchestrator acting on its
//! behalf) reports a task as finished and triggers the end-task phases.

use axum::{Json, Router, extract::State, routing::post};
use maestro::schema::validate_params;
use serde_json::{Value, json};
use services::services::agent_end_task::{EndTaskOutcome, EndTaskRequest};
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/agent/end-task", post(end_task))
        .with_state(state.clone())
}

fn end_task_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "task_id": { "type": "string" },
            "agent_id": { "type": "string" },
            "reason": { "type": "string", "enum": ["success", "failure", "escalated", "cancelled"] },
            "execution_summary": { "type": ["object", "null"] },
            "cleanup_actions": { "type": "array" },
            "next_steps": { "type": "array" },
            "metadata": { "type": ["object", "null"] }
        },
        "required": ["task_id", "agent_id", "reason"],
        "additionalProperties": false
    })
}

pub async fn end_task(
    State(state): State<AppState>,
    Json(raw): Json<Value>,
) -> Result<Json<ApiResponse<EndTaskOutcome>>, ApiError> {
    let issues = validate_params(&end_task_schema(), &raw);
    if !issues.is_empty() {
        let detail = issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ApiError::BadRequest(format!(
            "Invalid end-task payload: {}",
            detail
        )));
    }

    let request: EndTaskRequest = serde_json::from_value(raw)
        .map_err(|e| ApiError::BadRequest(format!("Invalid end-task payload: {}", e)))?;

    tracing::info!(
        "End-task requested for {} by {} ({})",
        request.task_id,
        request.agent_id,
        request.reason
    );

    let outcome = state.end_tasks().end_task(request).await?;
    Ok(Json(ApiResponse::success(outcome)))
}
