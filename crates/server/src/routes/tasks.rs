//! Task intake and inspection. A task-execution request is validated before
//! anything is persisted; accepted tasks run the graph in the background and
//! the response returns immediately.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use db::models::{
    session::{CreateSession, Session, SessionError, TaskPriority},
    step::Step,
};
use maestro::{FieldIssue, schema::validate_params};
use serde::Deserialize;
use serde_json::{Value, json};
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/tasks", post(execute_task).get(list_tasks))
        .route("/tasks/{task_id}", get(get_task))
        .route("/tasks/{task_id}/cancel", post(cancel_task))
        .with_state(state.clone())
}

#[derive(Debug, Deserialize)]
pub struct TaskExecutionRequest {
    pub task_id: String,
    pub task_type: String,
    pub description: String,
    pub priority: TaskPriority,
    pub orchestrator_info: OrchestratorInfo,
    #[serde(default)]
    pub execution_context: Option<ExecutionContext>,
    #[serde(default)]
    pub task_data: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct OrchestratorInfo {
    pub agent_id: String,
    pub timestamp: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExecutionContext {
    #[serde(default)]
    pub timeout_seconds: Option<i64>,
    #[serde(default)]
    pub max_retries: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, serde::Serialize, ts_rs::TS)]
#[ts(export)]
pub struct TaskDetail {
    pub session: Session,
    pub steps: Vec<Step>,
}

fn task_request_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "task_id": { "type": "string" },
            "task_type": { "type": "string" },
            "description": { "type": "string" },
            "priority": { "type": "string", "enum": ["normal", "high", "urgent"] },
            "orchestrator_info": { "type": "object" },
            "execution_context": { "type": ["object", "null"] },
            "task_data": {}
        },
        "required": ["task_id", "task_type", "description", "priority", "orchestrator_info"],
        "additionalProperties": false
    })
}

fn orchestrator_info_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "agent_id": { "type": "string" },
            "timestamp": { "type": "string" },
            "correlation_id": { "type": ["string", "null"] }
        },
        "required": ["agent_id", "timestamp"]
    })
}

fn execution_context_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "timeout_seconds": { "type": ["integer", "null"] },
            "max_retries": { "type": ["integer", "null"] }
        }
    })
}

fn prefixed(prefix: &str, issues: Vec<FieldIssue>) -> Vec<FieldIssue> {
    issues
        .into_iter()
        .map(|issue| FieldIssue {
            field: format!("{}.{}", prefix, issue.field),
            message: issue.message,
        })
        .collect()
}

/// Validate the raw request body before any row is written. Nested payload
/// sections are checked against their own schemas so issues name the full
/// field path.
pub fn validate_task_request(raw: &Value) -> Vec<FieldIssue> {
    let mut issues = validate_params(&task_request_schema(), raw);

    if let Some(info) = raw.get("orchestrator_info").filter(|v| v.is_object()) {
        issues.extend(prefixed(
            "orchestrator_info",
            validate_params(&orchestrator_info_schema(), info),
        ));
        if let Some(timestamp) = info.get("timestamp").and_then(Value::as_str) {
            if chrono::DateTime::parse_from_rfc3339(timestamp).is_err() {
                issues.push(FieldIssue {
                    field: "orchestrator_info.timestamp".to_string(),
                    message: "expected an RFC 3339 timestamp".to_string(),
                });
            }
        }
    }

    if let Some(context) = raw.get("execution_context").filter(|v| v.is_object()) {
        issues.extend(prefixed(
            "execution_context",
            validate_params(&execution_context_schema(), context),
        ));
    }

    issues
}

fn issues_message(prefix: &str, issues: &[FieldIssue]) -> String {
    let detail = issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    format!("{}: {}", prefix, detail)
}

pub async fn execute_task(
    State(state): State<AppState>,
    Json(raw): Json<Value>,
) -> Result<(StatusCode, Json<ApiResponse<Session>>), ApiError> {
    let issues = validate_task_request(&raw);
    if !issues.is_empty() {
        return Err(ApiError::BadRequest(issues_message(
            "Invalid task execution request",
            &issues,
        )));
    }

    let request: TaskExecutionRequest = serde_json::from_value(raw.clone())
        .map_err(|e| ApiError::BadRequest(format!("Invalid task execution request: {}", e)))?;

    match Session::find_by_task_id(&state.db().pool, &request.task_id).await {
        Ok(_) => {
            return Err(ApiError::Conflict(format!(
                "Task {} was already submitted",
                request.task_id
            )));
        }
        Err(SessionError::NotFound) => {}
        Err(e) => return Err(e.into()),
    }

    let session = Session::create(
        &state.db().pool,
        CreateSession {
            task_id: request.task_id,
            task_type: request.task_type,
            description: request.description,
            priority: request.priority,
            original_input: raw,
            max_retries: request.execution_context.as_ref().and_then(|c| c.max_retries),
            orchestrator_agent_id: Some(request.orchestrator_info.agent_id),
            correlation_id: request.orchestrator_info.correlation_id,
        },
    )
    .await?;

    tracing::info!(
        "Accepted task {} ({}, priority {}) as session {}",
        session.task_id,
        session.task_type,
        session.priority,
        session.id
    );

    let engine = state.engine().clone();
    let session_id = session.id;
    tokio::spawn(async move {
        if let Err(e) = engine.run(session_id).await {
            tracing::error!("Graph run for session {} ended with error: {}", session_id, e);
        }
    });

    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(session))))
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<ApiResponse<Vec<Session>>>, ApiError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let sessions = Session::list_recent(&state.db().pool, limit).await?;
    Ok(Json(ApiResponse::success(sessions)))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<ApiResponse<TaskDetail>>, ApiError> {
    let session = Session::find_by_task_id(&state.db().pool, &task_id).await?;
    let steps = Step::find_by_session(&state.db().pool, session.id).await?;
    Ok(Json(ApiResponse::success(TaskDetail { session, steps })))
}

pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<ApiResponse<Session>>, ApiError> {
    let session = Session::find_by_task_id(&state.db().pool, &task_id).await?;
    let accepted = Session::request_cancel(&state.db().pool, session.id).await?;
    if !accepted {
        return Err(ApiError::Conflict(format!(
            "Task {} has already finished",
            task_id
        )));
    }
    let session = Session::find_by_id(&state.db().pool, session.id).await?;
    Ok(Json(ApiResponse::success(session)))
}
