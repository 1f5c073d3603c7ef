//! Webhook subscriber management and the delivery audit trail.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use db::models::{
    delivery_attempt::DeliveryAttempt,
    notification::NotificationType,
    webhook_registration::{CreateWebhookRegistration, WebhookRegistration},
};
use serde::Deserialize;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, error::ApiError};

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/webhooks", post(register_webhook).get(list_webhooks))
        .route("/webhooks/{webhook_id}", delete(disable_webhook))
        .route("/webhooks/{webhook_id}/reset", post(reset_webhook_circuit))
        .route("/webhooks/{webhook_id}/attempts", get(list_webhook_attempts))
        .with_state(state.clone())
}

#[derive(Debug, Deserialize)]
pub struct RegisterWebhookPayload {
    pub url: String,
    pub event_types: Vec<String>,
    pub secret: String,
}

#[derive(Debug, Deserialize)]
pub struct AttemptsQuery {
    pub limit: Option<i64>,
}

fn validate_registration(payload: &RegisterWebhookPayload) -> Result<(), ApiError> {
    if !payload.url.starts_with("http://") && !payload.url.starts_with("https://") {
        return Err(ApiError::BadRequest(
            "Webhook url must be an absolute http(s) URL".to_string(),
        ));
    }
    if payload.event_types.is_empty() {
        return Err(ApiError::BadRequest(
            "Webhook must subscribe to at least one event type".to_string(),
        ));
    }
    for event_type in &payload.event_types {
        if event_type != "all" && event_type.parse::<NotificationType>().is_err() {
            return Err(ApiError::BadRequest(format!(
                "Unknown event type {}; expected one of started, progress, completed, failed, escalated, all",
                event_type
            )));
        }
    }
    if payload.secret.is_empty() {
        return Err(ApiError::BadRequest(
            "Webhook secret must not be empty".to_string(),
        ));
    }
    Ok(())
}

pub async fn register_webhook(
    State(state): State<AppState>,
    Json(payload): Json<RegisterWebhookPayload>,
) -> Result<(StatusCode, Json<ApiResponse<WebhookRegistration>>), ApiError> {
    validate_registration(&payload)?;
    let registration = state
        .delivery()
        .register(CreateWebhookRegistration {
            url: payload.url,
            event_types: payload.event_types,
            secret: payload.secret,
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(registration)),
    ))
}

pub async fn list_webhooks(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<WebhookRegistration>>>, ApiError> {
    let registrations = state.delivery().list().await?;
    Ok(Json(ApiResponse::success(registrations)))
}

pub async fn disable_webhook(
    State(state): State<AppState>,
    Path(webhook_id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    state.delivery().find(webhook_id).await?;
    state.delivery().disable(webhook_id).await?;
    Ok(Json(ApiResponse::success(())))
}

pub async fn reset_webhook_circuit(
    State(state): State<AppState>,
    Path(webhook_id): Path<Uuid>,
) -> Result<Json<ApiResponse<WebhookRegistration>>, ApiError> {
    state.delivery().find(webhook_id).await?;
    state.delivery().reset_circuit(webhook_id).await?;
    let registration = state.delivery().find(webhook_id).await?;
    Ok(Json(ApiResponse::success(registration)))
}

pub async fn list_webhook_attempts(
    State(state): State<AppState>,
    Path(webhook_id): Path<Uuid>,
    Query(query): Query<AttemptsQuery>,
) -> Result<Json<ApiResponse<Vec<DeliveryAttempt>>>, ApiError> {
    state.delivery().find(webhook_id).await?;
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let attempts = state.delivery().attempts_for_webhook(webhook_id, limit).await?;
    Ok(Json(ApiResponse::success(attempts)))
}
