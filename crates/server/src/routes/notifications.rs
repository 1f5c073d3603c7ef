//! Read side of the notification log: per-task listing in emission order and
//! the delivery audit trail for a single notification.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use db::models::{delivery_attempt::DeliveryAttempt, notification::Notification};
use serde::Deserialize;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, error::ApiError};

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list_notifications))
        .route("/notifications/{notification_id}", get(get_notification))
        .route(
            "/notifications/{notification_id}/attempts",
            get(list_notification_attempts),
        )
        .with_state(state.clone())
}

#[derive(Debug, Deserialize)]
pub struct ListNotificationsQuery {
    pub task_id: Option<String>,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<ListNotificationsQuery>,
) -> Result<Json<ApiResponse<Vec<Notification>>>, ApiError> {
    let Some(task_id) = query.task_id else {
        return Err(ApiError::BadRequest(
            "task_id query parameter is required".to_string(),
        ));
    };
    let notifications = state.notifications().list_for_task(&task_id).await?;
    Ok(Json(ApiResponse::success(notifications)))
}

pub async fn get_notification(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Notification>>, ApiError> {
    let notification = state.notifications().find(notification_id).await?;
    Ok(Json(ApiResponse::success(notification)))
}

pub async fn list_notification_attempts(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<DeliveryAttempt>>>, ApiError> {
    state.notifications().find(notification_id).await?;
    let attempts = state
        .delivery()
        .attempts_for_notification(notification_id)
        .await?;
    Ok(Json(ApiResponse::success(attempts)))
}
