use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use db::models::{
    delivery_attempt::DeliveryAttemptError, notification::NotificationError,
    session::SessionError, step::StepError, webhook_registration::WebhookRegistrationError,
};
use services::services::{
    agent_end_task::EndTaskError, notifications::NotificationServiceError,
    webhook_delivery::WebhookDeliveryError,
};
use thiserror::Error;
use utils::response::ApiResponse;

#[derive(Debug, Error, ts_rs::TS)]
#[ts(type = "string")]
pub enum ApiError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Bad Request: {0}")]
    BadRequest(String),
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Internal Server Error: {0}")]
    InternalError(String),
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Database(e) => ApiError::Database(e),
            SessionError::NotFound => ApiError::NotFound("Task session not found".into()),
            SessionError::InvalidTransition(msg) => ApiError::BadRequest(msg),
        }
    }
}

impl From<StepError> for ApiError {
    fn from(err: StepError) -> Self {
        match err {
            StepError::Database(e) => ApiError::Database(e),
            StepError::NotFound => ApiError::NotFound("Execution step not found".into()),
        }
    }
}

impl From<NotificationError> for ApiError {
    fn from(err: NotificationError) -> Self {
        match err {
            NotificationError::Database(e) => ApiError::Database(e),
            NotificationError::NotFound => ApiError::NotFound("Notification not found".into()),
        }
    }
}

impl From<WebhookRegistrationError> for ApiError {
    fn from(err: WebhookRegistrationError) -> Self {
        match err {
            WebhookRegistrationError::Database(e) => ApiError::Database(e),
            WebhookRegistrationError::Serialization(e) => ApiError::Serialization(e),
            WebhookRegistrationError::NotFound => {
                ApiError::NotFound("Webhook registration not found".into())
            }
        }
    }
}

impl From<DeliveryAttemptError> for ApiError {
    fn from(err: DeliveryAttemptError) -> Self {
        match err {
            DeliveryAttemptError::Database(e) => ApiError::Database(e),
        }
    }
}

impl From<NotificationServiceError> for ApiError {
    fn from(err: NotificationServiceError) -> Self {
        match err {
            NotificationServiceError::Model(e) => ApiError::from(e),
        }
    }
}

impl From<WebhookDeliveryError> for ApiError {
    fn from(err: WebhookDeliveryError) -> Self {
        match err {
            WebhookDeliveryError::Registration(e) => ApiError::from(e),
            WebhookDeliveryError::Notification(e) => ApiError::from(e),
            WebhookDeliveryError::Attempt(e) => ApiError::from(e),
            WebhookDeliveryError::Client(msg) => ApiError::InternalError(msg),
            WebhookDeliveryError::QueueClosed => {
                ApiError::InternalError("Webhook delivery queue is closed".into())
            }
        }
    }
}

impl From<EndTaskError> for ApiError {
    fn from(err: EndTaskError) -> Self {
        match err {
            EndTaskError::Session(e) => ApiError::from(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status_code, error_type) = match &self {
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DatabaseError"),
            ApiError::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SerializationError"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "ConflictError"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BadRequest"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
            ApiError::InternalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
        };

        let error_message = match &self {
            ApiError::Conflict(msg)
            | ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::InternalError(msg) => msg.clone(),
            _ => format!("{}: {}", error_type, self),
        };
        let response = ApiResponse::<()>::error(&error_message);
        (status_code, Json(response)).into_response()
    }
}
