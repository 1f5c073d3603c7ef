use axum::{
    Router,
    routing::{IntoMakeService, get},
};
use tower_http::cors::CorsLayer;

use crate::AppState;

pub mod agent;
pub mod health;
pub mod notifications;
pub mod tasks;
pub mod webhooks;

pub(crate) fn api_router(state: &AppState) -> Router {
    let base_routes = Router::new()
        .route("/health", get(health::health_check))
        .merge(tasks::router(state))
        .merge(webhooks::router(state))
        .merge(notifications::router(state))
        .merge(agent::router(state))
        .with_state(state.clone());

    Router::new()
        .nest("/api", base_routes)
        .layer(CorsLayer::permissive())
}

pub fn router(state: AppState) -> IntoMakeService<Router> {
    api_router(&state).into_make_service()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use db::DBService;
    use db::models::session::{CreateSession, Session, TaskPriority};
    use maestro::{MaestroConfig, initialize_maestro};
    use secrecy::SecretString;
    use serde_json::{Value, json};
    use services::services::{
        agent_end_task::AgentEndTaskService,
        credentials::StaticCredentialStore,
        notifications::NotificationService,
        webhook_delivery::{DeliveryConfig, WebhookDeliveryService},
    };
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn test_state() -> AppState {
        let db = DBService::new_ephemeral().await.expect("db");
        let delivery =
            WebhookDeliveryService::new(db.clone(), DeliveryConfig::default()).expect("delivery");
        let notifications = NotificationService::new(
            db.clone(),
            delivery.clone(),
            "maestro-executor".to_string(),
            SecretString::from("test-signing-secret".to_string()),
        );
        let end_tasks = AgentEndTaskService::new(db.clone(), notifications.clone());
        let engine = initialize_maestro(
            MaestroConfig::default(),
            db.clone(),
            &StaticCredentialStore::new(),
            notifications.clone(),
            end_tasks.clone(),
        )
        .await
        .expect("engine");
        AppState::new(db, engine, notifications, delivery, end_tasks)
    }

    async fn request(
        state: &AppState,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let app = api_router(state);
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };
        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }

    fn task_request(task_id: &str) -> Value {
        json!({
            "task_id": task_id,
            "task_type": "code_generation",
            "description": "Generate a config parser",
            "priority": "high",
            "orchestrator_info": {
                "agent_id": "orchestrator-1",
                "timestamp": "2025-06-01T12:00:00Z"
            },
            "execution_context": { "max_retries": 1 },
            "task_data": { "language": "rust" }
        })
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let state = test_state().await;
        let (status, body) = request(&state, "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["data"], json!("ok"));
    }

    #[tokio::test]
    async fn task_intake_rejects_invalid_payloads() {
        let state = test_state().await;
        let (status, body) =
            request(&state, "POST", "/api/tasks", Some(json!({"task_id": "t-bad"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], json!(false));
        let message = body["message"].as_str().unwrap_or_default();
        assert!(message.contains("missing required field"), "got: {}", message);

        let sessions = Session::list_recent(&state.db().pool, 10).await.expect("list");
        assert!(sessions.is_empty(), "rejected payload must not create a session");
    }

    #[tokio::test]
    async fn task_intake_accepts_and_lists() {
        let state = test_state().await;
        let (status, body) =
            request(&state, "POST", "/api/tasks", Some(task_request("t-1"))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["data"]["task_id"], json!("t-1"));
        assert_eq!(body["data"]["max_retries"], json!(1));

        let (status, body) = request(&state, "GET", "/api/tasks", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().map(Vec::len), Some(1));

        let (status, body) = request(&state, "GET", "/api/tasks/t-1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["session"]["task_id"], json!("t-1"));

        let (status, body) = request(&state, "GET", "/api/tasks/ghost", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], json!(false));
    }

    #[tokio::test]
    async fn duplicate_task_submission_conflicts() {
        let state = test_state().await;
        let (status, _) =
            request(&state, "POST", "/api/tasks", Some(task_request("t-dup"))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let (status, body) =
            request(&state, "POST", "/api/tasks", Some(task_request("t-dup"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let message = body["message"].as_str().unwrap_or_default();
        assert!(message.contains("already submitted"), "got: {}", message);
    }

    #[tokio::test]
    async fn webhook_lifecycle_over_http() {
        let state = test_state().await;

        let (status, body) = request(
            &state,
            "POST",
            "/api/webhooks",
            Some(json!({
                "url": "https://orchestrator.example/hook",
                "event_types": ["completed", "failed"],
                "secret": "hook-secret"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let webhook_id = body["data"]["id"].as_str().expect("webhook id").to_string();

        let (status, body) = request(
            &state,
            "POST",
            "/api/webhooks",
            Some(json!({
                "url": "https://orchestrator.example/hook",
                "event_types": ["sometimes"],
                "secret": "hook-secret"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let message = body["message"].as_str().unwrap_or_default();
        assert!(message.contains("Unknown event type"), "got: {}", message);

        let (status, body) = request(&state, "GET", "/api/webhooks", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().map(Vec::len), Some(1));

        let uri = format!("/api/webhooks/{}", webhook_id);
        let (status, _) = request(&state, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::OK);

        let uri = format!("/api/webhooks/{}/reset", webhook_id);
        let (status, body) = request(&state, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["consecutive_failures"], json!(0));

        let uri = format!("/api/webhooks/{}/attempts", Uuid::new_v4());
        let (status, _) = request(&state, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn end_task_endpoint_finalizes_a_session() {
        let state = test_state().await;
        Session::create(
            &state.db().pool,
            CreateSession {
                task_id: "t-end".to_string(),
                task_type: "analysis".to_string(),
                description: "Summarize a report".to_string(),
                priority: TaskPriority::Normal,
                original_input: json!({"task_data": {}}),
                max_retries: None,
                orchestrator_agent_id: Some("orchestrator-1".to_string()),
                correlation_id: None,
            },
        )
        .await
        .expect("session");

        let end_request = json!({
            "task_id": "t-end",
            "agent_id": "maestro-executor",
            "reason": "success",
            "execution_summary": { "final_score": 0.9 },
            "cleanup_actions": ["release_locks"],
            "next_steps": []
        });

        let (status, body) =
            request(&state, "POST", "/api/agent/end-task", Some(end_request.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["final_status"], json!("completed"));
        assert_eq!(body["data"]["already_ended"], json!(false));

        let (status, body) =
            request(&state, "POST", "/api/agent/end-task", Some(end_request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["already_ended"], json!(true));

        let (status, body) =
            request(&state, "GET", "/api/notifications?task_id=t-end", None).await;
        assert_eq!(status, StatusCode::OK);
        let notifications = body["data"].as_array().expect("notifications");
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0]["notification_type"], json!("completed"));

        let (status, _) = request(&state, "GET", "/api/notifications", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn end_task_rejects_unknown_reasons() {
        let state = test_state().await;
        let (status, body) = request(
            &state,
            "POST",
            "/api/agent/end-task",
            Some(json!({
                "task_id": "t-x",
                "agent_id": "maestro-executor",
                "reason": "maybe"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let message = body["message"].as_str().unwrap_or_default();
        assert!(message.contains("allowed options"), "got: {}", message);
    }
}
