//! Notification Manager
//!
//! Task lifecycle events flow through here: build the payload, sign it,
//! persist it, then hand it to webhook delivery. Persistence always precedes
//! the first delivery attempt, so a crash after `emit` returns can never lose
//! an event that a subscriber was promised.

use chrono::Utc;
use db::{
    DBService,
    models::notification::{
        CreateNotification, Notification, NotificationError, NotificationType,
    },
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use thiserror::Error;
use utils::canonical::to_canonical_json;
use uuid::Uuid;

use crate::services::signing;
use crate::services::webhook_delivery::WebhookDeliveryService;

#[derive(Debug, Error)]
pub enum NotificationServiceError {
    #[error(transparent)]
    Model(#[from] NotificationError),
}

#[derive(Clone)]
pub struct NotificationService {
    db: DBService,
    delivery: WebhookDeliveryService,
    agent_id: String,
    signing_secret: SecretString,
}

impl NotificationService {
    pub fn new(
        db: DBService,
        delivery: WebhookDeliveryService,
        agent_id: String,
        signing_secret: SecretString,
    ) -> Self {
        Self {
            db,
            delivery,
            agent_id,
            signing_secret,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub async fn notify_started(
        &self,
        task_id: &str,
        data: Value,
    ) -> Result<Notification, NotificationServiceError> {
        self.emit(task_id, NotificationType::Started, data, None).await
    }

    pub async fn notify_progress(
        &self,
        task_id: &str,
        data: Value,
    ) -> Result<Notification, NotificationServiceError> {
        self.emit(task_id, NotificationType::Progress, data, None).await
    }

    pub async fn notify_completed(
        &self,
        task_id: &str,
        data: Value,
    ) -> Result<Notification, NotificationServiceError> {
        self.emit(task_id, NotificationType::Completed, data, None).await
    }

    pub async fn notify_failed(
        &self,
        task_id: &str,
        data: Value,
    ) -> Result<Notification, NotificationServiceError> {
        self.emit(task_id, NotificationType::Failed, data, None).await
    }

    pub async fn notify_escalated(
        &self,
        task_id: &str,
        data: Value,
    ) -> Result<Notification, NotificationServiceError> {
        self.emit(task_id, NotificationType::Escalated, data, None).await
    }

    /// Build, sign, persist, then fan out. Delivery problems are logged and
    /// absorbed: losing observability must never fail the task that emitted
    /// the event.
    pub async fn emit(
        &self,
        task_id: &str,
        kind: NotificationType,
        data: Value,
        metadata: Option<Value>,
    ) -> Result<Notification, NotificationServiceError> {
        let id = Uuid::new_v4();
        let mut payload = json!({
            "notification_id": id.to_string(),
            "task_id": task_id,
            "agent_id": self.agent_id,
            "notification_type": kind.to_string(),
            "timestamp": Utc::now().to_rfc3339(),
            "status": status_label(kind),
            "data": data,
        });
        if let Some(metadata) = metadata {
            payload["metadata"] = metadata;
        }

        let signature = signing::sign(
            self.signing_secret.expose_secret(),
            &to_canonical_json(&payload),
        );
        payload["signature"] = Value::String(signature.clone());
        let body = to_canonical_json(&payload);

        let notification = Notification::create(
            &self.db.pool,
            CreateNotification {
                task_id: task_id.to_string(),
                agent_id: self.agent_id.clone(),
                notification_type: kind,
                payload: body,
                signature,
            },
            id,
        )
        .await?;

        tracing::info!(
            "Notification {} ({}) recorded for task {} at seq {}",
            notification.id,
            kind,
            task_id,
            notification.seq
        );

        if let Err(err) = self.delivery.deliver(&notification).await {
            tracing::warn!("Fan-out for notification {} failed: {}", notification.id, err);
        }

        Ok(notification)
    }

    pub async fn list_for_task(
        &self,
        task_id: &str,
    ) -> Result<Vec<Notification>, NotificationServiceError> {
        Ok(Notification::find_by_task(&self.db.pool, task_id).await?)
    }

    pub async fn find(&self, id: Uuid) -> Result<Notification, NotificationServiceError> {
        Ok(Notification::find_by_id(&self.db.pool, id).await?)
    }

    /// Check an inbound payload against this agent's shared secret.
    pub fn verify_payload(&self, payload: &Value) -> bool {
        verify_payload_with(self.signing_secret.expose_secret(), payload)
    }
}

/// The signature covers the canonical JSON of the payload minus its
/// `signature` field.
pub fn verify_payload_with(secret: &str, payload: &Value) -> bool {
    let Some(signature) = payload.get("signature").and_then(Value::as_str) else {
        return false;
    };
    let mut unsigned = payload.clone();
    if let Some(map) = unsigned.as_object_mut() {
        map.remove("signature");
    }
    signing::verify(secret, &to_canonical_json(&unsigned), signature)
}

fn status_label(kind: NotificationType) -> &'static str {
    match kind {
        NotificationType::Started | NotificationType::Progress => "running",
        NotificationType::Completed => "completed",
        NotificationType::Failed => "failed",
        NotificationType::Escalated => "escalated",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::webhook_delivery::DeliveryConfig;

    async fn setup() -> NotificationService {
        let db = DBService::new_ephemeral().await.expect("db");
        let delivery = WebhookDeliveryService::new(db.clone(), DeliveryConfig::default())
            .expect("delivery");
        NotificationService::new(
            db,
            delivery,
            "executor-1".to_string(),
            SecretString::from("shared-secret".to_string()),
        )
    }

    #[tokio::test]
    async fn lifecycle_events_are_sequenced_and_signed() {
        let service = setup().await;
        let task_id = Uuid::new_v4().to_string();

        let started = service
            .notify_started(&task_id, json!({"node": "entry"}))
            .await
            .expect("started");
        let progress = service
            .notify_progress(&task_id, json!({"node": "builder"}))
            .await
            .expect("progress");
        let completed = service
            .notify_completed(&task_id, json!({"score": 0.92}))
            .await
            .expect("completed");

        assert_eq!(
            (started.seq, progress.seq, completed.seq),
            (1, 2, 3),
            "sequence follows emit order"
        );

        let payload: Value = serde_json::from_str(&completed.payload).expect("payload json");
        assert_eq!(payload["task_id"], json!(task_id));
        assert_eq!(payload["agent_id"], json!("executor-1"));
        assert_eq!(payload["notification_type"], json!("completed"));
        assert_eq!(payload["status"], json!("completed"));
        assert!(service.verify_payload(&payload));
    }

    #[tokio::test]
    async fn tampered_payloads_fail_verification() {
        let service = setup().await;
        let task_id = Uuid::new_v4().to_string();

        let notification = service
            .notify_failed(&task_id, json!({"error": "boom"}))
            .await
            .expect("failed event");
        let mut payload: Value =
            serde_json::from_str(&notification.payload).expect("payload json");

        assert!(service.verify_payload(&payload));

        payload["data"]["error"] = json!("all fine actually");
        assert!(!service.verify_payload(&payload));

        assert!(!verify_payload_with("wrong-secret", &payload));
        assert!(!verify_payload_with("shared-secret", &json!({"no": "signature"})));
    }

    #[tokio::test]
    async fn stored_signature_matches_recomputation() {
        let service = setup().await;
        let task_id = Uuid::new_v4().to_string();

        let notification = service
            .notify_progress(&task_id, json!({"pct": 50}))
            .await
            .expect("progress");

        let mut payload: Value =
            serde_json::from_str(&notification.payload).expect("payload json");
        payload
            .as_object_mut()
            .expect("object")
            .remove("signature");
        let recomputed = signing::sign("shared-secret", &to_canonical_json(&payload));
        assert_eq!(notification.signature, recomputed);
    }
}
