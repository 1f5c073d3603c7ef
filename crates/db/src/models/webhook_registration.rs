use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum WebhookRegistrationError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Webhook registration not found")]
    NotFound,
}

/// A subscriber endpoint. `event_types` is a JSON array; the wildcard "all"
/// matches every notification type.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct WebhookRegistration {
    pub id: Uuid,
    pub url: String,
    pub event_types: String,
    #[serde(skip_serializing)]
    pub secret: String,
    pub active: bool,
    pub consecutive_failures: i64,
    pub circuit_open_until: Option<DateTime<Utc>>,
    pub total_deliveries: i64,
    pub successful_deliveries: i64,
    pub failed_deliveries: i64,
    pub last_delivery_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export)]
pub struct CreateWebhookRegistration {
    pub url: String,
    pub event_types: Vec<String>,
    pub secret: String,
}

impl WebhookRegistration {
    pub fn event_type_list(&self) -> Vec<String> {
        serde_json::from_str(&self.event_types).unwrap_or_default()
    }

    pub fn subscribes_to(&self, notification_type: &str) -> bool {
        self.event_type_list()
            .iter()
            .any(|t| t == "all" || t == notification_type)
    }

    pub fn circuit_open_at(&self, now: DateTime<Utc>) -> bool {
        match self.circuit_open_until {
            Some(until) => now < until,
            None => false,
        }
    }

    pub async fn create(
        pool: &SqlitePool,
        data: CreateWebhookRegistration,
    ) -> Result<Self, WebhookRegistrationError> {
        let id = Uuid::new_v4();
        let event_types = serde_json::to_string(&data.event_types)?;
        let registration = sqlx::query_as::<_, WebhookRegistration>(
            r#"
            INSERT INTO webhook_registrations (id, url, event_types, secret)
            VALUES (?1, ?2, ?3, ?4)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&data.url)
        .bind(&event_types)
        .bind(&data.secret)
        .fetch_one(pool)
        .await?;
        Ok(registration)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Self, WebhookRegistrationError> {
        sqlx::query_as::<_, WebhookRegistration>(
            r#"SELECT * FROM webhook_registrations WHERE id = ?1"#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(WebhookRegistrationError::NotFound)
    }

    pub async fn find_active(pool: &SqlitePool) -> Result<Vec<Self>, WebhookRegistrationError> {
        let registrations = sqlx::query_as::<_, WebhookRegistration>(
            r#"SELECT * FROM webhook_registrations WHERE active = 1 ORDER BY created_at ASC"#,
        )
        .fetch_all(pool)
        .await?;
        Ok(registrations)
    }

    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Self>, WebhookRegistrationError> {
        let registrations = sqlx::query_as::<_, WebhookRegistration>(
            r#"SELECT * FROM webhook_registrations ORDER BY created_at ASC"#,
        )
        .fetch_all(pool)
        .await?;
        Ok(registrations)
    }

    pub async fn disable(pool: &SqlitePool, id: Uuid) -> Result<(), WebhookRegistrationError> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_registrations
            SET active = 0, updated_at = datetime('now', 'subsec')
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(WebhookRegistrationError::NotFound);
        }
        Ok(())
    }

    /// Roll one finished delivery into the endpoint counters. A success resets
    /// the consecutive failure streak; a failure extends it.
    pub async fn record_delivery_outcome(
        pool: &SqlitePool,
        id: Uuid,
        succeeded: bool,
    ) -> Result<Self, WebhookRegistrationError> {
        let registration = sqlx::query_as::<_, WebhookRegistration>(
            r#"
            UPDATE webhook_registrations
            SET total_deliveries = total_deliveries + 1,
                successful_deliveries = successful_deliveries + CASE WHEN ?2 THEN 1 ELSE 0 END,
                failed_deliveries = failed_deliveries + CASE WHEN ?2 THEN 0 ELSE 1 END,
                consecutive_failures = CASE WHEN ?2 THEN 0 ELSE consecutive_failures + 1 END,
                last_delivery_at = datetime('now', 'subsec'),
                updated_at = datetime('now', 'subsec')
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(succeeded)
        .fetch_optional(pool)
        .await?
        .ok_or(WebhookRegistrationError::NotFound)?;
        Ok(registration)
    }

    pub async fn open_circuit(
        pool: &SqlitePool,
        id: Uuid,
        until: DateTime<Utc>,
    ) -> Result<(), WebhookRegistrationError> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_registrations
            SET circuit_open_until = ?2, updated_at = datetime('now', 'subsec')
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(until)
        .execute(pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(WebhookRegistrationError::NotFound);
        }
        Ok(())
    }

    /// Clears the circuit and the failure streak. Used after a successful
    /// half-open probe and by the manual reset endpoint.
    pub async fn close_circuit(pool: &SqlitePool, id: Uuid) -> Result<(), WebhookRegistrationError> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_registrations
            SET circuit_open_until = NULL,
                consecutive_failures = 0,
                updated_at = datetime('now', 'subsec')
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(WebhookRegistrationError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_utils::setup_test_pool;
    use chrono::Duration;

    fn make(url: &str) -> CreateWebhookRegistration {
        CreateWebhookRegistration {
            url: url.to_string(),
            event_types: vec!["completed".into(), "failed".into()],
            secret: "whsec_test".into(),
        }
    }

    #[tokio::test]
    async fn create_and_event_matching() {
        let pool = setup_test_pool().await;
        let url = format!("https://example.com/{}", Uuid::new_v4());

        let reg = WebhookRegistration::create(&pool, make(&url)).await.expect("create");
        assert!(reg.active);
        assert_eq!(reg.consecutive_failures, 0);
        assert!(reg.subscribes_to("completed"));
        assert!(!reg.subscribes_to("progress"));

        let wildcard = WebhookRegistration::create(
            &pool,
            CreateWebhookRegistration {
                url: format!("https://example.com/{}", Uuid::new_v4()),
                event_types: vec!["all".into()],
                secret: "whsec_test".into(),
            },
        )
        .await
        .expect("create");
        assert!(wildcard.subscribes_to("progress"));
    }

    #[tokio::test]
    async fn disable_removes_from_active_list() {
        let pool = setup_test_pool().await;
        let url = format!("https://example.com/{}", Uuid::new_v4());

        let reg = WebhookRegistration::create(&pool, make(&url)).await.expect("create");
        WebhookRegistration::disable(&pool, reg.id).await.expect("disable");

        let active = WebhookRegistration::find_active(&pool).await.expect("list");
        assert!(active.iter().all(|r| r.id != reg.id));

        let reread = WebhookRegistration::find_by_id(&pool, reg.id).await.expect("find");
        assert!(!reread.active);
    }

    #[tokio::test]
    async fn delivery_outcomes_track_failure_streaks() {
        let pool = setup_test_pool().await;
        let url = format!("https://example.com/{}", Uuid::new_v4());
        let reg = WebhookRegistration::create(&pool, make(&url)).await.expect("create");

        let after_fail = WebhookRegistration::record_delivery_outcome(&pool, reg.id, false)
            .await
            .expect("record");
        assert_eq!(after_fail.consecutive_failures, 1);
        assert_eq!(after_fail.failed_deliveries, 1);
        assert_eq!(after_fail.total_deliveries, 1);

        let after_fail2 = WebhookRegistration::record_delivery_outcome(&pool, reg.id, false)
            .await
            .expect("record");
        assert_eq!(after_fail2.consecutive_failures, 2);

        let after_success = WebhookRegistration::record_delivery_outcome(&pool, reg.id, true)
            .await
            .expect("record");
        assert_eq!(after_success.consecutive_failures, 0);
        assert_eq!(after_success.successful_deliveries, 1);
        assert_eq!(after_success.total_deliveries, 3);
        assert!(after_success.last_delivery_at.is_some());
    }

    #[tokio::test]
    async fn circuit_open_and_close() {
        let pool = setup_test_pool().await;
        let url = format!("https://example.com/{}", Uuid::new_v4());
        let reg = WebhookRegistration::create(&pool, make(&url)).await.expect("create");

        let now = Utc::now();
        WebhookRegistration::open_circuit(&pool, reg.id, now + Duration::seconds(60))
            .await
            .expect("open");
        let open = WebhookRegistration::find_by_id(&pool, reg.id).await.expect("find");
        assert!(open.circuit_open_at(now));
        assert!(!open.circuit_open_at(now + Duration::seconds(120)));

        WebhookRegistration::close_circuit(&pool, reg.id).await.expect("close");
        let closed = WebhookRegistration::find_by_id(&pool, reg.id).await.expect("find");
        assert!(closed.circuit_open_until.is_none());
        assert_eq!(closed.consecutive_failures, 0);
    }
}
