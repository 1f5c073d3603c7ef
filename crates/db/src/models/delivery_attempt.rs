use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

/// Bodies beyond this are cut before persisting; enough for diagnostics
/// without letting a chatty endpoint bloat the audit table.
const RESPONSE_BODY_MAX_CHARS: usize = 1000;

#[derive(Debug, Error)]
pub enum DeliveryAttemptError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// One HTTP try against one webhook for one notification. Append-only.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DeliveryAttempt {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub notification_id: Uuid,
    pub attempt_number: i64,
    pub http_status: Option<i64>,
    pub succeeded: bool,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
    pub attempted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RecordDeliveryAttempt {
    pub webhook_id: Uuid,
    pub notification_id: Uuid,
    pub attempt_number: i64,
    pub http_status: Option<i64>,
    pub succeeded: bool,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
}

fn clip_body(body: Option<String>) -> Option<String> {
    body.map(|b| {
        if b.chars().count() > RESPONSE_BODY_MAX_CHARS {
            b.chars().take(RESPONSE_BODY_MAX_CHARS).collect()
        } else {
            b
        }
    })
}

impl DeliveryAttempt {
    pub async fn record(
        pool: &SqlitePool,
        data: RecordDeliveryAttempt,
    ) -> Result<Self, DeliveryAttemptError> {
        let id = Uuid::new_v4();
        let response_body = clip_body(data.response_body);
        let attempt = sqlx::query_as::<_, DeliveryAttempt>(
            r#"
            INSERT INTO delivery_attempts
                (id, webhook_id, notification_id, attempt_number, http_status, succeeded,
                 response_body, error_message, duration_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(data.webhook_id)
        .bind(data.notification_id)
        .bind(data.attempt_number)
        .bind(data.http_status)
        .bind(data.succeeded)
        .bind(&response_body)
        .bind(&data.error_message)
        .bind(data.duration_ms)
        .fetch_one(pool)
        .await?;
        Ok(attempt)
    }

    pub async fn find_by_notification(
        pool: &SqlitePool,
        notification_id: Uuid,
    ) -> Result<Vec<Self>, DeliveryAttemptError> {
        let attempts = sqlx::query_as::<_, DeliveryAttempt>(
            r#"
            SELECT * FROM delivery_attempts
            WHERE notification_id = ?1
            ORDER BY attempted_at ASC, attempt_number ASC
            "#,
        )
        .bind(notification_id)
        .fetch_all(pool)
        .await?;
        Ok(attempts)
    }

    pub async fn find_by_webhook(
        pool: &SqlitePool,
        webhook_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, DeliveryAttemptError> {
        let attempts = sqlx::query_as::<_, DeliveryAttempt>(
            r#"
            SELECT * FROM delivery_attempts
            WHERE webhook_id = ?1
            ORDER BY attempted_at DESC, attempt_number DESC
            LIMIT ?2
            "#,
        )
        .bind(webhook_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(attempts)
    }

    pub async fn count_for_notification(
        pool: &SqlitePool,
        notification_id: Uuid,
    ) -> Result<i64, DeliveryAttemptError> {
        let count: (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM delivery_attempts WHERE notification_id = ?1"#)
                .bind(notification_id)
                .fetch_one(pool)
                .await?;
        Ok(count.0)
    }

    /// Retention sweep. Returns the number of rows removed.
    pub async fn purge_older_than(
        pool: &SqlitePool,
        days: i64,
    ) -> Result<u64, DeliveryAttemptError> {
        let result = sqlx::query(
            r#"
            DELETE FROM delivery_attempts
            WHERE attempted_at < datetime('now', '-' || ?1 || ' days')
            "#,
        )
        .bind(days)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
