use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Notification not found")]
    NotFound,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, TS, PartialEq, Eq, Hash)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Started,
    Progress,
    Completed,
    Failed,
    Escalated,
}

impl NotificationType {
    /// Terminal notifications close out a task; at most one is expected per
    /// task_id.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NotificationType::Completed | NotificationType::Failed | NotificationType::Escalated
        )
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotificationType::Started => "started",
            NotificationType::Progress => "progress",
            NotificationType::Completed => "completed",
            NotificationType::Failed => "failed",
            NotificationType::Escalated => "escalated",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(NotificationType::Started),
            "progress" => Ok(NotificationType::Progress),
            "completed" => Ok(NotificationType::Completed),
            "failed" => Ok(NotificationType::Failed),
            "escalated" => Ok(NotificationType::Escalated),
            _ => Err(format!("Unknown notification type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, TS, PartialEq, Eq)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Delivered,
    Failed,
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Delivered => "delivered",
            NotificationStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// A signed lifecycle event. Persisted before any delivery attempt; the
/// payload and signature never change after insert.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Notification {
    pub id: Uuid,
    pub task_id: String,
    pub agent_id: String,
    pub notification_type: String,
    pub seq: i64,
    pub status: String,
    pub payload: String,
    pub signature: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateNotification {
    pub task_id: String,
    pub agent_id: String,
    pub notification_type: NotificationType,
    pub payload: String,
    pub signature: String,
}

impl Notification {
    pub fn notification_type(&self) -> Option<NotificationType> {
        self.notification_type.parse().ok()
    }

    /// Insert with the next per-task sequence number. Creation order is the
    /// delivery order subscribers observe. The id is caller-supplied because
    /// the signed payload embeds it before the row exists.
    pub async fn create(
        pool: &SqlitePool,
        data: CreateNotification,
        id: Uuid,
    ) -> Result<Self, NotificationError> {
        let notification = sqlx::query_as::<_, Notification>(
            r#"
            INSERT INTO notifications (id, task_id, agent_id, notification_type, seq, payload, signature)
            VALUES (
                ?1, ?2, ?3, ?4,
                (SELECT COALESCE(MAX(seq), 0) + 1 FROM notifications WHERE task_id = ?2),
                ?5, ?6
            )
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&data.task_id)
        .bind(&data.agent_id)
        .bind(data.notification_type.to_string())
        .bind(&data.payload)
        .bind(&data.signature)
        .fetch_one(pool)
        .await?;
        Ok(notification)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Self, NotificationError> {
        sqlx::query_as::<_, Notification>(r#"SELECT * FROM notifications WHERE id = ?1"#)
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or(NotificationError::NotFound)
    }

    pub async fn find_by_task(
        pool: &SqlitePool,
        task_id: &str,
    ) -> Result<Vec<Self>, NotificationError> {
        let notifications = sqlx::query_as::<_, Notification>(
            r#"SELECT * FROM notifications WHERE task_id = ?1 ORDER BY seq ASC"#,
        )
        .bind(task_id)
        .fetch_all(pool)
        .await?;
        Ok(notifications)
    }

    pub async fn update_status(
        pool: &SqlitePool,
        id: Uuid,
        status: NotificationStatus,
    ) -> Result<(), NotificationError> {
        let result = sqlx::query(r#"UPDATE notifications SET status = ?2 WHERE id = ?1"#)
            .bind(id)
            .bind(status.to_string())
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(NotificationError::NotFound);
        }
        Ok(())
    }

    pub async fn count_terminal_for_task(
        pool: &SqlitePool,
        task_id: &str,
    ) -> Result<i64, NotificationError> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM notifications
            WHERE task_id = ?1 AND notification_type IN ('completed', 'failed', 'escalated')
            "#,
        )
        .bind(task_id)
        .fetch_one(pool)
        .await?;
        Ok(count.0)
    }
}
