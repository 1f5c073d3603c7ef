use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Session not found")]
    NotFound,
    #[error("Invalid session transition: {0}")]
    InvalidTransition(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, TS, PartialEq, Eq)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SessionStatus::Pending),
            "running" => Ok(SessionStatus::Running),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            "cancelled" => Ok(SessionStatus::Cancelled),
            _ => Err(format!("Unknown session status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, TS, PartialEq, Eq)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Normal,
    High,
    Urgent,
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskPriority::Normal => "normal",
            TaskPriority::High => "high",
            TaskPriority::Urgent => "urgent",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(TaskPriority::Normal),
            "high" => Ok(TaskPriority::High),
            "urgent" => Ok(TaskPriority::Urgent),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

/// One task's run through the execution graph.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Session {
    pub id: Uuid,
    pub task_id: String,
    pub task_type: String,
    pub description: String,
    pub priority: String,
    pub original_input: String,
    pub current_node: String,
    pub status: String,
    pub retry_count: i64,
    pub max_retries: i64,
    pub cancel_requested: bool,
    pub final_score: Option<f64>,
    pub quality_flag: Option<String>,
    pub result_summary: Option<String>,
    pub orchestrator_agent_id: Option<String>,
    pub correlation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export)]
pub struct CreateSession {
    pub task_id: String,
    pub task_type: String,
    pub description: String,
    pub priority: TaskPriority,
    pub original_input: serde_json::Value,
    pub max_retries: Option<i64>,
    pub orchestrator_agent_id: Option<String>,
    pub correlation_id: Option<String>,
}

impl Session {
    pub fn status(&self) -> SessionStatus {
        self.status.parse().unwrap_or(SessionStatus::Failed)
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub async fn create(pool: &SqlitePool, data: CreateSession) -> Result<Self, SessionError> {
        let id = Uuid::new_v4();
        let priority = data.priority.to_string();
        let max_retries = data.max_retries.unwrap_or(2);

        let session = sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO sessions (
                id, task_id, task_type, description, priority, original_input,
                max_retries, orchestrator_agent_id, correlation_id
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&data.task_id)
        .bind(&data.task_type)
        .bind(&data.description)
        .bind(&priority)
        .bind(data.original_input.to_string())
        .bind(max_retries)
        .bind(&data.orchestrator_agent_id)
        .bind(&data.correlation_id)
        .fetch_one(pool)
        .await?;

        Ok(session)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Self, SessionError> {
        sqlx::query_as::<_, Session>(r#"SELECT * FROM sessions WHERE id = ?1"#)
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or(SessionError::NotFound)
    }

    pub async fn find_by_task_id(pool: &SqlitePool, task_id: &str) -> Result<Self, SessionError> {
        sqlx::query_as::<_, Session>(r#"SELECT * FROM sessions WHERE task_id = ?1"#)
            .bind(task_id)
            .fetch_optional(pool)
            .await?
            .ok_or(SessionError::NotFound)
    }

    pub async fn list_recent(pool: &SqlitePool, limit: i64) -> Result<Vec<Self>, SessionError> {
        let sessions = sqlx::query_as::<_, Session>(
            r#"SELECT * FROM sessions ORDER BY created_at DESC LIMIT ?1"#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(sessions)
    }

    /// Move a pending session into `running`. Fails if the session has
    /// already started or reached a terminal state.
    pub async fn mark_running(pool: &SqlitePool, id: Uuid) -> Result<Self, SessionError> {
        sqlx::query_as::<_, Session>(
            r#"
            UPDATE sessions
            SET status = 'running', updated_at = datetime('now', 'subsec')
            WHERE id = ?1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| SessionError::InvalidTransition("session is not pending".into()))
    }

    pub async fn advance_node(
        pool: &SqlitePool,
        id: Uuid,
        node: &str,
    ) -> Result<Self, SessionError> {
        sqlx::query_as::<_, Session>(
            r#"
            UPDATE sessions
            SET current_node = ?2, updated_at = datetime('now', 'subsec')
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(node)
        .fetch_optional(pool)
        .await?
        .ok_or(SessionError::NotFound)
    }

    pub async fn increment_retry(pool: &SqlitePool, id: Uuid) -> Result<Self, SessionError> {
        sqlx::query_as::<_, Session>(
            r#"
            UPDATE sessions
            SET retry_count = retry_count + 1, updated_at = datetime('now', 'subsec')
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(SessionError::NotFound)
    }

    pub async fn set_final_score(
        pool: &SqlitePool,
        id: Uuid,
        score: f64,
        quality_flag: &str,
    ) -> Result<Self, SessionError> {
        sqlx::query_as::<_, Session>(
            r#"
            UPDATE sessions
            SET final_score = ?2, quality_flag = ?3, updated_at = datetime('now', 'subsec')
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(score)
        .bind(quality_flag)
        .fetch_optional(pool)
        .await?
        .ok_or(SessionError::NotFound)
    }

    pub async fn attach_summary(
        pool: &SqlitePool,
        id: Uuid,
        summary: &serde_json::Value,
    ) -> Result<(), SessionError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET result_summary = ?2, updated_at = datetime('now', 'subsec')
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(summary.to_string())
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SessionError::NotFound);
        }
        Ok(())
    }

    /// Flag a session for cancellation. The graph loop observes the flag
    /// between nodes; already-terminal sessions are left untouched.
    pub async fn request_cancel(pool: &SqlitePool, id: Uuid) -> Result<bool, SessionError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET cancel_requested = 1, updated_at = datetime('now', 'subsec')
            WHERE id = ?1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Guarded terminal transition. Exactly one caller wins the claim for a
    /// given task; everyone else sees `false` and must treat the session as
    /// already finalized.
    pub async fn finalize(
        pool: &SqlitePool,
        task_id: &str,
        status: SessionStatus,
    ) -> Result<bool, SessionError> {
        if !status.is_terminal() {
            return Err(SessionError::InvalidTransition(format!(
                "{} is not a terminal status",
                status
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET status = ?2, updated_at = datetime('now', 'subsec')
            WHERE task_id = ?1 AND status NOT IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .bind(task_id)
        .bind(status.to_string())
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_utils::setup_test_pool;

    fn input() -> serde_json::Value {
        serde_json::json!({"description": "build the thing"})
    }

    #[tokio::test]
    async fn create_and_advance_session() {
        let pool = setup_test_pool().await;
        let task_id = Uuid::new_v4().to_string();

        let session = Session::create(
            &pool,
            CreateSession {
                task_id: task_id.clone(),
                task_type: "code_generation".into(),
                description: "build the thing".into(),
                priority: TaskPriority::Normal,
                original_input: input(),
                max_retries: Some(2),
                orchestrator_agent_id: Some("manus".into()),
                correlation_id: None,
            },
        )
        .await
        .expect("failed to create session");

        assert_eq!(session.status(), SessionStatus::Pending);
        assert_eq!(session.current_node, "entry");
        assert_eq!(session.retry_count, 0);

        let running = Session::mark_running(&pool, session.id)
            .await
            .expect("failed to start");
        assert_eq!(running.status(), SessionStatus::Running);

        let advanced = Session::advance_node(&pool, session.id, "planner")
            .await
            .expect("failed to advance");
        assert_eq!(advanced.current_node, "planner");

        let found = Session::find_by_task_id(&pool, &task_id)
            .await
            .expect("lookup failed");
        assert_eq!(found.id, session.id);
    }

    #[tokio::test]
    async fn mark_running_requires_pending() {
        let pool = setup_test_pool().await;
        let session = Session::create(
            &pool,
            CreateSession {
                task_id: Uuid::new_v4().to_string(),
                task_type: "analysis".into(),
                description: String::new(),
                priority: TaskPriority::High,
                original_input: input(),
                max_retries: None,
                orchestrator_agent_id: None,
                correlation_id: None,
            },
        )
        .await
        .expect("create failed");

        Session::mark_running(&pool, session.id).await.expect("start failed");
        let second = Session::mark_running(&pool, session.id).await;
        assert!(matches!(second, Err(SessionError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn finalize_claim_is_single_winner() {
        let pool = setup_test_pool().await;
        let task_id = Uuid::new_v4().to_string();
        let session = Session::create(
            &pool,
            CreateSession {
                task_id: task_id.clone(),
                task_type: "analysis".into(),
                description: String::new(),
                priority: TaskPriority::Normal,
                original_input: input(),
                max_retries: None,
                orchestrator_agent_id: None,
                correlation_id: None,
            },
        )
        .await
        .expect("create failed");
        Session::mark_running(&pool, session.id).await.expect("start failed");

        let first = Session::finalize(&pool, &task_id, SessionStatus::Completed)
            .await
            .expect("finalize failed");
        assert!(first);

        let second = Session::finalize(&pool, &task_id, SessionStatus::Failed)
            .await
            .expect("finalize failed");
        assert!(!second, "second finalize must lose the claim");

        let found = Session::find_by_task_id(&pool, &task_id).await.expect("lookup");
        assert_eq!(found.status(), SessionStatus::Completed);
    }

    #[tokio::test]
    async fn finalize_rejects_non_terminal_status() {
        let pool = setup_test_pool().await;
        let err = Session::finalize(&pool, "whatever", SessionStatus::Running).await;
        assert!(matches!(err, Err(SessionError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn cancel_flag_only_touches_live_sessions() {
        let pool = setup_test_pool().await;
        let task_id = Uuid::new_v4().to_string();
        let session = Session::create(
            &pool,
            CreateSession {
                task_id: task_id.clone(),
                task_type: "research".into(),
                description: String::new(),
                priority: TaskPriority::Urgent,
                original_input: input(),
                max_retries: None,
                orchestrator_agent_id: None,
                correlation_id: None,
            },
        )
        .await
        .expect("create failed");

        assert!(Session::request_cancel(&pool, session.id).await.expect("cancel"));
        let flagged = Session::find_by_id(&pool, session.id).await.expect("lookup");
        assert!(flagged.cancel_requested);

        Session::finalize(&pool, &task_id, SessionStatus::Cancelled)
            .await
            .expect("finalize");
        assert!(!Session::request_cancel(&pool, session.id).await.expect("cancel"));
    }
}
