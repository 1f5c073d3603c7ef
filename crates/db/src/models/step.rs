use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Step not found")]
    NotFound,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, TS, PartialEq, Eq)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Success,
    Error,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Running => "running",
            StepStatus::Success => "success",
            StepStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(StepStatus::Running),
            "success" => Ok(StepStatus::Success),
            "error" => Ok(StepStatus::Error),
            _ => Err(format!("Unknown step status: {}", s)),
        }
    }
}

/// One node execution inside a session. Rows are append-only once terminal.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Step {
    pub id: Uuid,
    pub session_id: Uuid,
    pub node_name: String,
    pub agent_used: Option<String>,
    pub status: String,
    pub output: Option<String>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Step {
    pub fn status(&self) -> StepStatus {
        self.status.parse().unwrap_or(StepStatus::Error)
    }

    pub async fn begin(
        pool: &SqlitePool,
        session_id: Uuid,
        node_name: &str,
        agent_used: Option<&str>,
    ) -> Result<Self, StepError> {
        let id = Uuid::new_v4();
        let step = sqlx::query_as::<_, Step>(
            r#"
            INSERT INTO steps (id, session_id, node_name, agent_used)
            VALUES (?1, ?2, ?3, ?4)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(session_id)
        .bind(node_name)
        .bind(agent_used)
        .fetch_one(pool)
        .await?;
        Ok(step)
    }

    pub async fn succeed(
        pool: &SqlitePool,
        id: Uuid,
        output: Option<&serde_json::Value>,
        duration_ms: i64,
    ) -> Result<Self, StepError> {
        sqlx::query_as::<_, Step>(
            r#"
            UPDATE steps
            SET status = 'success', output = ?2, duration_ms = ?3
            WHERE id = ?1 AND status = 'running'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(output.map(|v| v.to_string()))
        .bind(duration_ms)
        .fetch_optional(pool)
        .await?
        .ok_or(StepError::NotFound)
    }

    pub async fn fail(
        pool: &SqlitePool,
        id: Uuid,
        error_message: &str,
        duration_ms: i64,
    ) -> Result<Self, StepError> {
        sqlx::query_as::<_, Step>(
            r#"
            UPDATE steps
            SET status = 'error', error_message = ?2, duration_ms = ?3
            WHERE id = ?1 AND status = 'running'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(error_message)
        .bind(duration_ms)
        .fetch_optional(pool)
        .await?
        .ok_or(StepError::NotFound)
    }

    pub async fn find_by_session(
        pool: &SqlitePool,
        session_id: Uuid,
    ) -> Result<Vec<Self>, StepError> {
        let steps = sqlx::query_as::<_, Step>(
            r#"
            SELECT * FROM steps
            WHERE session_id = ?1
            ORDER BY started_at ASC, created_at ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(pool)
        .await?;
        Ok(steps)
    }

    pub async fn latest(pool: &SqlitePool, session_id: Uuid) -> Result<Option<Self>, StepError> {
        let step = sqlx::query_as::<_, Step>(
            r#"
            SELECT * FROM steps
            WHERE session_id = ?1
            ORDER BY started_at DESC, created_at DESC
            LIMIT 1
            "#,
        )
        .bind(session_id)
        .fetch_optional(pool)
        .await?;
        Ok(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_utils::{create_test_session, setup_test_pool};

    #[tokio::test]
    async fn step_lifecycle_and_ordering() {
        let pool = setup_test_pool().await;
        let session_id = create_test_session(&pool).await;

        let entry = Step::begin(&pool, session_id, "entry", None)
            .await
            .expect("begin entry");
        Step::succeed(&pool, entry.id, None, 3).await.expect("finish entry");

        let planner = Step::begin(&pool, session_id, "planner", Some("openai:gpt-4o-mini"))
            .await
            .expect("begin planner");
        let output = serde_json::json!({"route": "builder"});
        let done = Step::succeed(&pool, planner.id, Some(&output), 120)
            .await
            .expect("finish planner");
        assert_eq!(done.status(), StepStatus::Success);
        assert_eq!(done.duration_ms, Some(120));

        let steps = Step::find_by_session(&pool, session_id).await.expect("list");
        assert_eq!(steps.len(), 2);
        assert!(steps.windows(2).all(|w| w[0].started_at <= w[1].started_at));
        assert_eq!(steps[0].node_name, "entry");
        assert_eq!(steps[1].node_name, "planner");

        let latest = Step::latest(&pool, session_id).await.expect("latest");
        assert_eq!(latest.map(|s| s.node_name), Some("planner".to_string()));
    }

    #[tokio::test]
    async fn terminal_steps_are_not_rewritable() {
        let pool = setup_test_pool().await;
        let session_id = create_test_session(&pool).await;

        let step = Step::begin(&pool, session_id, "builder", None)
            .await
            .expect("begin");
        Step::fail(&pool, step.id, "tool exploded", 55).await.expect("fail");

        let again = Step::succeed(&pool, step.id, None, 10).await;
        assert!(matches!(again, Err(StepError::NotFound)));

        let stored = Step::find_by_session(&pool, session_id)
            .await
            .expect("list")
            .pop()
            .expect("step exists");
        assert_eq!(stored.status(), StepStatus::Error);
        assert_eq!(stored.error_message.as_deref(), Some("tool exploded"));
    }
}
