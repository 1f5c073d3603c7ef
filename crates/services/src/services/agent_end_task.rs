//! Agent-End-Task Manager
//!
//! The terminal handshake for a task. Exactly one caller wins the terminal
//! state claim; the winner then runs three phases in order: cleanup,
//! reporting, final notification. A phase failure is logged and reported but
//! never blocks the phases after it, so every finalized task still gets its
//! closing notification whenever that phase can run at all.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use db::{
    DBService,
    models::{
        notification::NotificationType,
        session::{Session, SessionError, SessionStatus},
    },
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use strum_macros::{Display, EnumString};
use thiserror::Error;
use ts_rs::TS;

use crate::services::notifications::NotificationService;

#[derive(Debug, Error)]
pub enum EndTaskError {
    #[error(transparent)]
    Session(#[from] SessionError),
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, Display, EnumString,
)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EndTaskReason {
    Success,
    Failure,
    Escalated,
    Cancelled,
}

impl EndTaskReason {
    pub fn terminal_status(&self) -> SessionStatus {
        match self {
            EndTaskReason::Success => SessionStatus::Completed,
            EndTaskReason::Failure | EndTaskReason::Escalated => SessionStatus::Failed,
            EndTaskReason::Cancelled => SessionStatus::Cancelled,
        }
    }

    /// There is no `cancelled` notification type; a cancelled task closes
    /// with a `failed` event carrying the reason.
    fn notification_kind(&self) -> NotificationType {
        match self {
            EndTaskReason::Success => NotificationType::Completed,
            EndTaskReason::Failure | EndTaskReason::Cancelled => NotificationType::Failed,
            EndTaskReason::Escalated => NotificationType::Escalated,
        }
    }
}

#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export)]
pub struct EndTaskRequest {
    pub task_id: String,
    pub agent_id: String,
    pub reason: EndTaskReason,
    pub execution_summary: Option<serde_json::Value>,
    #[serde(default)]
    pub cleanup_actions: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct PhaseReport {
    pub phase: String,
    pub succeeded: bool,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct EndTaskOutcome {
    pub task_id: String,
    pub final_status: String,
    pub already_ended: bool,
    pub phases: Vec<PhaseReport>,
}

/// Hook for releasing whatever the executor held for the task. The default
/// just acknowledges each named action; deployments with real resources
/// substitute their own, globally or per task type.
#[async_trait]
pub trait CleanupHandler: Send + Sync {
    async fn run(&self, task_id: &str, action: &str) -> anyhow::Result<String>;
}

struct LoggingCleanup;

#[async_trait]
impl CleanupHandler for LoggingCleanup {
    async fn run(&self, task_id: &str, action: &str) -> anyhow::Result<String> {
        tracing::debug!("Cleanup action {} acknowledged for task {}", action, task_id);
        Ok(format!("{} acknowledged", action))
    }
}

#[derive(Clone)]
pub struct AgentEndTaskService {
    db: DBService,
    notifications: NotificationService,
    default_cleanup: Arc<dyn CleanupHandler>,
    cleanup_by_type: HashMap<String, Arc<dyn CleanupHandler>>,
}

impl AgentEndTaskService {
    pub fn new(db: DBService, notifications: NotificationService) -> Self {
        Self::with_cleanup(db, notifications, Arc::new(LoggingCleanup))
    }

    pub fn with_cleanup(
        db: DBService,
        notifications: NotificationService,
        cleanup: Arc<dyn CleanupHandler>,
    ) -> Self {
        Self {
            db,
            notifications,
            default_cleanup: cleanup,
            cleanup_by_type: HashMap::new(),
        }
    }

    /// Route cleanup for one task type to a dedicated handler; everything
    /// else keeps the default.
    pub fn register_cleanup(
        mut self,
        task_type: impl Into<String>,
        handler: Arc<dyn CleanupHandler>,
    ) -> Self {
        self.cleanup_by_type.insert(task_type.into(), handler);
        self
    }

    /// Finalize a task. Safe to call more than once: only the first call for
    /// a live session runs the phases, later calls report `already_ended`.
    pub async fn end_task(&self, request: EndTaskRequest) -> Result<EndTaskOutcome, EndTaskError> {
        let session = Session::find_by_task_id(&self.db.pool, &request.task_id).await?;
        let final_status = request.reason.terminal_status();

        if !Session::finalize(&self.db.pool, &request.task_id, final_status).await? {
            tracing::info!(
                "end_task for {} skipped: session already finalized as {}",
                request.task_id,
                session.status
            );
            return Ok(EndTaskOutcome {
                task_id: request.task_id,
                final_status: session.status.clone(),
                already_ended: true,
                phases: Vec::new(),
            });
        }

        tracing::info!(
            "Finalizing task {} as {} (reason: {}, requested by {})",
            request.task_id,
            final_status,
            request.reason,
            request.agent_id
        );

        let mut phases = Vec::with_capacity(3);
        phases.push(
            self.run_phase("cleanup", self.run_cleanup(&session, &request))
                .await,
        );
        phases.push(
            self.run_phase("reporting", self.run_reporting(&session, &request))
                .await,
        );
        phases.push(
            self.run_phase(
                "notification",
                self.run_notification(&session, &request, final_status),
            )
            .await,
        );

        Ok(EndTaskOutcome {
            task_id: request.task_id,
            final_status: final_status.to_string(),
            already_ended: false,
            phases,
        })
    }

    async fn run_phase<F>(&self, phase: &str, work: F) -> PhaseReport
    where
        F: Future<Output = anyhow::Result<String>>,
    {
        match work.await {
            Ok(detail) => PhaseReport {
                phase: phase.to_string(),
                succeeded: true,
                detail: Some(detail),
            },
            Err(err) => {
                tracing::error!("End-task phase {} failed: {:#}", phase, err);
                PhaseReport {
                    phase: phase.to_string(),
                    succeeded: false,
                    detail: Some(err.to_string()),
                }
            }
        }
    }

    async fn run_cleanup(
        &self,
        session: &Session,
        request: &EndTaskRequest,
    ) -> anyhow::Result<String> {
        let handler = self
            .cleanup_by_type
            .get(&session.task_type)
            .unwrap_or(&self.default_cleanup);
        let mut failed = Vec::new();
        for action in &request.cleanup_actions {
            if let Err(err) = handler.run(&request.task_id, action).await {
                tracing::warn!(
                    "Cleanup action {} failed for task {}: {}",
                    action,
                    request.task_id,
                    err
                );
                failed.push(action.clone());
            }
        }
        if failed.is_empty() {
            Ok(format!(
                "{} cleanup actions completed",
                request.cleanup_actions.len()
            ))
        } else {
            anyhow::bail!(
                "{} of {} cleanup actions failed: {}",
                failed.len(),
                request.cleanup_actions.len(),
                failed.join(", ")
            )
        }
    }

    async fn run_reporting(
        &self,
        session: &Session,
        request: &EndTaskRequest,
    ) -> anyhow::Result<String> {
        let (step_count, step_errors, total_duration_ms): (i64, i64, Option<i64>) =
            sqlx::query_as(
                r#"
                SELECT COUNT(*),
                       COALESCE(SUM(CASE WHEN status = 'error' THEN 1 ELSE 0 END), 0),
                       SUM(duration_ms)
                FROM steps WHERE session_id = ?1
                "#,
            )
            .bind(session.id)
            .fetch_one(&self.db.pool)
            .await?;

        let summary = json!({
            "reason": request.reason.to_string(),
            "reported_by": request.agent_id,
            "execution_summary": request.execution_summary,
            "next_steps": request.next_steps,
            "metrics": {
                "steps": step_count,
                "step_errors": step_errors,
                "total_duration_ms": total_duration_ms,
                "retry_count": session.retry_count,
            },
        });
        Session::attach_summary(&self.db.pool, session.id, &summary).await?;
        Ok(format!("final metrics attached ({} steps)", step_count))
    }

    async fn run_notification(
        &self,
        session: &Session,
        request: &EndTaskRequest,
        final_status: SessionStatus,
    ) -> anyhow::Result<String> {
        let data = json!({
            "task_id": request.task_id,
            "completion_reason": request.reason.to_string(),
            "final_status": final_status.to_string(),
            "final_score": session.final_score,
            "execution_summary": request.execution_summary,
            "next_steps": request.next_steps,
        });
        let notification = self
            .notifications
            .emit(
                &request.task_id,
                request.reason.notification_kind(),
                data,
                request.metadata.clone(),
            )
            .await?;
        Ok(format!("final notification {} emitted", notification.id))
    }
}
