use std::str::FromStr;

use sqlx::{sqlite::{SqliteConnectOptions, SqlitePoolOptions}, SqlitePool};
use uuid::Uuid;

use super::session::{CreateSession, Session, TaskPriority};

pub(crate) async fn setup_test_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:?cache=shared")
        .expect("invalid sqlite config")
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("failed to open sqlite memory db");

    bootstrap_schema(&pool).await;

    pool
}

async fn bootstrap_schema(pool: &SqlitePool) {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id                    BLOB PRIMARY KEY,
            task_id               TEXT NOT NULL UNIQUE,
            task_type             TEXT NOT NULL,
            description           TEXT NOT NULL DEFAULT '',
            priority              TEXT NOT NULL DEFAULT 'normal',
            original_input        TEXT NOT NULL,
            current_node          TEXT NOT NULL DEFAULT 'entry',
            status                TEXT NOT NULL DEFAULT 'pending',
            retry_count           INTEGER NOT NULL DEFAULT 0,
            max_retries           INTEGER NOT NULL DEFAULT 2,
            cancel_requested      INTEGER NOT NULL DEFAULT 0,
            final_score           REAL,
            quality_flag          TEXT,
            result_summary        TEXT,
            orchestrator_agent_id TEXT,
            correlation_id        TEXT,
            created_at            TEXT NOT NULL DEFAULT (datetime('now','subsec')),
            updated_at            TEXT NOT NULL DEFAULT (datetime('now','subsec'))
        );
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS steps (
            id            BLOB PRIMARY KEY,
            session_id    BLOB NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            node_name     TEXT NOT NULL,
            agent_used    TEXT,
            status        TEXT NOT NULL DEFAULT 'running',
            output        TEXT,
            error_message TEXT,
            started_at    TEXT NOT NULL DEFAULT (datetime('now','subsec')),
            duration_ms   INTEGER,
            created_at    TEXT NOT NULL DEFAULT (datetime('now','subsec'))
        );
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_steps_session_started
            ON steps(session_id, started_at);
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS notifications (
            id                BLOB PRIMARY KEY,
            task_id           TEXT NOT NULL,
            agent_id          TEXT NOT NULL,
            notification_type TEXT NOT NULL,
            seq               INTEGER NOT NULL,
            status            TEXT NOT NULL DEFAULT 'pending',
            payload           TEXT NOT NULL,
            signature         TEXT NOT NULL,
            created_at        TEXT NOT NULL DEFAULT (datetime('now','subsec'))
        );
        "#,
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_notifications_task_seq
            ON notifications(task_id, seq);
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS webhook_registrations (
            id                    BLOB PRIMARY KEY,
            url                   TEXT NOT NULL,
            event_types           TEXT NOT NULL,
            secret                TEXT NOT NULL,
            active                INTEGER NOT NULL DEFAULT 1,
            consecutive_failures  INTEGER NOT NULL DEFAULT 0,
            circuit_open_until    TEXT,
            total_deliveries      INTEGER NOT NULL DEFAULT 0,
            successful_deliveries INTEGER NOT NULL DEFAULT 0,
            failed_deliveries     INTEGER NOT NULL DEFAULT 0,
            last_delivery_at      TEXT,
            created_at            TEXT NOT NULL DEFAULT (datetime('now','subsec')),
            updated_at            TEXT NOT NULL DEFAULT (datetime('now','subsec'))
        );
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS delivery_attempts (
            id              BLOB PRIMARY KEY,
            webhook_id      BLOB NOT NULL REFERENCES webhook_registrations(id) ON DELETE CASCADE,
            notification_id BLOB NOT NULL REFERENCES notifications(id) ON DELETE CASCADE,
            attempt_number  INTEGER NOT NULL,
            http_status     INTEGER,
            succeeded       INTEGER NOT NULL DEFAULT 0,
            response_body   TEXT,
            error_message   TEXT,
            duration_ms     INTEGER,
            attempted_at    TEXT NOT NULL DEFAULT (datetime('now','subsec'))
        );
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_delivery_attempts_notification
            ON delivery_attempts(notification_id, attempted_at);
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_delivery_attempts_webhook
            ON delivery_attempts(webhook_id, attempted_at);
        "#,
    ];

    for statement in statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .expect("failed to bootstrap schema");
    }
}

pub(crate) async fn create_test_session(pool: &SqlitePool) -> Uuid {
    let task_id = format!("task-{}", Uuid::new_v4());
    let session = Session::create(
        pool,
        CreateSession {
            task_id,
            task_type: "coding".into(),
            description: "test session".into(),
            priority: TaskPriority::Normal,
            original_input: serde_json::json!({"prompt": "test"}),
            max_retries: None,
            orchestrator_agent_id: Some("orchestrator-main".into()),
            correlation_id: None,
        },
    )
    .await
    .expect("failed to create test session");

    session.id
}
