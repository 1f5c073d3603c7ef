use std::time::Duration;

use db::DBService;
use db::models::delivery_attempt::DeliveryAttempt;
use secrecy::SecretString;
use server::{AppState, config::ServerConfig, routes};
use services::services::{
    agent_end_task::AgentEndTaskService,
    credentials::{CredentialStore, EnvCredentialStore},
    notifications::NotificationService,
    webhook_delivery::{WebhookDeliveryError, WebhookDeliveryService},
};
use sqlx::Error as SqlxError;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, prelude::*};

#[derive(Debug, Error)]
pub enum MaestroServerError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Sqlx(#[from] SqlxError),
    #[error(transparent)]
    Delivery(#[from] WebhookDeliveryError),
    #[error(transparent)]
    Maestro(#[from] maestro::MaestroError),
}

#[tokio::main]
async fn main() -> Result<(), MaestroServerError> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenv::dotenv().ok();

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter_string = format!(
        "warn,server={level},services={level},db={level},maestro={level},utils={level}",
        level = log_level
    );
    let env_filter =
        EnvFilter::try_new(&filter_string).expect("Failed to create tracing filter");
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .init();

    let config = ServerConfig::from_env();
    let db = DBService::new(&config.database_url).await?;

    let credentials = EnvCredentialStore::new();
    let signing_secret = match credentials
        .get_credential("notification", "signing_secret")
        .await
    {
        Some(secret) => secret,
        None => {
            tracing::warn!(
                "No notification signing secret configured (NOTIFICATION_SIGNING_SECRET); \
                 using an ephemeral secret, receivers cannot verify across restarts"
            );
            SecretString::from(uuid::Uuid::new_v4().to_string())
        }
    };

    let delivery = WebhookDeliveryService::new(db.clone(), config.delivery.clone())?;
    let notifications = NotificationService::new(
        db.clone(),
        delivery.clone(),
        config.agent_id.clone(),
        signing_secret,
    );
    let end_tasks = AgentEndTaskService::new(db.clone(), notifications.clone());

    let engine = maestro::initialize_maestro(
        config.maestro.clone(),
        db.clone(),
        &credentials,
        notifications.clone(),
        end_tasks.clone(),
    )
    .await?;

    let retention_days = config.attempt_retention_days;
    let sweeper_pool = db.pool.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            match DeliveryAttempt::purge_older_than(&sweeper_pool, retention_days).await {
                Ok(count) if count > 0 => {
                    tracing::info!(
                        "Pruned {} delivery attempts older than {} days",
                        count,
                        retention_days
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("Delivery attempt retention sweep failed: {}", e);
                }
            }
        }
    });

    let state = AppState::new(
        db,
        engine,
        notifications,
        delivery.clone(),
        end_tasks,
    );
    let app_router = routes::router(state);

    let listener =
        tokio::net::TcpListener::bind(format!("{}:{}", config.host, config.port)).await?;
    let actual_port = listener.local_addr()?.port();
    tracing::info!(
        "Maestro executor listening on http://{}:{}",
        config.host,
        actual_port
    );

    axum::serve(listener, app_router)
        .with_graceful_shutdown(shutdown_signal(delivery))
        .await?;

    Ok(())
}

async fn shutdown_signal(delivery: WebhookDeliveryService) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received; draining webhook deliveries"),
        Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
    }
    delivery.flush().await;
    delivery.shutdown();
}
