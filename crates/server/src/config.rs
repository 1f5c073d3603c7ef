//! Process configuration, read once at startup from the environment.

use std::time::Duration;

use maestro::MaestroConfig;
use services::services::webhook_delivery::DeliveryConfig;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Identity stamped on every outbound notification.
    pub agent_id: String,
    pub delivery: DeliveryConfig,
    pub maestro: MaestroConfig,
    /// Delivery attempts older than this are pruned by the retention sweeper.
    pub attempt_retention_days: i64,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("BACKEND_PORT")
            .or_else(|_| std::env::var("PORT"))
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(8787);
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://maestro.db?mode=rwc".to_string());
        let agent_id =
            std::env::var("EXECUTOR_AGENT_ID").unwrap_or_else(|_| "maestro-executor".to_string());

        let defaults = DeliveryConfig::default();
        let delivery = DeliveryConfig {
            max_attempts: env_parse("WEBHOOK_MAX_ATTEMPTS", defaults.max_attempts),
            base_delay: env_secs("WEBHOOK_BASE_DELAY_SECS", defaults.base_delay),
            max_delay: env_secs("WEBHOOK_MAX_DELAY_SECS", defaults.max_delay),
            circuit_threshold: env_parse("WEBHOOK_CIRCUIT_THRESHOLD", defaults.circuit_threshold),
            circuit_cooldown: env_secs("WEBHOOK_CIRCUIT_COOLDOWN_SECS", defaults.circuit_cooldown),
            worker_pool_size: env_parse("WEBHOOK_WORKER_POOL_SIZE", defaults.worker_pool_size),
            request_timeout: env_secs("WEBHOOK_REQUEST_TIMEOUT_SECS", defaults.request_timeout),
        };

        let mut maestro = MaestroConfig::default();
        if let Some(threshold) = env_opt::<f64>("ACCEPTANCE_THRESHOLD") {
            maestro.graph.acceptance_threshold = threshold.clamp(0.0, 1.0);
        }
        if let Some(tokens) = env_opt::<u32>("MAX_OUTPUT_TOKENS") {
            maestro.graph.max_output_tokens = Some(tokens);
        }

        Self {
            host,
            port,
            database_url,
            agent_id,
            delivery,
            maestro,
            attempt_retention_days: env_parse("ATTEMPT_RETENTION_DAYS", 30),
        }
    }
}

fn env_opt<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_opt(name).unwrap_or(default)
}

fn env_secs(name: &str, default: Duration) -> Duration {
    env_opt::<u64>(name).map(Duration::from_secs).unwrap_or(default)
}
