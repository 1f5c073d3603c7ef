//! Tool broker: resolves a capability through the adapter registry, enforces
//! parameter validation, and executes the handler under a bounded
//! exponential-backoff retry policy. Only errors tagged `Retryable` are
//! retried; everything else surfaces on the first attempt.

use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

use crate::{
    registry::AdapterRegistry,
    schema::{self, FieldIssue},
};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown capability: {0}")]
    UnknownCapability(String),
    #[error("Invalid parameters for {capability}: {} issue(s)", .issues.len())]
    InvalidParameters {
        capability: String,
        issues: Vec<FieldIssue>,
    },
    #[error("Transient tool failure: {0}")]
    Retryable(String),
    #[error("Tool failure: {0}")]
    Fatal(String),
}

impl ToolError {
    pub fn should_retry(&self) -> bool {
        matches!(self, ToolError::Retryable(_))
    }
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Total handler calls per invocation, first try included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Normalized record of one brokered capability invocation.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ToolInvocation {
    pub capability_id: String,
    pub correlation_id: Uuid,
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub attempts: u32,
    pub execution_time_ms: u64,
}

#[derive(Clone)]
pub struct ToolBroker {
    registry: Arc<AdapterRegistry>,
    config: BrokerConfig,
}

impl ToolBroker {
    pub fn new(registry: Arc<AdapterRegistry>, config: BrokerConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Resolve, validate, then execute. Resolution and validation failures
    /// return `Err` without ever calling the handler; handler failures are
    /// reported through the invocation record with `success: false`.
    pub async fn invoke(
        &self,
        capability_id: &str,
        params: Value,
    ) -> Result<ToolInvocation, ToolError> {
        let correlation_id = Uuid::new_v4();
        let registration = self.registry.resolve(capability_id).await?;

        let issues = schema::validate_params(&registration.schema, &params);
        if !issues.is_empty() {
            tracing::warn!(
                "Rejecting {} invocation [{}]: {} parameter issue(s)",
                capability_id,
                correlation_id,
                issues.len()
            );
            return Err(ToolError::InvalidParameters {
                capability: capability_id.to_string(),
                issues,
            });
        }

        let started = Instant::now();
        let attempts = AtomicU32::new(0);
        let handler = registration.handler.clone();
        let action = registration.action.clone();

        let outcome = (|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            handler.execute(&action, params.clone()).await
        })
        .retry(
            &ExponentialBuilder::default()
                .with_min_delay(self.config.base_delay)
                .with_max_delay(self.config.max_delay)
                .with_max_times(self.config.max_attempts.saturating_sub(1) as usize)
                .with_jitter(),
        )
        .when(|err: &ToolError| err.should_retry())
        .notify(|err: &ToolError, dur: Duration| {
            tracing::warn!(
                "Capability {} failed, retrying after {:.2}s: {}",
                capability_id,
                dur.as_secs_f64(),
                err
            );
        })
        .await;

        let attempts = attempts.load(Ordering::SeqCst);
        let execution_time_ms = started.elapsed().as_millis() as u64;

        let invocation = match outcome {
            Ok(result) => {
                tracing::info!(
                    "Capability {} succeeded in {} attempt(s) [{}]",
                    capability_id,
                    attempts,
                    correlation_id
                );
                ToolInvocation {
                    capability_id: capability_id.to_string(),
                    correlation_id,
                    success: true,
                    result: Some(result),
                    error: None,
                    attempts,
                    execution_time_ms,
                }
            }
            Err(err) => {
                tracing::warn!(
                    "Capability {} failed after {} attempt(s) [{}]: {}",
                    capability_id,
                    attempts,
                    correlation_id,
                    err
                );
                ToolInvocation {
                    capability_id: capability_id.to_string(),
                    correlation_id,
                    success: false,
                    result: None,
                    error: Some(err.to_string()),
                    attempts,
                    execution_time_ms,
                }
            }
        };

        Ok(invocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::FnAdapter;
    use serde_json::json;

    fn fast_config() -> BrokerConfig {
        BrokerConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    fn open_schema() -> Value {
        json!({"type": "object"})
    }

    fn url_schema() -> Value {
        json!({
            "type": "object",
            "properties": { "url": { "type": "string" } },
            "required": ["url"]
        })
    }

    async fn registry_with_counting_handler(
        outcome: fn(u32) -> Result<Value, ToolError>,
    ) -> (Arc<AdapterRegistry>, Arc<AtomicU32>) {
        let registry = Arc::new(AdapterRegistry::new());
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        registry
            .register(
                "flaky/run",
                open_schema(),
                Arc::new(FnAdapter::new(move |_action: String, _params: Value| {
                    let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    async move { outcome(call) }
                })),
            )
            .await;
        (registry, calls)
    }

    #[tokio::test]
    async fn fail_twice_succeed_third_yields_exactly_three_calls() {
        let (registry, calls) = registry_with_counting_handler(|call| {
            if call < 3 {
                Err(ToolError::Retryable("connection reset".into()))
            } else {
                Ok(json!({"ok": true}))
            }
        })
        .await;
        let broker = ToolBroker::new(registry, fast_config());

        let invocation = broker.invoke("flaky/run", json!({})).await.expect("invoke");
        assert!(invocation.success);
        assert_eq!(invocation.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(invocation.result, Some(json!({"ok": true})));
        assert!(invocation.error.is_none());
    }

    #[tokio::test]
    async fn unknown_capability_never_calls_any_handler() {
        let (registry, calls) =
            registry_with_counting_handler(|_| Ok(json!({"should": "not run"}))).await;
        let broker = ToolBroker::new(registry, fast_config());

        let err = broker
            .invoke("ghost/run", json!({}))
            .await
            .err()
            .expect("error");
        assert!(matches!(err, ToolError::UnknownCapability(id) if id == "ghost/run"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_parameters_fail_before_execution() {
        let registry = Arc::new(AdapterRegistry::new());
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        registry
            .register(
                "http/fetch",
                url_schema(),
                Arc::new(FnAdapter::new(move |_action: String, _params: Value| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok(json!({})) }
                })),
            )
            .await;
        let broker = ToolBroker::new(registry, fast_config());

        let err = broker
            .invoke("http/fetch", json!({"timeout_seconds": 2}))
            .await
            .err()
            .expect("error");
        match err {
            ToolError::InvalidParameters { capability, issues } => {
                assert_eq!(capability, "http/fetch");
                assert_eq!(issues.len(), 1);
                assert_eq!(issues[0].field, "url");
            }
            other => panic!("expected InvalidParameters, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let (registry, calls) =
            registry_with_counting_handler(|_| Err(ToolError::Fatal("bad input".into()))).await;
        let broker = ToolBroker::new(registry, fast_config());

        let invocation = broker.invoke("flaky/run", json!({})).await.expect("invoke");
        assert!(!invocation.success);
        assert_eq!(invocation.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(invocation.error.as_deref().unwrap().contains("bad input"));
    }

    #[tokio::test]
    async fn exhausted_retries_report_attempt_count() {
        let (registry, calls) =
            registry_with_counting_handler(|_| Err(ToolError::Retryable("timeout".into()))).await;
        let broker = ToolBroker::new(registry, fast_config());

        let invocation = broker.invoke("flaky/run", json!({})).await.expect("invoke");
        assert!(!invocation.success);
        assert_eq!(invocation.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
