//! Adapter registry: maps capability identifiers of the form
//! `"adapter/action"` to an executable handler plus its declared parameter
//! schema. Read-mostly; registration serializes through a write lock.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use ts_rs::TS;

use crate::broker::ToolError;

/// An executable unit of external action. The `action` argument is the half
/// of the capability id after the adapter prefix, so a single handler can
/// serve several registered actions.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    async fn execute(&self, action: &str, params: Value) -> Result<Value, ToolError>;
}

/// Wraps an async closure as a [`CapabilityHandler`] for ad-hoc wiring and
/// tests.
pub struct FnAdapter<F> {
    func: F,
}

impl<F, Fut> FnAdapter<F>
where
    F: Fn(String, Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value, ToolError>> + Send,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> CapabilityHandler for FnAdapter<F>
where
    F: Fn(String, Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value, ToolError>> + Send,
{
    async fn execute(&self, action: &str, params: Value) -> Result<Value, ToolError> {
        (self.func)(action.to_string(), params).await
    }
}

/// One registered capability.
#[derive(Clone)]
pub struct CapabilityRegistration {
    pub capability_id: String,
    pub action: String,
    pub schema: Arc<Value>,
    pub handler: Arc<dyn CapabilityHandler>,
}

/// Introspection view of a registration, safe to serialize.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct CapabilitySummary {
    pub capability_id: String,
    pub schema: Value,
}

#[derive(Default)]
pub struct AdapterRegistry {
    capabilities: RwLock<HashMap<String, CapabilityRegistration>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `capability_id`. Re-registration overwrites
    /// the previous handler with a warning, never silently and never fatally.
    pub async fn register(
        &self,
        capability_id: &str,
        schema: Value,
        handler: Arc<dyn CapabilityHandler>,
    ) {
        let mut capabilities = self.capabilities.write().await;
        if capabilities.contains_key(capability_id) {
            tracing::warn!(
                "Capability {} already registered, replacing previous handler",
                capability_id
            );
        }
        let action = capability_id
            .split_once('/')
            .map(|(_, action)| action)
            .unwrap_or(capability_id)
            .to_string();
        capabilities.insert(
            capability_id.to_string(),
            CapabilityRegistration {
                capability_id: capability_id.to_string(),
                action,
                schema: Arc::new(schema),
                handler,
            },
        );
    }

    pub async fn resolve(&self, capability_id: &str) -> Result<CapabilityRegistration, ToolError> {
        let capabilities = self.capabilities.read().await;
        capabilities
            .get(capability_id)
            .cloned()
            .ok_or_else(|| ToolError::UnknownCapability(capability_id.to_string()))
    }

    pub async fn list(&self) -> Vec<CapabilitySummary> {
        let capabilities = self.capabilities.read().await;
        let mut summaries: Vec<_> = capabilities
            .values()
            .map(|registration| CapabilitySummary {
                capability_id: registration.capability_id.clone(),
                schema: registration.schema.as_ref().clone(),
            })
            .collect();
        summaries.sort_by(|a, b| a.capability_id.cmp(&b.capability_id));
        summaries
    }

    pub async fn len(&self) -> usize {
        self.capabilities.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.capabilities.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_handler() -> Arc<dyn CapabilityHandler> {
        Arc::new(FnAdapter::new(|action: String, params: Value| async move {
            Ok(json!({ "action": action, "params": params }))
        }))
    }

    #[tokio::test]
    async fn register_and_resolve_passes_action_to_handler() {
        let registry = AdapterRegistry::new();
        registry
            .register("echo/repeat", json!({"type": "object"}), echo_handler())
            .await;

        let registration = registry.resolve("echo/repeat").await.expect("resolve");
        assert_eq!(registration.action, "repeat");

        let result = registration
            .handler
            .execute(&registration.action, json!({"word": "hi"}))
            .await
            .expect("execute");
        assert_eq!(result["action"], "repeat");
        assert_eq!(result["params"]["word"], "hi");
    }

    #[tokio::test]
    async fn unknown_capability_is_an_error() {
        let registry = AdapterRegistry::new();
        let err = registry.resolve("ghost/summon").await.err().expect("error");
        assert!(matches!(err, ToolError::UnknownCapability(id) if id == "ghost/summon"));
    }

    #[tokio::test]
    async fn duplicate_registration_overwrites() {
        let registry = AdapterRegistry::new();
        registry
            .register(
                "echo/repeat",
                json!({"type": "object"}),
                Arc::new(FnAdapter::new(|_action: String, _params: Value| async {
                    Ok(json!("old"))
                })),
            )
            .await;
        registry
            .register(
                "echo/repeat",
                json!({"type": "object"}),
                Arc::new(FnAdapter::new(|_action: String, _params: Value| async {
                    Ok(json!("new"))
                })),
            )
            .await;

        assert_eq!(registry.len().await, 1);
        let registration = registry.resolve("echo/repeat").await.expect("resolve");
        let result = registration
            .handler
            .execute("repeat", json!({}))
            .await
            .expect("execute");
        assert_eq!(result, json!("new"));
    }

    #[tokio::test]
    async fn list_is_sorted_by_id() {
        let registry = AdapterRegistry::new();
        registry
            .register("zulu/run", json!({"type": "object"}), echo_handler())
            .await;
        registry
            .register("alpha/run", json!({"type": "object"}), echo_handler())
            .await;

        let listed = registry.list().await;
        let ids: Vec<_> = listed.iter().map(|c| c.capability_id.as_str()).collect();
        assert_eq!(ids, vec!["alpha/run", "zulu/run"]);
    }
}
