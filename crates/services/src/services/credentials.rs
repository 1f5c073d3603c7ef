//! Credential lookup boundary.
//!
//! Signing secrets and provider API keys come from a pluggable store. A
//! missing credential is an explicit `None` the caller must handle, not an
//! empty string.

use async_trait::async_trait;
use secrecy::SecretString;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch a credential for `(service, kind)`, e.g. `("openai", "api_key")`.
    async fn get_credential(&self, service: &str, kind: &str) -> Option<SecretString>;
}

/// Reads credentials from process environment variables using the
/// `<SERVICE>_<KIND>` naming scheme (`openai`/`api_key` -> `OPENAI_API_KEY`).
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialStore;

impl EnvCredentialStore {
    pub fn new() -> Self {
        Self
    }

    fn var_name(service: &str, kind: &str) -> String {
        format!(
            "{}_{}",
            service.to_uppercase().replace('-', "_"),
            kind.to_uppercase().replace('-', "_")
        )
    }
}

#[async_trait]
impl CredentialStore for EnvCredentialStore {
    async fn get_credential(&self, service: &str, kind: &str) -> Option<SecretString> {
        let name = Self::var_name(service, kind);
        match std::env::var(&name) {
            Ok(value) if !value.is_empty() => Some(SecretString::from(value)),
            _ => {
                tracing::debug!("No credential configured for {}", name);
                None
            }
        }
    }
}

/// Fixed in-memory store, used by tests and single-tenant deployments where
/// secrets arrive through config rather than the environment.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialStore {
    entries: std::collections::HashMap<(String, String), String>,
}

impl StaticCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(mut self, service: &str, kind: &str, value: &str) -> Self {
        self.entries
            .insert((service.to_string(), kind.to_string()), value.to_string());
        self
    }
}

#[async_trait]
impl CredentialStore for StaticCredentialStore {
    async fn get_credential(&self, service: &str, kind: &str) -> Option<SecretString> {
        self.entries
            .get(&(service.to_string(), kind.to_string()))
            .map(|v| SecretString::from(v.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[tokio::test]
    async fn static_store_round_trip() {
        let store = StaticCredentialStore::new().with_credential("webhook", "signing_secret", "s3cret");
        let found = store.get_credential("webhook", "signing_secret").await;
        assert_eq!(found.map(|s| s.expose_secret().to_string()), Some("s3cret".into()));
        assert!(store.get_credential("webhook", "other").await.is_none());
    }

    #[test]
    fn env_var_naming() {
        assert_eq!(EnvCredentialStore::var_name("openai", "api_key"), "OPENAI_API_KEY");
        assert_eq!(
            EnvCredentialStore::var_name("agent-mesh", "secret"),
            "AGENT_MESH_SECRET"
        );
    }
}
