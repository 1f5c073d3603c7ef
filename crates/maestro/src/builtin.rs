//! Built-in capabilities registered at engine startup: wall-clock reads,
//! plain HTTP fetches with transient/fatal classification, and placeholder
//! template rendering used by the builder stage's scaffolding flow.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    broker::ToolError,
    registry::{AdapterRegistry, CapabilityHandler},
    MaestroError,
};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const FETCH_BODY_MAX_CHARS: usize = 8192;

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct NowParams {}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct FetchParams {
    #[schemars(description = "Absolute URL to fetch with a GET request")]
    pub url: String,

    #[schemars(description = "Per-request timeout in seconds")]
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct TemplateParams {
    #[schemars(description = "Template text with {{name}} placeholders")]
    pub template: String,

    #[schemars(description = "Substitution values keyed by placeholder name")]
    pub values: std::collections::HashMap<String, Value>,
}

fn capability_schema<T: schemars::JsonSchema>() -> crate::Result<Value> {
    serde_json::to_value(schemars::schema_for!(T))
        .map_err(|e| MaestroError::ConfigError(format!("capability schema generation failed: {}", e)))
}

/// Register the built-in adapters. Call once at startup, before the graph
/// engine accepts sessions.
pub async fn register_builtin_adapters(registry: &AdapterRegistry) -> crate::Result<()> {
    registry
        .register("clock/now", capability_schema::<NowParams>()?, Arc::new(ClockAdapter))
        .await;
    registry
        .register(
            "http/fetch",
            capability_schema::<FetchParams>()?,
            Arc::new(HttpAdapter::new()?),
        )
        .await;
    registry
        .register(
            "text/template",
            capability_schema::<TemplateParams>()?,
            Arc::new(TemplateAdapter),
        )
        .await;
    Ok(())
}

pub struct ClockAdapter;

#[async_trait]
impl CapabilityHandler for ClockAdapter {
    async fn execute(&self, action: &str, _params: Value) -> Result<Value, ToolError> {
        if action != "now" {
            return Err(ToolError::Fatal(format!("unsupported clock action: {}", action)));
        }
        let now = Utc::now();
        Ok(json!({
            "timestamp": now.to_rfc3339(),
            "unix_ms": now.timestamp_millis(),
        }))
    }
}

pub struct HttpAdapter {
    client: reqwest::Client,
}

impl HttpAdapter {
    pub fn new() -> crate::Result<Self> {
        let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CapabilityHandler for HttpAdapter {
    async fn execute(&self, action: &str, params: Value) -> Result<Value, ToolError> {
        if action != "fetch" {
            return Err(ToolError::Fatal(format!("unsupported http action: {}", action)));
        }
        let params: FetchParams = serde_json::from_value(params)
            .map_err(|e| ToolError::Fatal(format!("malformed fetch parameters: {}", e)))?;

        let mut request = self.client.get(&params.url);
        if let Some(seconds) = params.timeout_seconds {
            request = request.timeout(Duration::from_secs(seconds));
        }

        let response = request.send().await.map_err(classify_transport_error)?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();

        if status.is_server_error() || status.as_u16() == 408 || status.as_u16() == 429 {
            return Err(ToolError::Retryable(format!(
                "fetch of {} returned HTTP {}",
                params.url, status
            )));
        }
        if !status.is_success() {
            return Err(ToolError::Fatal(format!(
                "fetch of {} returned HTTP {}",
                params.url, status
            )));
        }

        Ok(json!({
            "status": status.as_u16(),
            "content_type": content_type,
            "body": clip_body(&body),
        }))
    }
}

fn classify_transport_error(err: reqwest::Error) -> ToolError {
    if err.is_timeout() || err.is_connect() {
        ToolError::Retryable(format!("fetch transport failure: {}", err))
    } else {
        ToolError::Fatal(format!("fetch failed: {}", err))
    }
}

fn clip_body(body: &str) -> String {
    if body.chars().count() <= FETCH_BODY_MAX_CHARS {
        body.to_string()
    } else {
        body.chars().take(FETCH_BODY_MAX_CHARS).collect()
    }
}

pub struct TemplateAdapter;

#[async_trait]
impl CapabilityHandler for TemplateAdapter {
    async fn execute(&self, action: &str, params: Value) -> Result<Value, ToolError> {
        if action != "template" {
            return Err(ToolError::Fatal(format!(
                "unsupported text action: {}",
                action
            )));
        }
        let params: TemplateParams = serde_json::from_value(params)
            .map_err(|e| ToolError::Fatal(format!("malformed template parameters: {}", e)))?;

        let missing: Vec<String> = placeholders(&params.template)
            .into_iter()
            .filter(|name| !params.values.contains_key(name))
            .collect();
        if !missing.is_empty() {
            return Err(ToolError::Fatal(format!(
                "template placeholders without values: {}",
                missing.join(", ")
            )));
        }

        let mut rendered = params.template.clone();
        for (name, value) in &params.values {
            let placeholder = format!("{{{{{}}}}}", name);
            let replacement = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            rendered = rendered.replace(&placeholder, &replacement);
        }

        Ok(json!({ "rendered": rendered }))
    }
}

fn placeholders(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        let after = &rest[open + 2..];
        match after.find("}}") {
            Some(close) => {
                names.push(after[..close].to_string());
                rest = &after[close + 2..];
            }
            None => break,
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn clock_now_returns_parseable_timestamp() {
        let result = ClockAdapter
            .execute("now", json!({}))
            .await
            .expect("clock");
        let stamp = result["timestamp"].as_str().expect("timestamp");
        assert!(DateTime::parse_from_rfc3339(stamp).is_ok());
        assert!(result["unix_ms"].as_i64().expect("unix_ms") > 0);
    }

    #[tokio::test]
    async fn template_substitutes_all_placeholders() {
        let result = TemplateAdapter
            .execute(
                "template",
                json!({
                    "template": "fn {{name}}() -> {{ret}} {}",
                    "values": { "name": "health", "ret": "bool" }
                }),
            )
            .await
            .expect("template");
        assert_eq!(result["rendered"], "fn health() -> bool {}");
    }

    #[tokio::test]
    async fn template_with_missing_value_is_fatal() {
        let err = TemplateAdapter
            .execute(
                "template",
                json!({
                    "template": "hello {{name}}, meet {{other}}",
                    "values": { "name": "sam" }
                }),
            )
            .await
            .err()
            .expect("error");
        match err {
            ToolError::Fatal(message) => assert!(message.contains("other")),
            other => panic!("expected Fatal, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn non_string_values_render_as_json() {
        let result = TemplateAdapter
            .execute(
                "template",
                json!({
                    "template": "retries = {{count}}",
                    "values": { "count": 3 }
                }),
            )
            .await
            .expect("template");
        assert_eq!(result["rendered"], "retries = 3");
    }

    #[test]
    fn fetch_schema_requires_url() {
        let schema = capability_schema::<FetchParams>().expect("schema");
        let required = schema["required"].as_array().expect("required");
        assert!(required.contains(&json!("url")));
    }
}
