//! Ollama provider, the no-key local path. Talks to Ollama's
//! OpenAI-compatible chat endpoint so payloads and responses share the
//! chat-completions shape. Availability is a reachability check against the
//! local server rather than a credential check.

use std::{
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;

use super::{
    openai::OpenAIProvider, CompletionRequest, CompletionResponse, ModelProviderTrait,
    ProviderError, ProviderKind,
};

const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";
const PROBE_TIMEOUT: Duration = Duration::from_millis(250);

pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaProvider {
    pub fn new(base_url: Option<String>) -> Self {
        let base_url = base_url
            .or_else(|| std::env::var("OLLAMA_BASE_URL").ok())
            .unwrap_or_else(|| DEFAULT_OLLAMA_BASE_URL.to_string());
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn chat_endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn probe_address(&self) -> Option<String> {
        let stripped = self
            .base_url
            .trim_start_matches("http://")
            .trim_start_matches("https://");
        let host_port = stripped.split('/').next()?;
        if host_port.is_empty() {
            return None;
        }
        if host_port.contains(':') {
            Some(host_port.to_string())
        } else {
            Some(format!("{}:11434", host_port))
        }
    }
}

#[async_trait]
impl ModelProviderTrait for OllamaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn name(&self) -> &'static str {
        "Ollama"
    }

    fn is_configured(&self) -> bool {
        let Some(address) = self.probe_address() else {
            return false;
        };
        address
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .map(|addr| TcpStream::connect_timeout(&addr, PROBE_TIMEOUT).is_ok())
            .unwrap_or(false)
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let payload = OpenAIProvider::build_payload(&request);
        tracing::debug!(
            "[Ollama] Sending request: model={}, messages={}",
            request.model,
            request.messages.len()
        );

        let response = self
            .client
            .post(self.chat_endpoint())
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    ProviderError::NotAvailable(format!("Ollama server unreachable: {}", e))
                } else {
                    ProviderError::RequestFailed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message: body,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;
        OpenAIProvider::parse_response(&body, &request.model)
    }

    fn default_model(&self) -> &str {
        "qwen2.5-coder:7b"
    }

    fn validate_model(&self, model: &str) -> bool {
        matches!(
            model,
            "qwen2.5-coder:7b"
                | "deepseek-coder:6.7b"
                | "qwen2.5:14b"
                | "llama3.1:8b"
                | "mistral:7b"
        ) || model.contains(':')
    }
}
