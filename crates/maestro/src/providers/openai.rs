//! OpenAI chat-completions provider.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use super::{
    ChatMessage, CompletionRequest, CompletionResponse, ModelProviderTrait, ProviderError,
    ProviderKind, TokenUsage,
};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: Option<SecretString>,
    endpoint: String,
}

impl OpenAIProvider {
    pub fn new(api_key: Option<SecretString>) -> Self {
        match &api_key {
            Some(_) => tracing::info!("OpenAI provider configured"),
            None => tracing::warn!("OpenAI provider created without an API key, disabled"),
        }
        Self {
            client: reqwest::Client::new(),
            api_key,
            endpoint: OPENAI_API_URL.to_string(),
        }
    }

    /// Create with a custom endpoint, for proxies and tests.
    pub fn with_endpoint(api_key: Option<SecretString>, endpoint: impl Into<String>) -> Self {
        let mut provider = Self::new(api_key);
        provider.endpoint = endpoint.into();
        provider
    }

    pub(crate) fn build_payload(request: &CompletionRequest) -> Value {
        let mut payload = json!({
            "model": request.model,
            "messages": request.messages,
            "temperature": request.temperature,
        });
        if let Some(max_tokens) = request.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        if request.json_mode {
            payload["response_format"] = json!({ "type": "json_object" });
        }
        payload
    }

    pub(crate) fn parse_response(
        body: &Value,
        fallback_model: &str,
    ) -> Result<CompletionResponse, ProviderError> {
        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                ProviderError::ParseError("missing choices[0].message.content".to_string())
            })?
            .to_string();
        let model = body["model"].as_str().unwrap_or(fallback_model).to_string();
        let usage = body.get("usage").and_then(|u| {
            Some(TokenUsage {
                prompt_tokens: u["prompt_tokens"].as_u64()? as u32,
                completion_tokens: u["completion_tokens"].as_u64()? as u32,
                total_tokens: u["total_tokens"].as_u64()? as u32,
            })
        });
        Ok(CompletionResponse {
            content,
            model,
            usage,
        })
    }
}

#[async_trait]
impl ModelProviderTrait for OpenAIProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAI
    }

    fn name(&self) -> &'static str {
        "OpenAI"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| ProviderError::AuthError("No OpenAI API key configured".to_string()))?;

        let payload = Self::build_payload(&request);
        tracing::debug!(
            "[OpenAI] Sending request: model={}, messages={}",
            request.model,
            request.messages.len()
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", api_key.expose_secret()))
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|seconds| seconds * 1000);
            return Err(ProviderError::RateLimited { retry_after_ms });
        }
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
        Self::parse_response(&body, &request.model)
    }

    fn default_model(&self) -> &str {
        "gpt-4o-mini"
    }

    fn validate_model(&self, model: &str) -> bool {
        matches!(model, "gpt-4o" | "gpt-4o-mini" | "gpt-4-turbo" | "gpt-3.5-turbo")
            || model.starts_with("gpt-")
            || model.starts_with("o1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json_mode: bool) -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![ChatMessage::system("plan"), ChatMessage::user("task")],
            temperature: 0.2,
            max_tokens: Some(512),
            json_mode,
        }
    }

    #[test]
    fn payload_includes_response_format_only_in_json_mode() {
        let with = OpenAIProvider::build_payload(&request(true));
        assert_eq!(with["response_format"]["type"], "json_object");
        assert_eq!(with["max_tokens"], 512);

        let without = OpenAIProvider::build_payload(&request(false));
        assert!(without.get("response_format").is_none());
    }

    #[test]
    fn parse_response_extracts_content_and_usage() {
        let body = json!({
            "model": "gpt-4o-mini",
            "choices": [{ "message": { "role": "assistant", "content": "done" } }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 4, "total_tokens": 14 }
        });
        let parsed = OpenAIProvider::parse_response(&body, "fallback").expect("parse");
        assert_eq!(parsed.content, "done");
        assert_eq!(parsed.model, "gpt-4o-mini");
        assert_eq!(parsed.usage.expect("usage").total_tokens, 14);
    }

    #[test]
    fn parse_response_without_content_is_an_error() {
        let body = json!({ "choices": [] });
        let err = OpenAIProvider::parse_response(&body, "gpt-4o-mini").err().expect("error");
        assert!(matches!(err, ProviderError::ParseError(_)));
    }

    #[test]
    fn validate_model_accepts_gpt_family() {
        let provider = OpenAIProvider::new(None);
        assert!(provider.validate_model("gpt-4o"));
        assert!(provider.validate_model("gpt-4o-mini"));
        assert!(!provider.validate_model("claude-3-5-haiku-20241022"));
        assert!(!provider.is_configured());
    }
}
