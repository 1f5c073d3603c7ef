//! Anthropic messages-API provider. Anthropic differs from the
//! chat-completions shape in three ways handled here: system prompts are a
//! separate top-level field, `max_tokens` is mandatory, and responses arrive
//! as typed content blocks.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use super::{
    ChatMessage, CompletionRequest, CompletionResponse, ModelProviderTrait, ProviderError,
    ProviderKind, TokenUsage,
};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: Option<SecretString>,
    endpoint: String,
}

impl AnthropicProvider {
    pub fn new(api_key: Option<SecretString>) -> Self {
        match &api_key {
            Some(_) => tracing::info!("Anthropic provider configured"),
            None => tracing::warn!("Anthropic provider created without an API key, disabled"),
        }
        Self {
            client: reqwest::Client::new(),
            api_key,
            endpoint: ANTHROPIC_API_URL.to_string(),
        }
    }

    pub fn with_endpoint(api_key: Option<SecretString>, endpoint: impl Into<String>) -> Self {
        let mut provider = Self::new(api_key);
        provider.endpoint = endpoint.into();
        provider
    }

    /// Split system turns out into the top-level `system` field and map the
    /// rest onto Anthropic message objects.
    fn messages_to_anthropic(messages: &[ChatMessage]) -> (Option<String>, Vec<Value>) {
        let mut system_prompt: Option<String> = None;
        let mut api_messages = Vec::new();

        for message in messages {
            if message.role == "system" {
                match system_prompt {
                    None => system_prompt = Some(message.content.clone()),
                    Some(ref mut existing) => {
                        existing.push_str("\n\n");
                        existing.push_str(&message.content);
                    }
                }
            } else {
                api_messages.push(json!({
                    "role": message.role,
                    "content": message.content,
                }));
            }
        }

        (system_prompt, api_messages)
    }

    fn build_payload(request: &CompletionRequest) -> Result<Value, ProviderError> {
        let (mut system_prompt, messages) = Self::messages_to_anthropic(&request.messages);
        if messages.is_empty() {
            return Err(ProviderError::ParseError(
                "at least one non-system message is required".to_string(),
            ));
        }

        if request.json_mode {
            let instruction = "Respond with a single JSON object and nothing else.";
            system_prompt = Some(match system_prompt {
                Some(existing) => format!("{}\n\n{}", existing, instruction),
                None => instruction.to_string(),
            });
        }

        let mut payload = json!({
            "model": request.model,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": messages,
            "temperature": request.temperature,
        });
        if let Some(system) = system_prompt {
            payload["system"] = json!(system);
        }
        Ok(payload)
    }

    fn parse_response(body: &Value, fallback_model: &str) -> Result<CompletionResponse, ProviderError> {
        let blocks = body["content"]
            .as_array()
            .ok_or_else(|| ProviderError::ParseError("missing content blocks".to_string()))?;
        let content = blocks
            .iter()
            .filter_map(|block| {
                if block["type"].as_str()? == "text" {
                    block["text"].as_str().map(str::to_string)
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("");
        if content.is_empty() {
            return Err(ProviderError::ParseError(
                "response contained no text blocks".to_string(),
            ));
        }

        let model = body["model"].as_str().unwrap_or(fallback_model).to_string();
        let usage = body.get("usage").and_then(|u| {
            let input = u["input_tokens"].as_u64()?;
            let output = u["output_tokens"].as_u64()?;
            Some(TokenUsage {
                prompt_tokens: input as u32,
                completion_tokens: output as u32,
                total_tokens: (input + output) as u32,
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
impl ModelProviderTrait for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn name(&self) -> &'static str {
        "Anthropic"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            ProviderError::AuthError("No Anthropic API key configured".to_string())
        })?;

        let payload = Self::build_payload(&request)?;
        tracing::debug!(
            "[Anthropic] Sending request: model={}, messages={}",
            request.model,
            request.messages.len()
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("x-api-key", api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 429 {
                return Err(ProviderError::RateLimited {
                    retry_after_ms: None,
                });
            }
            if status.as_u16() == 529 {
                return Err(ProviderError::NotAvailable(
                    "Anthropic API is temporarily overloaded".to_string(),
                ));
            }
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
        "claude-3-5-haiku-20241022"
    }

    fn validate_model(&self, model: &str) -> bool {
        matches!(
            model,
            "claude-sonnet-4-20250514"
                | "claude-3-5-sonnet-20241022"
                | "claude-3-5-haiku-20241022"
                | "claude-3-haiku-20240307"
        ) || model.starts_with("claude-")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_turns_become_the_system_field() {
        let request = CompletionRequest {
            model: "claude-3-5-haiku-20241022".to_string(),
            messages: vec![
                ChatMessage::system("you are the judge"),
                ChatMessage::system("score strictly"),
                ChatMessage::user("evaluate this"),
            ],
            temperature: 0.1,
            max_tokens: None,
            json_mode: false,
        };
        let payload = AnthropicProvider::build_payload(&request).expect("payload");
        assert_eq!(payload["system"], "you are the judge\n\nscore strictly");
        assert_eq!(payload["messages"].as_array().expect("messages").len(), 1);
        assert_eq!(payload["max_tokens"], DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn json_mode_appends_format_instruction() {
        let request = CompletionRequest {
            model: "claude-3-5-haiku-20241022".to_string(),
            messages: vec![ChatMessage::user("plan it")],
            temperature: 0.2,
            max_tokens: Some(256),
            json_mode: true,
        };
        let payload = AnthropicProvider::build_payload(&request).expect("payload");
        assert!(payload["system"]
            .as_str()
            .expect("system")
            .contains("single JSON object"));
    }

    #[test]
    fn payload_without_user_messages_is_rejected() {
        let request = CompletionRequest {
            model: "claude-3-5-haiku-20241022".to_string(),
            messages: vec![ChatMessage::system("only system")],
            temperature: 0.2,
            max_tokens: None,
            json_mode: false,
        };
        assert!(AnthropicProvider::build_payload(&request).is_err());
    }

    #[test]
    fn parse_response_joins_text_blocks_and_sums_usage() {
        let body = json!({
            "model": "claude-3-5-haiku-20241022",
            "content": [
                { "type": "text", "text": "first " },
                { "type": "text", "text": "second" }
            ],
            "usage": { "input_tokens": 7, "output_tokens": 3 }
        });
        let parsed = AnthropicProvider::parse_response(&body, "fallback").expect("parse");
        assert_eq!(parsed.content, "first second");
        let usage = parsed.usage.expect("usage");
        assert_eq!(usage.total_tokens, 10);
    }

    #[test]
    fn validate_model_accepts_claude_family() {
        let provider = AnthropicProvider::new(None);
        assert!(provider.validate_model("claude-3-5-haiku-20241022"));
        assert!(!provider.validate_model("gpt-4o"));
    }
}
