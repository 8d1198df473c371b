use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use crate::api::middleware::AppError;
use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Per-call overrides; `None` falls back to the configured defaults
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Ask the gateway for a JSON object response
    pub json_response: bool,
}

/// Chat-completion client used by the plan generator and the answer generator
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<String, AppError>;
}

/// OpenAI-style chat gateway over HTTP
pub struct LlmService {
    gateway_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    http_client: HttpClient,
}

impl LlmService {
    pub fn new(config: &Config) -> Self {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.llm.timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build LLM HTTP client with timeout, using defaults: {}", e);
                HttpClient::new()
            });

        Self {
            gateway_url: config.llm.gateway_url.clone(),
            api_key: config.llm.api_key.clone(),
            model: config.llm.model.clone(),
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
            http_client,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.gateway_url.trim().is_empty()
    }

    fn endpoint(&self) -> String {
        let base = self.gateway_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{}/chat/completions", base)
        }
    }
}

#[async_trait]
impl LlmClient for LlmService {
    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<String, AppError> {
        if !self.is_configured() {
            return Err(AppError::LlmService("LLM gateway not configured".to_string()));
        }

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": options.temperature.unwrap_or(self.temperature),
            "max_tokens": options.max_tokens.unwrap_or(self.max_tokens),
        });
        if options.json_response {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let mut request = self.http_client.post(self.endpoint()).json(&body);

        // Add API key if available
        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::LlmService(format!("Failed to call LLM service: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::LlmService(format!(
                "LLM service returned error {}: {}",
                status, error_text
            )));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::LlmService(format!("Failed to parse LLM response: {}", e)))?;

        extract_content(&result)
            .ok_or_else(|| AppError::LlmService("LLM response does not contain any content".to_string()))
    }
}

/// Pull the assistant text out of a chat-completion body, tolerating the
/// simpler `{text|content|response}` gateway shapes
fn extract_content(result: &serde_json::Value) -> Option<String> {
    result["choices"][0]["message"]["content"]
        .as_str()
        .or_else(|| result["text"].as_str())
        .or_else(|| result["content"].as_str())
        .or_else(|| result["response"].as_str())
        .map(|s| s.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_content_shapes() {
        let openai = json!({"choices": [{"message": {"role": "assistant", "content": " hi "}}]});
        assert_eq!(extract_content(&openai).as_deref(), Some("hi"));

        let simple = json!({"text": "SELECT 1"});
        assert_eq!(extract_content(&simple).as_deref(), Some("SELECT 1"));

        assert!(extract_content(&json!({"unexpected": true})).is_none());
    }

    #[test]
    fn test_endpoint_normalisation() {
        let mut config = Config::for_tests();
        config.llm.gateway_url = "http://gateway/v1/".to_string();
        assert_eq!(LlmService::new(&config).endpoint(), "http://gateway/v1/chat/completions");

        config.llm.gateway_url = "http://gateway/v1/chat/completions".to_string();
        assert_eq!(LlmService::new(&config).endpoint(), "http://gateway/v1/chat/completions");
    }

    #[tokio::test]
    async fn test_unconfigured_gateway_is_an_error() {
        let service = LlmService::new(&Config::for_tests());
        let err = service
            .chat(&[ChatMessage::user("hello")], &ChatOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::LlmService(msg) if msg.contains("not configured")));
    }

    #[test]
    fn test_roles_serialize_lowercase() {
        let msg = serde_json::to_value(ChatMessage::assistant("x")).unwrap();
        assert_eq!(msg["role"], "assistant");
    }
}
