use crate::domain::ports::{ConverseRequest, ModelProvider};
use crate::utils::error::{ChatError, Result};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::{Duration, Instant};

pub const DEFAULT_MODEL_ID: &str = "claude-3-7-sonnet-20250219";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API provider.
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model_id: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String, model_id: String) -> Result<Self> {
        Self::with_base_url(api_key, model_id, DEFAULT_BASE_URL.to_string(), 120)
    }

    pub fn with_base_url(
        api_key: String,
        model_id: String,
        base_url: String,
        timeout_seconds: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model_id,
        })
    }

    fn build_body(&self, request: &ConverseRequest) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .filter(|m| !m.content.trim().is_empty())
            .map(|m| json!({"role": m.role, "content": m.content}))
            .collect();

        let mut body = json!({
            "model": self.model_id,
            "max_tokens": request.inference.max_tokens,
            "temperature": request.inference.temperature,
            "messages": messages,
        });
        if let Some(top_p) = request.inference.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(system) = request.system.as_deref().filter(|s| !s.trim().is_empty()) {
            body["system"] = json!(system);
        }
        body
    }
}

#[async_trait::async_trait]
impl ModelProvider for AnthropicProvider {
    async fn converse(&self, request: ConverseRequest) -> Result<String> {
        let start = Instant::now();
        let body = self.build_body(&request);

        tracing::debug!(
            "Calling model {} with {} messages",
            self.model_id,
            request.messages.len()
        );

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ChatError::model(format!("HTTP {}: {}", status.as_u16(), detail)));
        }

        let json: Value = response.json().await?;
        let text: String = json["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b["type"] == "text")
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ChatError::model("response contained no text content"));
        }

        tracing::debug!(
            "Model replied in {}ms (stop_reason: {})",
            start.elapsed().as_millis(),
            json["stop_reason"].as_str().unwrap_or("unknown")
        );
        Ok(text)
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{ChatMessage, InferenceConfig};
    use httpmock::prelude::*;

    fn request() -> ConverseRequest {
        ConverseRequest {
            system: Some("be brief".to_string()),
            messages: vec![ChatMessage::user("hello"), ChatMessage::assistant("  ")],
            inference: InferenceConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_converse_sends_messages_api_request() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/messages")
                .header("x-api-key", "test-key")
                .header("anthropic-version", "2023-06-01")
                .json_body_partial(r#"{"model": "test-model", "system": "be brief", "max_tokens": 4096}"#);
            then.status(200).json_body(serde_json::json!({
                "id": "msg_1",
                "content": [{"type": "text", "text": "Hi "}, {"type": "text", "text": "there"}],
                "stop_reason": "end_turn"
            }));
        });

        let provider = AnthropicProvider::with_base_url(
            "test-key".to_string(),
            "test-model".to_string(),
            server.base_url(),
            5,
        )
        .unwrap();

        let reply = provider.converse(request()).await.unwrap();
        mock.assert();
        assert_eq!(reply, "Hi there");
    }

    #[tokio::test]
    async fn test_converse_maps_http_errors() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/messages");
            then.status(401).body("invalid x-api-key");
        });

        let provider = AnthropicProvider::with_base_url(
            "bad".to_string(),
            "test-model".to_string(),
            server.base_url(),
            5,
        )
        .unwrap();

        let err = provider.converse(request()).await.unwrap_err();
        assert!(matches!(err, ChatError::ModelError { .. }));
        assert!(err.to_string().contains("401"));
    }

    #[test]
    fn test_body_skips_blank_messages() {
        let provider =
            AnthropicProvider::new("k".to_string(), DEFAULT_MODEL_ID.to_string()).unwrap();
        let body = provider.build_body(&request());
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert!((body["top_p"].as_f64().unwrap() - 0.9).abs() < 1e-6);
    }
}
