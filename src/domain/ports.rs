use crate::domain::model::{ToolInfo, ToolResponse};
use crate::utils::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Anything that can list and run knowledge-graph tools.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolInfo>>;
    async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<ToolResponse>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: Option<f32>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.3,
            top_p: Some(0.9),
        }
    }
}

impl InferenceConfig {
    /// 最終彙整回答使用的設定
    pub fn synthesis() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.3,
            top_p: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConverseRequest {
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub inference: InferenceConfig,
}

/// Hosted language model reached through a converse-style API.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn converse(&self, request: ConverseRequest) -> Result<String>;
    fn model_id(&self) -> &str;
}
