use crate::core::tools::{EXECUTE_SPARQL, GET_FACILITIES_NEAR};
use crate::domain::model::{ToolInfo, ToolResponse};
use crate::domain::ports::ToolBackend;
use crate::utils::error::{ChatError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Deserialize)]
struct ToolsPayload {
    #[serde(default)]
    tools: Vec<ToolInfo>,
}

/// HTTP client for the knowledge-graph tool server.
pub struct HttpToolClient {
    base_url: String,
    client: Client,
    // 依名稱排序的工具快取，initialize 後填入
    tools: RwLock<BTreeMap<String, ToolInfo>>,
    initialized: RwLock<bool>,
}

impl HttpToolClient {
    pub fn new(base_url: &str, timeout_seconds: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .pool_max_idle_per_host(5)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            tools: RwLock::new(BTreeMap::new()),
            initialized: RwLock::new(false),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Health check, initialize handshake and tool discovery.
    pub async fn connect(&self) -> Result<()> {
        let result = async {
            self.client
                .get(self.url("/health"))
                .send()
                .await?
                .error_for_status()?;
            self.initialize().await
        }
        .await;

        match &result {
            Ok(()) => tracing::info!("Connected to tool server at {}", self.base_url),
            Err(e) => tracing::error!("Failed to connect to tool server {}: {}", self.base_url, e),
        }
        result
    }

    pub async fn disconnect(&self) {
        self.tools.write().await.clear();
        *self.initialized.write().await = false;
        tracing::info!("Disconnected from tool server");
    }

    async fn initialize(&self) -> Result<()> {
        if *self.initialized.read().await {
            return Ok(());
        }

        self.client
            .post(self.url("/initialize"))
            .json(&json!({
                "protocol_version": "1.0",
                "client_info": {"name": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION")}
            }))
            .send()
            .await?
            .error_for_status()?;

        self.load_tools().await?;
        *self.initialized.write().await = true;
        tracing::info!(
            "Tool client initialized with {} tools",
            self.tools.read().await.len()
        );
        Ok(())
    }

    async fn load_tools(&self) -> Result<()> {
        let payload: ToolsPayload = self
            .client
            .get(self.url("/tools"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut tools = self.tools.write().await;
        tools.clear();
        for tool in payload.tools {
            tools.insert(tool.name.clone(), tool);
        }
        tracing::info!("Loaded tools: {:?}", tools.keys().collect::<Vec<_>>());
        Ok(())
    }

    pub async fn is_initialized(&self) -> bool {
        *self.initialized.read().await
    }

    pub async fn tool_schema(&self, name: &str) -> Result<Option<Value>> {
        self.initialize().await?;
        Ok(self
            .tools
            .read()
            .await
            .get(name)
            .map(|t| t.input_schema.clone()))
    }

    pub async fn available_tools(&self) -> Vec<String> {
        self.tools.read().await.keys().cloned().collect()
    }

    pub async fn health_check(&self) -> bool {
        match self.client.get(self.url("/health")).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    pub async fn execute_sparql(&self, query: &str) -> Result<ToolResponse> {
        self.call_tool(EXECUTE_SPARQL, json!({"query": query})).await
    }

    pub async fn facilities_near(
        &self,
        location: &str,
        facility_type: Option<&str>,
        limit: usize,
    ) -> Result<ToolResponse> {
        let mut args = json!({"location": location, "limit": limit});
        if let Some(t) = facility_type {
            args["facility_type"] = json!(t);
        }
        self.call_tool(GET_FACILITIES_NEAR, args).await
    }

    async fn post_tool(&self, name: &str, arguments: &Value) -> Result<ToolResponse> {
        let response = self
            .client
            .post(self.url(&format!("/tools/{}", name)))
            .json(&json!({ "arguments": arguments }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::ServerError {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ToolBackend for HttpToolClient {
    async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        self.initialize().await?;
        Ok(self.tools.read().await.values().cloned().collect())
    }

    /// Transport and status failures come back as an error [`ToolResponse`];
    /// only an unknown tool name is reported as `Err`.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResponse> {
        self.initialize().await?;

        if !self.tools.read().await.contains_key(name) {
            return Err(ChatError::ToolNotFound {
                tool: name.to_string(),
                available: self.available_tools().await,
            });
        }

        tracing::info!("Calling tool {} with args: {}", name, arguments);
        match self.post_tool(name, &arguments).await {
            Ok(result) => {
                tracing::info!("Tool {} completed (is_error: {})", name, result.is_error);
                Ok(result)
            }
            Err(ChatError::ServerError { status, message }) => {
                tracing::error!("HTTP error calling tool {}: {} {}", name, status, message);
                Ok(ToolResponse::error(format!("HTTP error: {} - {}", status, message)))
            }
            Err(e) => {
                tracing::error!("Error calling tool {}: {}", name, e);
                Ok(ToolResponse::error(format!("Error: {}", e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn mock_handshake(server: &MockServer) {
        server.mock(|when, then| {
            when.method(GET).path("/health");
            then.status(200).json_body(serde_json::json!({"status": "healthy"}));
        });
        server.mock(|when, then| {
            when.method(POST).path("/initialize");
            then.status(200).json_body(serde_json::json!({"protocol_version": "1.0"}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/tools");
            then.status(200).json_body(serde_json::json!({
                "tools": [
                    {"name": "count_triples", "description": "Count", "inputSchema": {"type": "object"}},
                    {"name": "execute_sparql", "description": "Run", "inputSchema": {"type": "object", "required": ["query"]}}
                ]
            }));
        });
    }

    #[tokio::test]
    async fn test_connect_loads_tool_catalog() {
        let server = MockServer::start();
        mock_handshake(&server);

        let client = HttpToolClient::new(&server.base_url(), 5).unwrap();
        client.connect().await.unwrap();

        assert!(client.is_initialized().await);
        assert_eq!(
            client.available_tools().await,
            vec!["count_triples", "execute_sparql"]
        );
        let schema = client.tool_schema("execute_sparql").await.unwrap().unwrap();
        assert_eq!(schema["required"][0], "query");
        assert!(client.tool_schema("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_call_tool_posts_arguments() {
        let server = MockServer::start();
        mock_handshake(&server);
        let call = server.mock(|when, then| {
            when.method(POST)
                .path("/tools/execute_sparql")
                .json_body(serde_json::json!({"arguments": {"query": "ASK {}"}}));
            then.status(200).json_body(serde_json::json!({
                "content": [{"type": "text", "text": "Query executed successfully. Results: true"}],
                "isError": false
            }));
        });

        let client = HttpToolClient::new(&server.base_url(), 5).unwrap();
        let result = client.execute_sparql("ASK {}").await.unwrap();

        call.assert();
        assert!(!result.is_error);
        assert!(result.text().ends_with("true"));
    }

    #[tokio::test]
    async fn test_call_tool_http_error_becomes_error_result() {
        let server = MockServer::start();
        mock_handshake(&server);
        server.mock(|when, then| {
            when.method(POST).path("/tools/count_triples");
            then.status(500).body("boom");
        });

        let client = HttpToolClient::new(&server.base_url(), 5).unwrap();
        let result = client.call_tool("count_triples", json!({})).await.unwrap();

        assert!(result.is_error);
        assert_eq!(result.text(), "HTTP error: 500 - boom");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_rejected_locally() {
        let server = MockServer::start();
        mock_handshake(&server);

        let client = HttpToolClient::new(&server.base_url(), 5).unwrap();
        let err = client.call_tool("drop_all", json!({})).await.unwrap_err();
        match err {
            ChatError::ToolNotFound { available, .. } => assert_eq!(available.len(), 2),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_health_check_false_when_unreachable() {
        let client = HttpToolClient::new("http://127.0.0.1:9", 1).unwrap();
        assert!(!client.health_check().await);
        assert!(client.connect().await.is_err());
    }
}
