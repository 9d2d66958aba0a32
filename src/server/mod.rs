//! HTTP tool server exposing the knowledge-graph tools.

use crate::config::ServerConfig;
use crate::core::store::TripleStore;
use crate::core::tools::ToolRegistry;
use crate::domain::model::{ToolInfo, ToolResponse};
use crate::utils::error::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub const PROTOCOL_VERSION: &str = "1.0";
pub const SERVER_NAME: &str = "geoint-rdf-server";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let ApiError::Internal(message) = self;
        tracing::error!("Request failed: {}", message);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                detail: "Internal server error".to_string(),
                error: message,
                timestamp: chrono::Local::now().to_rfc3339(),
            }),
        )
            .into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    error: String,
    timestamp: String,
}

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ToolRegistry>,
    pub initialized: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(store: TripleStore) -> Self {
        Self {
            registry: Arc::new(ToolRegistry::new(Arc::new(store))),
            initialized: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct InitializeRequest {
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    #[serde(default)]
    pub client_info: Value,
}

fn default_protocol_version() -> String {
    PROTOCOL_VERSION.to_string()
}

#[derive(Debug, Deserialize)]
pub struct ToolCallRequest {
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Serialize)]
pub struct ToolsListResponse {
    pub tools: Vec<ToolInfo>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/initialize", post(initialize))
        .route("/tools", get(list_tools))
        .route("/tools/:tool_name", post(call_tool))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Local::now().to_rfc3339(),
        "mcp_initialized": state.initialized.load(Ordering::SeqCst),
        "rdf_triples": state.registry.store().len(),
        "store_type": "in-memory",
    }))
}

async fn initialize(
    State(state): State<AppState>,
    Json(request): Json<InitializeRequest>,
) -> Json<Value> {
    tracing::info!(
        "Initialize request (protocol {}) from {}",
        request.protocol_version,
        request.client_info
    );
    state.initialized.store(true, Ordering::SeqCst);

    Json(json!({
        "protocol_version": request.protocol_version,
        "server_info": {"name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION")},
        "capabilities": {"tools": {}, "resources": {}},
    }))
}

async fn list_tools(State(state): State<AppState>) -> Json<ToolsListResponse> {
    Json(ToolsListResponse {
        tools: state.registry.catalog().to_vec(),
    })
}

async fn call_tool(
    State(state): State<AppState>,
    Path(tool_name): Path<String>,
    Json(request): Json<ToolCallRequest>,
) -> std::result::Result<Json<ToolResponse>, ApiError> {
    let arguments = match request.arguments {
        Value::Null => json!({}),
        other => other,
    };
    tracing::info!("Tool call: {} with args: {}", tool_name, arguments);

    // SPARQL 評估為同步運算，移出 async 執行緒
    let registry = state.registry.clone();
    let response = tokio::task::spawn_blocking(move || registry.respond(&tool_name, &arguments))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(response))
}

/// Serve on an already-bound listener until `shutdown` resolves.
pub async fn serve_on<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

pub async fn run_server(config: &ServerConfig) -> Result<()> {
    let state = AppState::new(TripleStore::with_fixture());
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!("Starting tool server on http://{}", addr);
    serve_on(listener, state, shutdown_signal()).await?;
    tracing::info!("Tool server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn spawn() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = AppState::new(TripleStore::with_fixture());
        tokio::spawn(serve_on(listener, state, std::future::pending()));
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_health_reports_store_size() {
        let base = spawn().await;
        let body: Value = reqwest::get(format!("{}/health", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["rdf_triples"], 80);
        assert_eq!(body["mcp_initialized"], false);
    }

    #[tokio::test]
    async fn test_initialize_marks_server_ready() {
        let base = spawn().await;
        let client = reqwest::Client::new();
        let body: Value = client
            .post(format!("{}/initialize", base))
            .json(&json!({"protocol_version": "1.0", "client_info": {}}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["server_info"]["name"], SERVER_NAME);
        assert!(body["capabilities"]["tools"].is_object());

        let health: Value = client
            .get(format!("{}/health", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["mcp_initialized"], true);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_result_with_ok_status() {
        let base = spawn().await;
        let response = reqwest::Client::new()
            .post(format!("{}/tools/drop_graph", base))
            .json(&json!({"arguments": {}}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let body: ToolResponse = response.json().await.unwrap();
        assert!(body.is_error);
        assert!(body.text().starts_with("Error executing tool 'drop_graph':"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_client_error() {
        let base = spawn().await;
        let response = reqwest::Client::new()
            .post(format!("{}/tools/count_triples", base))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[test]
    fn test_internal_error_body() {
        let response = ApiError::Internal("task panicked".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
