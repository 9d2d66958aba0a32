use anyhow::Result;
use geoint_chat::app::ChatSession;
use geoint_chat::config::AgentConfig;
use geoint_chat::server::{serve_on, AppState};
use geoint_chat::{Agent, AnthropicProvider, HttpToolClient, TripleStore};
use httpmock::prelude::*;
use std::sync::Arc;
use tokio::net::TcpListener;

async fn start_tool_server() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(serve_on(
        listener,
        AppState::new(TripleStore::with_fixture()),
        std::future::pending(),
    ));
    Ok(format!("http://{}", addr))
}

fn model_reply(text: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "msg_test",
        "type": "message",
        "role": "assistant",
        "content": [{"type": "text", "text": text}],
        "stop_reason": "end_turn"
    })
}

/// 模擬模型：第一輪呼叫工具，第二輪給出答案
fn mock_two_step_model(server: &MockServer) {
    server.mock(|when, then| {
        when.method(POST)
            .path("/v1/messages")
            .body_contains("Current iteration: 1/5");
        then.status(200).json_body(model_reply(
            "I should look up facilities.\nACTION: TOOL_CALL\nTOOL: get_facilities_near\nARGUMENTS: {\"location\": \"Maryland\"}\nREASONING: the user asked about Maryland",
        ));
    });
    server.mock(|when, then| {
        when.method(POST)
            .path("/v1/messages")
            .body_contains("Current iteration: 2/5");
        then.status(200).json_body(model_reply(
            "ACTION: FINAL_ANSWER\nCONTENT: Maryland has two facilities:\n- Joint Base Andrews\n- BWI Airport",
        ));
    });
}

#[tokio::test]
async fn test_agent_answers_with_live_tools() -> Result<()> {
    let tool_url = start_tool_server().await?;
    let model_server = MockServer::start();
    mock_two_step_model(&model_server);

    let client = Arc::new(HttpToolClient::new(&tool_url, 5)?);
    client.connect().await?;
    let provider = Arc::new(AnthropicProvider::with_base_url(
        "test-key".to_string(),
        "claude-test".to_string(),
        model_server.base_url(),
        5,
    )?);

    let mut agent = Agent::new("integration agent", provider, client);
    assert_eq!(agent.initialize_tools().await, 7);

    let reply = agent.process_query("What facilities are in Maryland?").await;

    assert_eq!(
        reply.text,
        "Maryland has two facilities:\n- Joint Base Andrews\n- BWI Airport"
    );
    assert_eq!(reply.tool_results.len(), 1);
    let outcome = &reply.tool_results[0];
    assert_eq!(outcome.tool_name, "get_facilities_near");
    assert!(!outcome.is_error);
    assert!(outcome.content.contains("Joint Base Andrews"));
    assert_eq!(agent.history().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_model_failure_is_reported_in_reply() -> Result<()> {
    let tool_url = start_tool_server().await?;
    let model_server = MockServer::start();
    model_server.mock(|when, then| {
        when.method(POST).path("/v1/messages");
        then.status(529).body(r#"{"type":"error","error":{"type":"overloaded_error"}}"#);
    });

    let client = Arc::new(HttpToolClient::new(&tool_url, 5)?);
    let provider = Arc::new(AnthropicProvider::with_base_url(
        "test-key".to_string(),
        "claude-test".to_string(),
        model_server.base_url(),
        5,
    )?);
    let mut agent = Agent::new("integration agent", provider, client);
    agent.initialize_tools().await;

    let reply = agent.process_query("Anything?").await;
    assert!(reply.text.starts_with("I encountered an error:"));
    assert!(reply.text.contains("529"));
    Ok(())
}

#[tokio::test]
async fn test_chat_session_builds_graph_from_conversation() -> Result<()> {
    let tool_url = start_tool_server().await?;
    let model_server = MockServer::start();
    mock_two_step_model(&model_server);

    let client = Arc::new(HttpToolClient::new(&tool_url, 5)?);
    let provider = Arc::new(AnthropicProvider::with_base_url(
        "test-key".to_string(),
        "claude-test".to_string(),
        model_server.base_url(),
        5,
    )?);
    let mut session = ChatSession::new(client, provider, AgentConfig::default());

    let status = session.connect().await?;
    assert_eq!(status, "Connected to tool server. 7 tools available.");

    session.ask("What facilities are in Maryland?").await?;

    let graph = session.last_graph().expect("graph should be built");
    let andrews = graph
        .node("geoint:joint_base_andrews")
        .expect("facility node");
    assert_eq!(andrews.node_type, "Facility");
    assert_eq!(andrews.label, "Joint Base Andrews");

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("graph.json");
    session
        .handle_command(&format!("/graph json {}", path.display()))
        .await?;
    let exported: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    assert!(!exported["nodes"].as_array().unwrap().is_empty());
    Ok(())
}
