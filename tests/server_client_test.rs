use geoint_chat::domain::ports::ToolBackend;
use geoint_chat::server::{serve_on, AppState};
use geoint_chat::{ChatError, HttpToolClient, TripleStore};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

async fn start_server() -> (String, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(serve_on(
        listener,
        AppState::new(TripleStore::with_fixture()),
        async move {
            let _ = rx.await;
        },
    ));
    (format!("http://{}", addr), tx)
}

#[tokio::test]
async fn test_client_discovers_all_tools() {
    let (url, _stop) = start_server().await;
    let client = HttpToolClient::new(&url, 5).unwrap();

    assert!(client.health_check().await);
    client.connect().await.unwrap();

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 7);
    let schema = client
        .tool_schema("get_facilities_near")
        .await
        .unwrap()
        .unwrap();
    assert!(schema.get("required").is_none());
    assert_eq!(
        schema["anyOf"],
        json!([{"required": ["location"]}, {"required": ["lat", "lon"]}])
    );

    // 只給座標也能查詢
    let result = client
        .call_tool(
            "get_facilities_near",
            json!({"lat": 38.8719, "lon": -77.0563, "radius_km": 3}),
        )
        .await
        .unwrap();
    assert!(!result.is_error, "{}", result.text());
    assert!(result.text().contains("The Pentagon"));
}

#[tokio::test]
async fn test_sparql_over_http() {
    let (url, _stop) = start_server().await;
    let client = HttpToolClient::new(&url, 5).unwrap();

    let result = client
        .execute_sparql(
            "SELECT ?name WHERE { ?f a geoint:Facility ; geoint:state \"Maryland\" ; rdfs:label ?name } ORDER BY ?name",
        )
        .await
        .unwrap();

    assert!(!result.is_error);
    let text = result.text();
    assert!(text.starts_with("Query Results (2 rows):"));
    assert!(text.contains("Baltimore/Washington International Airport"));
    assert!(text.contains("Joint Base Andrews"));
}

#[tokio::test]
async fn test_tool_failures_are_error_results() {
    let (url, _stop) = start_server().await;
    let client = HttpToolClient::new(&url, 5).unwrap();

    let bad_query = client.execute_sparql("SELECT WHERE {").await.unwrap();
    assert!(bad_query.is_error);
    assert!(bad_query
        .text()
        .starts_with("Error executing tool 'execute_sparql':"));

    let missing = client
        .call_tool("get_facilities_near", json!({}))
        .await
        .unwrap();
    assert!(missing.is_error);

    let unknown = client.call_tool("drop_graph", json!({})).await;
    assert!(matches!(unknown, Err(ChatError::ToolNotFound { .. })));
}

#[tokio::test]
async fn test_facilities_near_over_http() {
    let (url, _stop) = start_server().await;
    let client = HttpToolClient::new(&url, 5).unwrap();

    let result = client
        .facilities_near("Virginia", Some("Airport"), 10)
        .await
        .unwrap();
    let text = result.text();
    assert_eq!(text.matches("📍").count(), 2);
    assert!(text.contains("Washington Dulles International Airport"));
}

#[tokio::test]
async fn test_client_reports_stopped_server() {
    let (url, stop) = start_server().await;
    let client = HttpToolClient::new(&url, 2).unwrap();
    client.connect().await.unwrap();

    stop.send(()).unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    assert!(!client.health_check().await);
    let result = client.call_tool("count_triples", json!({})).await.unwrap();
    assert!(result.is_error);
    assert!(result.text().starts_with("Error:"));
}
