use crate::config::AgentConfig;
use crate::core::agent::{Agent, AgentReply};
use crate::core::graph::{ContextExtractor, KnowledgeGraph};
use crate::core::tools::{GET_FACILITIES_NEAR, GET_SAMPLE_DATA};
use crate::domain::model::{AgentMessage, ContentItem, Role, ToolResponse};
use crate::domain::ports::{InferenceConfig, ModelProvider, ToolBackend};
use crate::utils::error::{ChatError, Result};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

pub const SAMPLE_QUERIES: [&str; 8] = [
    "What facilities are near Washington DC?",
    "Find all military bases in Virginia",
    "Show me airports and their locations",
    "What types of facilities do we have data for?",
    "What is connected to the Pentagon?",
    "Show relationships between government facilities",
    "How many triples are in the knowledge graph?",
    "Which facilities are within 30 km of 38.9, -77.0?",
];

const LOCATION_HINTS: [&str; 4] = ["washington", "virginia", "maryland", "dc"];
const SUPPLEMENT_LOCATIONS: [&str; 3] = ["Washington DC", "Virginia", "Maryland"];
const TYPE_HINTS: [&str; 4] = ["military", "base", "airport", "government"];

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Disconnected,
    Connected { tools: Vec<String> },
    Failed { message: String },
}

impl ConnectionStatus {
    pub fn message(&self) -> String {
        match self {
            ConnectionStatus::Disconnected => "Not connected".to_string(),
            ConnectionStatus::Connected { tools } => {
                format!("Connected to tool server. {} tools available.", tools.len())
            }
            ConnectionStatus::Failed { message } => {
                format!("Failed to connect to tool server: {}", message)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Reply(String),
    Quit,
}

/// One terminal conversation: agent, transcript and the last graph built.
pub struct ChatSession {
    conversation_id: String,
    backend: Arc<dyn ToolBackend>,
    provider: Arc<dyn ModelProvider>,
    agent_config: AgentConfig,
    inference: InferenceConfig,
    agent: Option<Agent>,
    status: ConnectionStatus,
    messages: Vec<AgentMessage>,
    show_graph: bool,
    last_query: String,
    last_reply: String,
    last_sources: Vec<ToolResponse>,
    last_graph: Option<KnowledgeGraph>,
}

impl ChatSession {
    pub fn new(
        backend: Arc<dyn ToolBackend>,
        provider: Arc<dyn ModelProvider>,
        agent_config: AgentConfig,
    ) -> Self {
        Self {
            conversation_id: format!("conv_{}", chrono::Local::now().format("%Y%m%d_%H%M%S")),
            backend,
            provider,
            agent_config,
            inference: InferenceConfig::default(),
            agent: None,
            status: ConnectionStatus::Disconnected,
            messages: Vec::new(),
            show_graph: true,
            last_query: String::new(),
            last_reply: String::new(),
            last_sources: Vec::new(),
            last_graph: None,
        }
    }

    pub fn with_inference(mut self, inference: InferenceConfig) -> Self {
        self.inference = inference;
        self
    }

    pub fn set_show_graph(&mut self, enabled: bool) {
        self.show_graph = enabled;
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn messages(&self) -> &[AgentMessage] {
        &self.messages
    }

    pub fn last_graph(&self) -> Option<&KnowledgeGraph> {
        self.last_graph.as_ref()
    }

    pub fn last_reply(&self) -> &str {
        &self.last_reply
    }

    pub fn last_sources(&self) -> &[ToolResponse] {
        &self.last_sources
    }

    /// 連線至工具伺服器並建立 agent
    pub async fn connect(&mut self) -> Result<String> {
        match self.backend.list_tools().await {
            Ok(tools) => {
                let names: Vec<String> = tools.into_iter().map(|t| t.name).collect();
                tracing::info!("Tool server connection successful ({} tools)", names.len());
                self.status = ConnectionStatus::Connected { tools: names };
            }
            Err(e) => {
                tracing::error!("Tool server connection failed: {}", e);
                self.status = ConnectionStatus::Failed {
                    message: e.to_string(),
                };
                return Err(e);
            }
        }

        let mut agent = Agent::new(
            self.agent_config.name.clone(),
            self.provider.clone(),
            self.backend.clone(),
        )
        .with_limits(self.agent_config.max_iterations, self.agent_config.history_window)
        .with_inference(self.inference);
        agent.initialize_tools().await;
        self.agent = Some(agent);

        Ok(self.status.message())
    }

    pub async fn ask(&mut self, query: &str) -> Result<String> {
        let agent = self.agent.as_mut().ok_or_else(|| ChatError::NotConnected {
            message: "Agent not initialized. Please check your configuration and try again."
                .to_string(),
        })?;

        self.messages.push(AgentMessage::new(Role::User, query));
        let reply = agent.process_query(query).await;
        tracing::info!(
            "User query processed ({} chars reply, {} tool calls)",
            reply.text.len(),
            reply.tool_results.len()
        );

        self.last_query = query.to_string();
        self.last_reply = reply.text.clone();
        self.messages
            .push(AgentMessage::new(Role::Assistant, reply.text.clone()));

        self.last_sources = self.gather_graph_sources(query, &reply).await;
        self.last_graph = if self.show_graph {
            self.build_graph()
        } else {
            None
        };

        Ok(reply.text)
    }

    /// Reply text, the agent's own tool output and one supplementary lookup
    /// chosen from the wording of the question.
    async fn gather_graph_sources(&self, query: &str, reply: &AgentReply) -> Vec<ToolResponse> {
        let mut sources = Vec::new();
        if !reply.text.trim().is_empty() {
            sources.push(ToolResponse::ok(vec![ContentItem::text(reply.text.clone())]));
        }
        sources.extend(
            reply
                .tool_results
                .iter()
                .filter(|r| !r.is_error)
                .map(|r| ToolResponse::ok(vec![ContentItem::text(r.content.clone())])),
        );

        let lower = query.to_lowercase();
        let supplement = if LOCATION_HINTS.iter().any(|h| lower.contains(h)) {
            SUPPLEMENT_LOCATIONS
                .iter()
                .find(|loc| lower.contains(&loc.to_lowercase()))
                .map(|loc| (GET_FACILITIES_NEAR, json!({"location": loc, "limit": 20})))
        } else if TYPE_HINTS.iter().any(|h| lower.contains(h)) {
            Some((GET_SAMPLE_DATA, json!({"limit": 50})))
        } else {
            Some((GET_SAMPLE_DATA, json!({"limit": 30})))
        };

        if let Some((tool, args)) = supplement {
            match self.backend.call_tool(tool, args).await {
                Ok(result) if !result.is_error => sources.push(result),
                Ok(result) => tracing::warn!("Supplementary {} failed: {}", tool, result.text()),
                Err(e) => tracing::warn!("Failed to call {}: {}", tool, e),
            }
        }

        tracing::debug!("Stored {} sources for graph generation", sources.len());
        sources
    }

    fn build_graph(&self) -> Option<KnowledgeGraph> {
        // 圖用全部解析出的三元組，查詢實體僅供記錄
        let entities = ContextExtractor::new().query_entities(&self.last_query);
        tracing::debug!("Query entities: {:?}", entities);
        let graph = KnowledgeGraph::from_responses(&self.last_sources);
        if graph.is_empty() {
            tracing::warn!("Graph creation resulted in empty graph");
            return None;
        }
        tracing::info!(
            "Created graph with {} nodes and {} edges",
            graph.nodes().len(),
            graph.edges().len()
        );
        Some(graph)
    }

    fn require_graph(&self) -> Result<&KnowledgeGraph> {
        self.last_graph.as_ref().ok_or_else(|| {
            ChatError::config("No graph yet. Ask a question about facilities or locations first.")
        })
    }

    pub async fn handle_command(&mut self, line: &str) -> Result<CommandOutcome> {
        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        let reply = match (command, args.as_slice()) {
            ("/quit" | "/exit", _) => return Ok(CommandOutcome::Quit),
            ("/graph", []) => match &self.last_graph {
                Some(graph) => graph.summary(),
                None => "No graph yet. Ask a question about facilities or locations.".to_string(),
            },
            ("/graph", ["on"]) => {
                self.show_graph = true;
                if self.last_graph.is_none() && !self.last_sources.is_empty() {
                    self.last_graph = self.build_graph();
                }
                "Graph visualisation enabled".to_string()
            }
            ("/graph", ["off"]) => {
                self.show_graph = false;
                "Graph visualisation disabled".to_string()
            }
            ("/graph", ["dot", path]) => {
                let dot = self.require_graph()?.to_dot();
                write_file(path, &dot).await?;
                format!("Graph written to {}", path)
            }
            ("/graph", ["json", path]) => {
                let json = serde_json::to_string_pretty(&self.require_graph()?.to_json())?;
                write_file(path, &json).await?;
                format!("Graph written to {}", path)
            }
            ("/tools", _) => match &self.status {
                ConnectionStatus::Connected { tools } => format!(
                    "{}\n{}",
                    self.status.message(),
                    tools.iter().map(|t| format!("  • {}", t)).collect::<Vec<_>>().join("\n")
                ),
                other => other.message(),
            },
            ("/history", _) => {
                if self.messages.is_empty() {
                    "No messages yet".to_string()
                } else {
                    self.messages
                        .iter()
                        .map(|m| {
                            format!(
                                "[{}] {}: {}",
                                m.timestamp.format("%H:%M:%S"),
                                m.role.as_str(),
                                m.content
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            ("/clear", _) => {
                self.messages.clear();
                self.last_sources.clear();
                self.last_graph = None;
                if let Some(agent) = self.agent.as_mut() {
                    agent.clear_history();
                }
                "Conversation cleared".to_string()
            }
            ("/samples", _) => sample_text(),
            ("/help", _) => help_text(),
            _ => format!("Unknown command '{}'. Type /help for commands.", line.trim()),
        };
        Ok(CommandOutcome::Reply(reply))
    }
}

async fn write_file(path: &str, content: &str) -> Result<()> {
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await?;
    Ok(())
}

pub fn sample_text() -> String {
    let mut out = String::from("💡 Sample queries to try:\n");
    for q in SAMPLE_QUERIES {
        out.push_str(&format!("   • '{}'\n", q));
    }
    out
}

fn help_text() -> String {
    [
        "Commands:",
        "  /graph              show the last knowledge graph",
        "  /graph on|off       toggle graph building",
        "  /graph dot <file>   export the graph as Graphviz DOT",
        "  /graph json <file>  export the graph as JSON",
        "  /tools              list available tools",
        "  /history            show the conversation",
        "  /clear              clear the conversation",
        "  /samples            show sample questions",
        "  /quit               leave",
    ]
    .join("\n")
}

/// Reads questions from stdin until EOF or `/quit`.
pub async fn run_chat(session: &mut ChatSession) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Conversation {}", session.conversation_id());
    println!("{}", sample_text());
    println!("Type /help for commands.");

    loop {
        stdout.write_all(b"\n> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('/') {
            match session.handle_command(line).await {
                Ok(CommandOutcome::Quit) => break,
                Ok(CommandOutcome::Reply(text)) => println!("{}", text),
                Err(e) => eprintln!("❌ {}", e.user_friendly_message()),
            }
            continue;
        }

        match session.ask(line).await {
            Ok(reply) => {
                println!("\n{}", reply);
                if let Some(graph) = session.last_graph() {
                    println!("\n🕸️ {}", graph.summary());
                }
            }
            Err(e) => eprintln!("❌ {}", e.user_friendly_message()),
        }
    }

    println!("👋 Goodbye");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::TripleStore;
    use crate::core::tools::ToolRegistry;
    use crate::domain::ports::ConverseRequest;
    use std::sync::Mutex;

    struct CannedModel(Mutex<Vec<String>>);

    #[async_trait::async_trait]
    impl ModelProvider for CannedModel {
        async fn converse(&self, _request: ConverseRequest) -> crate::Result<String> {
            let mut replies = self.0.lock().unwrap();
            if replies.is_empty() {
                Ok("ACTION: FINAL_ANSWER\nCONTENT: nothing more".to_string())
            } else {
                Ok(replies.remove(0))
            }
        }

        fn model_id(&self) -> &str {
            "canned"
        }
    }

    fn session(replies: &[&str]) -> ChatSession {
        let registry = ToolRegistry::new(Arc::new(TripleStore::with_fixture()));
        let model = CannedModel(Mutex::new(replies.iter().map(|r| r.to_string()).collect()));
        ChatSession::new(Arc::new(registry), Arc::new(model), AgentConfig::default())
    }

    #[tokio::test]
    async fn test_ask_before_connect_fails() {
        let mut chat = session(&[]);
        let err = chat.ask("hello").await.unwrap_err();
        assert!(matches!(err, ChatError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn test_connect_reports_tools() {
        let mut chat = session(&[]);
        let message = chat.connect().await.unwrap();
        assert_eq!(message, "Connected to tool server. 7 tools available.");
        assert!(chat.conversation_id().starts_with("conv_"));
    }

    #[tokio::test]
    async fn test_location_question_builds_graph() {
        let mut chat = session(&[
            "ACTION: TOOL_CALL\nTOOL: get_facilities_near\nARGUMENTS: {\"location\": \"Virginia\", \"facility_type\": \"Military Base\"}",
            "ACTION: FINAL_ANSWER\nCONTENT: Quantico, Norfolk and Fort Belvoir are military bases in Virginia.",
        ]);
        chat.connect().await.unwrap();

        let reply = chat.ask("Find all military bases in Virginia").await.unwrap();
        assert!(reply.starts_with("Quantico"));

        // 回覆 + agent 工具結果 + 補充查詢
        assert_eq!(chat.last_sources().len(), 3);
        let graph = chat.last_graph().expect("graph");
        assert!(graph.node("geoint:fort_belvoir").is_some());
        assert_eq!(chat.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_type_question_graph_keeps_unrelated_facilities() {
        let mut chat = session(&["ACTION: FINAL_ANSWER\nCONTENT: There are three airports."]);
        chat.connect().await.unwrap();

        chat.ask("Show me airports").await.unwrap();
        let graph = chat.last_graph().expect("graph");
        assert!(graph.node("geoint:dca_airport").is_some());
        assert!(graph.node("geoint:pentagon").is_some());
    }

    #[tokio::test]
    async fn test_graph_toggle_and_export() {
        let mut chat = session(&["ACTION: FINAL_ANSWER\nCONTENT: The Pentagon is in Arlington."]);
        chat.connect().await.unwrap();

        chat.handle_command("/graph off").await.unwrap();
        chat.ask("Tell me about the Pentagon").await.unwrap();
        assert!(chat.last_graph().is_none());

        chat.handle_command("/graph on").await.unwrap();
        assert!(chat.last_graph().is_some());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/graph.dot");
        let outcome = chat
            .handle_command(&format!("/graph dot {}", path.display()))
            .await
            .unwrap();
        assert!(matches!(outcome, CommandOutcome::Reply(_)));
        let dot = std::fs::read_to_string(&path).unwrap();
        assert!(dot.contains("geoint:pentagon"));
    }

    #[tokio::test]
    async fn test_commands() {
        let mut chat = session(&[]);
        chat.connect().await.unwrap();

        let CommandOutcome::Reply(tools) = chat.handle_command("/tools").await.unwrap() else {
            panic!("expected reply");
        };
        assert!(tools.contains("execute_sparql"));

        assert!(chat.handle_command("/graph json out.json").await.is_err());
        assert_eq!(
            chat.handle_command("/quit").await.unwrap(),
            CommandOutcome::Quit
        );

        chat.ask("hi").await.unwrap();
        chat.handle_command("/clear").await.unwrap();
        assert!(chat.messages().is_empty());
    }
}
