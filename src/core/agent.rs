use crate::domain::model::{AgentMessage, Role, ToolInfo, ToolOutcome};
use crate::domain::ports::{ChatMessage, ConverseRequest, InferenceConfig, ModelProvider, ToolBackend};
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::{Arc, OnceLock};

pub const DEFAULT_MAX_ITERATIONS: usize = 5;
pub const DEFAULT_HISTORY_WINDOW: usize = 5;
const RESULT_PREVIEW_CHARS: usize = 200;

const SYSTEM_PROMPT: &str = "
You are an intelligent agent that can answer questions about knowledge graphs and geospatial intelligence data.

You have access to tools that can:
1. Execute SPARQL queries against the knowledge graph
2. Explore the graph's classes, properties and sample data
3. Search entities by text
4. Find facilities by location, type or coordinates

Your capabilities:
- Analyze user questions and determine the best approach
- Use available tools autonomously to gather information
- Synthesize results from multiple tool calls
- Provide clear, informative responses

When answering questions:
1. First understand what the user is asking
2. Determine which tools you need to use
3. Make tool calls to gather information
4. Analyze and synthesize the results
5. Provide a comprehensive answer

Be thorough in your analysis and always explain your reasoning process.
";

/// What the model decided to do in one reasoning step.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentAction {
    ToolCall {
        tool: String,
        arguments: Value,
        reasoning: String,
    },
    FinalAnswer(String),
    Clarification(String),
}

#[derive(Debug, Clone)]
pub struct AgentReply {
    pub text: String,
    pub tool_results: Vec<ToolOutcome>,
}

pub struct Agent {
    name: String,
    provider: Arc<dyn ModelProvider>,
    backend: Arc<dyn ToolBackend>,
    tools: Vec<ToolInfo>,
    history: Vec<AgentMessage>,
    system_prompt: String,
    max_iterations: usize,
    history_window: usize,
    inference: InferenceConfig,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        provider: Arc<dyn ModelProvider>,
        backend: Arc<dyn ToolBackend>,
    ) -> Self {
        Self {
            name: name.into(),
            provider,
            backend,
            tools: Vec::new(),
            history: Vec::new(),
            system_prompt: SYSTEM_PROMPT.to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            history_window: DEFAULT_HISTORY_WINDOW,
            inference: InferenceConfig::default(),
        }
    }

    pub fn with_limits(mut self, max_iterations: usize, history_window: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self.history_window = history_window;
        self
    }

    pub fn with_inference(mut self, inference: InferenceConfig) -> Self {
        self.inference = inference;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tools(&self) -> &[ToolInfo] {
        &self.tools
    }

    /// 向後端取得工具清單；失敗時記錄並保留空清單
    pub async fn initialize_tools(&mut self) -> usize {
        match self.backend.list_tools().await {
            Ok(tools) => {
                self.tools = tools;
                tracing::info!(
                    "Initialized agent tools ({}): {:?}",
                    self.tools.len(),
                    self.tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>()
                );
            }
            Err(e) => tracing::error!("Failed to initialize tools: {}", e),
        }
        self.tools.len()
    }

    pub async fn process_query(&mut self, query: &str) -> AgentReply {
        self.history.push(AgentMessage::new(Role::User, query));
        let reply = self.reasoning_loop(query).await;
        self.history
            .push(AgentMessage::new(Role::Assistant, reply.text.clone()));
        reply
    }

    pub fn history(&self) -> &[AgentMessage] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    async fn reasoning_loop(&self, query: &str) -> AgentReply {
        let mut tool_results: Vec<ToolOutcome> = Vec::new();

        for iteration in 1..=self.max_iterations {
            let action = match self.next_action(query, &tool_results, iteration).await {
                Ok(action) => action,
                Err(e) => {
                    tracing::error!("Error generating next action: {}", e);
                    return AgentReply {
                        text: format!("I encountered an error: {}", e),
                        tool_results,
                    };
                }
            };

            match action {
                AgentAction::ToolCall {
                    tool,
                    arguments,
                    reasoning,
                } => {
                    tracing::info!("Step {}: calling {} ({})", iteration, tool, reasoning);
                    let outcome = self.execute_tool_call(&tool, arguments).await;
                    tool_results.push(outcome);
                }
                AgentAction::FinalAnswer(text) | AgentAction::Clarification(text) => {
                    return AgentReply { text, tool_results };
                }
            }
        }

        tracing::info!(
            "Reached {} iterations, synthesizing from {} tool results",
            self.max_iterations,
            tool_results.len()
        );
        let text = self.synthesize(query, &tool_results).await;
        AgentReply { text, tool_results }
    }

    async fn next_action(
        &self,
        query: &str,
        tool_results: &[ToolOutcome],
        iteration: usize,
    ) -> crate::Result<AgentAction> {
        let start = self.history.len().saturating_sub(self.history_window);
        let mut messages: Vec<ChatMessage> = self.history[start..]
            .iter()
            .filter(|m| matches!(m.role, Role::User | Role::Assistant))
            .filter(|m| !m.content.trim().is_empty())
            .map(|m| ChatMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect();
        messages.push(ChatMessage::user(
            self.reasoning_prompt(query, tool_results, iteration),
        ));

        let text = self
            .provider
            .converse(ConverseRequest {
                system: Some(self.system_prompt.clone()),
                messages,
                inference: self.inference,
            })
            .await?;

        Ok(parse_action(&text))
    }

    fn reasoning_prompt(&self, query: &str, tool_results: &[ToolOutcome], iteration: usize) -> String {
        format!(
            "
Current iteration: {iteration}/{max}

User Query: {query}

Available Tools:
{tools}

Previous Tool Results:
{results}

Based on the user query and any previous tool results, what should I do next?

Respond with one of these actions:
1. TOOL_CALL: If you need to use a tool, respond with:
   ACTION: TOOL_CALL
   TOOL: <tool_name>
   ARGUMENTS: <json_arguments>
   REASONING: <why you're using this tool>

2. FINAL_ANSWER: If you have enough information to answer, respond with:
   ACTION: FINAL_ANSWER
   CONTENT: <your complete answer>

3. CLARIFICATION: If you need more information from the user, respond with:
   ACTION: CLARIFICATION
   CONTENT: <what you need to know>

Choose the most appropriate action:
",
            max = self.max_iterations,
            tools = self.format_tools(),
            results = format_tool_results(tool_results),
        )
    }

    fn format_tools(&self) -> String {
        if self.tools.is_empty() {
            return "No tools available".to_string();
        }
        self.tools
            .iter()
            .map(|t| format!("- {}: {}", t.name, t.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn execute_tool_call(&self, tool: &str, arguments: Value) -> ToolOutcome {
        let call_id = format!("{}_{}", tool, chrono::Local::now().timestamp_millis());

        if !self.tools.iter().any(|t| t.name == tool) {
            let available: Vec<&str> = self.tools.iter().map(|t| t.name.as_str()).collect();
            return ToolOutcome {
                call_id,
                tool_name: tool.to_string(),
                arguments,
                content: format!("Tool '{}' not found. Available tools: {:?}", tool, available),
                is_error: true,
            };
        }

        match self.backend.call_tool(tool, arguments.clone()).await {
            Ok(response) => ToolOutcome {
                call_id,
                tool_name: tool.to_string(),
                arguments,
                content: response.text(),
                is_error: response.is_error,
            },
            Err(e) => {
                tracing::error!("Error executing tool {}: {}", tool, e);
                ToolOutcome {
                    call_id,
                    tool_name: tool.to_string(),
                    arguments,
                    content: format!("Error executing tool: {}", e),
                    is_error: true,
                }
            }
        }
    }

    async fn synthesize(&self, query: &str, tool_results: &[ToolOutcome]) -> String {
        let prompt = format!(
            "
Based on the following information, provide a comprehensive answer to the user's query.

User Query: {}

Tool Results:
{}

Please synthesize this information into a clear, helpful response:
",
            query,
            format_tool_results(tool_results)
        );

        let request = ConverseRequest {
            system: None,
            messages: vec![ChatMessage::user(prompt)],
            inference: InferenceConfig::synthesis(),
        };
        match self.provider.converse(request).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Error generating final response: {}", e);
                format!(
                    "I gathered some information but encountered an error generating the final response: {}",
                    e
                )
            }
        }
    }
}

fn format_tool_results(results: &[ToolOutcome]) -> String {
    if results.is_empty() {
        return "No previous tool results".to_string();
    }
    results
        .iter()
        .map(|r| {
            let status = if r.is_error { "ERROR" } else { "SUCCESS" };
            let preview: String = r.content.chars().take(RESULT_PREVIEW_CHARS).collect();
            format!("- {}: {}\n  {}...", r.tool_name, status, preview)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn field<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.trim_start().strip_prefix(key).map(str::trim)
}

fn block_content(lines: &[&str]) -> String {
    let mut content: Option<String> = None;
    for line in lines {
        if let Some(buf) = content.as_mut() {
            buf.push('\n');
            buf.push_str(line);
        } else if let Some(first) = field(line, "CONTENT:") {
            content = Some(first.to_string());
        }
    }
    content.unwrap_or_default()
}

/// Parses the model's reply into an [`AgentAction`].
///
/// A reply without an `ACTION:` line, or with an unrecognised one, is taken
/// as the final answer verbatim.
pub fn parse_action(text: &str) -> AgentAction {
    let lines: Vec<&str> = text.trim().lines().collect();
    let Some(action) = lines.iter().find_map(|l| field(l, "ACTION:")) else {
        return AgentAction::FinalAnswer(text.to_string());
    };

    match action {
        "TOOL_CALL" => {
            let mut tool = String::new();
            let mut arguments = json!({});
            let mut reasoning = String::new();
            for line in &lines {
                if let Some(name) = field(line, "TOOL:") {
                    tool = name.to_string();
                } else if let Some(args) = field(line, "ARGUMENTS:") {
                    arguments = parse_arguments(args);
                } else if let Some(why) = field(line, "REASONING:") {
                    reasoning = why.to_string();
                }
            }
            tracing::info!("Parsed tool call: {} with args: {}", tool, arguments);
            AgentAction::ToolCall {
                tool,
                arguments,
                reasoning,
            }
        }
        "FINAL_ANSWER" => AgentAction::FinalAnswer(block_content(&lines)),
        "CLARIFICATION" => AgentAction::Clarification(block_content(&lines)),
        _ => AgentAction::FinalAnswer(text.to_string()),
    }
}

fn parse_arguments(args: &str) -> Value {
    if args.is_empty() {
        return json!({});
    }
    match serde_json::from_str::<Value>(args) {
        Ok(value @ Value::Object(_)) => value,
        _ => extract_arguments_fallback(args),
    }
}

fn fallback_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r#""location":\s*"([^"]+)""#, "location"),
            (r#""query":\s*"([^"]+)""#, "query"),
            (r#""facility_type":\s*"([^"]+)""#, "facility_type"),
            (r#""text":\s*"([^"]+)""#, "text"),
            (r#""limit":\s*(\d+)"#, "limit"),
        ]
        .into_iter()
        .filter_map(|(pattern, key)| Regex::new(pattern).ok().map(|re| (re, key)))
        .collect()
    })
}

/// 模型輸出的 JSON 不合法時，盡量抽出常用參數
pub fn extract_arguments_fallback(args: &str) -> Value {
    let mut arguments = Map::new();

    for (re, key) in fallback_patterns() {
        if let Some(caps) = re.captures(args) {
            let value = &caps[1];
            let parsed = match (*key, value.parse::<u64>()) {
                ("limit", Ok(n)) => json!(n),
                _ => json!(value),
            };
            arguments.insert(key.to_string(), parsed);
        }
    }

    if arguments.is_empty() {
        let lower = args.to_lowercase();
        if lower.contains("virginia") {
            arguments.insert("location".to_string(), json!("Virginia"));
        } else if lower.contains("washington") {
            arguments.insert("location".to_string(), json!("Washington DC"));
        } else if lower.contains("military") || lower.contains("base") {
            arguments.insert("facility_type".to_string(), json!("Military Base"));
        }
    }

    tracing::info!("Fallback argument extraction: {:?} from: {}", arguments, args);
    Value::Object(arguments)
}
