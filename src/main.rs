use clap::Parser;
use geoint_chat::app::{run_chat, ChatSession};
use geoint_chat::config::cli::{Cli, Command};
use geoint_chat::config::AppConfig;
use geoint_chat::core::tools::EXECUTE_SPARQL;
use geoint_chat::server::{self, AppState};
use geoint_chat::utils::error::{ChatError, ErrorSeverity, Result};
use geoint_chat::utils::logger::{self, LogFormat};
use geoint_chat::utils::validation::Validate;
use geoint_chat::{AnthropicProvider, HttpToolClient, ToolRegistry, TripleStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            logger::init_cli_logger(cli.verbose, LogFormat::Compact);
            exit_with(&e);
        }
    };
    cli.apply_to(&mut config);

    // 初始化日誌
    logger::init_cli_logger(cli.verbose, LogFormat::parse(&config.logging.format));
    tracing::info!("Starting geoint-chat {}", env!("CARGO_PKG_VERSION"));
    if cli.verbose {
        tracing::debug!("Configuration: {:?}", config);
    }

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        exit_with(&e);
    }

    if let Err(e) = run(cli.command, config).await {
        exit_with(&e);
    }
}

async fn run(command: Command, config: AppConfig) -> Result<()> {
    match command {
        Command::Serve { .. } => server::run_server(&config.server).await,
        Command::Chat { no_graph, .. } => chat(&config, !no_graph).await,
        Command::Demo { .. } => demo(&config).await,
        Command::Query { sparql } => query(&sparql),
    }
}

fn build_session(config: &AppConfig, show_graph: bool) -> Result<ChatSession> {
    let client = HttpToolClient::new(&config.client.server_url, config.client.timeout_seconds)?;
    let provider = AnthropicProvider::with_base_url(
        config.api_key()?.to_string(),
        config.model.model_id.clone(),
        config.model.base_url.clone(),
        config.model.timeout_seconds,
    )?;
    tracing::info!(
        "Using model {} (region: {})",
        config.model.model_id,
        config.model.region.as_deref().unwrap_or("n/a")
    );

    let mut session = ChatSession::new(Arc::new(client), Arc::new(provider), config.agent.clone())
        .with_inference(config.model.inference());
    session.set_show_graph(show_graph);
    Ok(session)
}

async fn chat(config: &AppConfig, show_graph: bool) -> Result<()> {
    let mut session = build_session(config, show_graph)?;
    let status = session.connect().await?;
    println!("✅ {}", status);
    run_chat(&mut session).await
}

async fn demo(config: &AppConfig) -> Result<()> {
    println!("{}", "=".repeat(60));
    println!("🌟 GEOINT KNOWLEDGE GRAPH CHAT DEMO");
    println!("{}", "=".repeat(60));
    println!("📋 Demo components:");
    println!("   • In-memory RDF knowledge graph (GEOINT data)");
    println!("   • HTTP tool server (port {})", config.server.port);
    println!("   • Terminal chat with model {}", config.model.model_id);
    println!();

    // 先確認 API key 再啟動伺服器
    let mut session = build_session(config, true)?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let state = AppState::new(TripleStore::with_fixture());
    let server_task = tokio::spawn(server::serve_on(listener, state, async move {
        let _ = stop_rx.await;
    }));
    tracing::info!("🚀 Tool server listening on http://{}", addr);

    let probe = HttpToolClient::new(&config.client.server_url, 2)?;
    let mut healthy = false;
    for _ in 0..20 {
        if probe.health_check().await {
            healthy = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    if !healthy {
        let _ = stop_tx.send(());
        return Err(ChatError::NotConnected {
            message: format!("tool server at {} did not become healthy", config.client.server_url),
        });
    }

    let result = async {
        let status = session.connect().await?;
        println!("✅ {}", status);
        run_chat(&mut session).await
    }
    .await;

    let _ = stop_tx.send(());
    if let Ok(Err(e)) = server_task.await {
        tracing::error!("Tool server error: {}", e);
    }
    println!("👋 Demo stopped. Thank you!");
    result
}

fn query(sparql: &str) -> Result<()> {
    let registry = ToolRegistry::new(Arc::new(TripleStore::with_fixture()));
    let response = registry.respond(EXECUTE_SPARQL, &json!({ "query": sparql }));
    if response.is_error {
        return Err(ChatError::tool(EXECUTE_SPARQL, response.text()));
    }
    println!("{}", response.text());
    Ok(())
}

fn exit_with(e: &ChatError) -> ! {
    tracing::error!(
        "❌ {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());

    // 根據錯誤嚴重程度決定退出碼
    let exit_code = match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    };
    std::process::exit(exit_code)
}
