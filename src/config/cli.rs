use crate::config::AppConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "geoint-chat")]
#[command(about = "Conversational assistant over a geospatial RDF knowledge graph")]
#[command(version)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "GEOINT_CHAT_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP tool server
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Chat in the terminal against a running tool server
    Chat {
        #[arg(long)]
        server_url: Option<String>,
        /// Start with graph visualisation disabled
        #[arg(long)]
        no_graph: bool,
    },
    /// Start the tool server in-process, then chat
    Demo {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one SPARQL query against the built-in store
    Query {
        sparql: String,
    },
}

impl Cli {
    /// 命令列參數覆寫設定檔與環境變數
    pub fn apply_to(&self, config: &mut AppConfig) {
        match &self.command {
            Command::Serve { host, port } => {
                if let Some(host) = host {
                    config.server.host = host.clone();
                }
                if let Some(port) = port {
                    config.server.port = *port;
                }
            }
            Command::Chat { server_url, .. } => {
                if let Some(url) = server_url {
                    config.client.server_url = url.clone();
                }
            }
            Command::Demo { port } => {
                if let Some(port) = port {
                    config.server.port = *port;
                }
                config.client.server_url = format!("http://127.0.0.1:{}", config.server.port);
            }
            Command::Query { .. } => {}
        }
    }
}
