pub mod app;
pub mod client;
pub mod config;
pub mod core;
pub mod domain;
pub mod llm;
pub mod server;
pub mod utils;

pub use client::HttpToolClient;
pub use config::AppConfig;
pub use core::{Agent, AgentReply, KnowledgeGraph, ToolRegistry, TripleStore};
pub use llm::AnthropicProvider;
pub use utils::error::{ChatError, Result};
