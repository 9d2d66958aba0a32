pub mod agent;
pub mod graph;
pub mod sparql;
pub mod store;
pub mod tools;

pub use agent::{Agent, AgentAction, AgentReply};
pub use graph::{ContextExtractor, KnowledgeGraph, TripleParser};
pub use store::TripleStore;
pub use tools::ToolRegistry;
