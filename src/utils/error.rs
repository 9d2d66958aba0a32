use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("SPARQL error: {0}")]
    SparqlError(#[from] crate::core::sparql::SparqlError),

    #[error("Tool '{tool}' failed: {message}")]
    ToolError { tool: String, message: String },

    #[error("Tool '{tool}' not found. Available tools: {available:?}")]
    ToolNotFound { tool: String, available: Vec<String> },

    #[error("Tool server error (status {status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Model error: {message}")]
    ModelError { message: String },

    #[error("Not connected: {message}")]
    NotConnected { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Network,
    Query,
    Tool,
    Model,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ChatError {
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        ChatError::ToolError {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn model(message: impl Into<String>) -> Self {
        ChatError::ModelError {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        ChatError::ConfigError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ChatError::ConfigError { .. }
            | ChatError::ConfigValidationError { .. }
            | ChatError::InvalidConfigValueError { .. }
            | ChatError::MissingConfigError { .. } => ErrorCategory::Configuration,
            ChatError::HttpError(_)
            | ChatError::ServerError { .. }
            | ChatError::NotConnected { .. } => ErrorCategory::Network,
            ChatError::SparqlError(_) => ErrorCategory::Query,
            ChatError::ToolError { .. } | ChatError::ToolNotFound { .. } => ErrorCategory::Tool,
            ChatError::ModelError { .. } => ErrorCategory::Model,
            ChatError::IoError(_) | ChatError::SerializationError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Query
            | ErrorCategory::Tool
            | ErrorCategory::Network
            | ErrorCategory::Model => ErrorSeverity::Medium,
            ErrorCategory::Configuration => ErrorSeverity::High,
            ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    /// 給終端使用者看的簡短訊息
    pub fn user_friendly_message(&self) -> String {
        match self {
            ChatError::HttpError(e) if e.is_connect() => {
                "Could not reach the tool server".to_string()
            }
            ChatError::HttpError(e) if e.is_timeout() => "The request timed out".to_string(),
            ChatError::NotConnected { .. } => "Not connected to the tool server".to_string(),
            ChatError::ModelError { .. } => "The language model request failed".to_string(),
            ChatError::SparqlError(e) => format!("SPARQL query failed: {}", e),
            other => other.to_string(),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => {
                "Check the configuration file and environment variables"
            }
            ErrorCategory::Network => {
                "Make sure the tool server is running (geoint-chat serve) and the URL is correct"
            }
            ErrorCategory::Query => "Simplify the query; only a small SPARQL subset is supported",
            ErrorCategory::Tool => "Run /tools to see the available tools and their arguments",
            ErrorCategory::Model => "Check ANTHROPIC_API_KEY and the configured model id",
            ErrorCategory::System => "Check file permissions and available disk space",
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
