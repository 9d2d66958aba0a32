use crate::domain::ports::InferenceConfig;
use crate::utils::error::{ChatError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_positive_number, validate_range, validate_url, Validate,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "geoint-chat.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub model: ModelConfig,
    pub agent: AgentConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_url: String,
    pub timeout_seconds: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8000".to_string(),
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub provider: String,
    pub model_id: String,
    pub api_key: Option<String>,
    pub base_url: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub timeout_seconds: u64,
    /// 僅作為紀錄用途
    pub region: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let inference = InferenceConfig::default();
        Self {
            provider: "anthropic".to_string(),
            model_id: crate::llm::DEFAULT_MODEL_ID.to_string(),
            api_key: None,
            base_url: crate::llm::DEFAULT_BASE_URL.to_string(),
            max_tokens: inference.max_tokens,
            temperature: inference.temperature,
            top_p: inference.top_p,
            timeout_seconds: 120,
            region: None,
        }
    }
}

impl ModelConfig {
    pub fn inference(&self) -> InferenceConfig {
        InferenceConfig {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub max_iterations: usize,
    pub history_window: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "GEOINT Knowledge Agent".to_string(),
            max_iterations: 5,
            history_window: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "compact".to_string(),
        }
    }
}

impl AppConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = Self::substitute_env_vars(content)?;

        toml::from_str(&processed).map_err(|e| ChatError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 指定路徑 > 工作目錄下的預設檔 > 內建預設值，最後套用環境變數
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                tracing::debug!("Loading configuration from {}", p.display());
                Self::from_file(p)?
            }
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                tracing::debug!("Loading configuration from {}", DEFAULT_CONFIG_FILE);
                Self::from_file(DEFAULT_CONFIG_FILE)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// 替換環境變數 (例如 ${ANTHROPIC_API_KEY})
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = regex::Regex::new(r"\$\{([^}]+)\}").map_err(|e| ChatError::config(e.to_string()))?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// Applies the deployment environment variables on top of the file values.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HTTP_MCP_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("HTTP_MCP_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| ChatError::InvalidConfigValueError {
                    field: "HTTP_MCP_PORT".to_string(),
                    value: port.clone(),
                    reason: "Port must be a number between 0 and 65535".to_string(),
                })?;
        }
        if let Some(url) = lookup("MCP_SERVER_URL") {
            self.client.server_url = url;
        }
        if let Some(model_id) = lookup("MODEL_ID") {
            self.model.model_id = model_id;
        }
        if let Some(key) = lookup("ANTHROPIC_API_KEY") {
            self.model.api_key = Some(key);
        }
        if let Some(region) = lookup("AWS_REGION") {
            self.model.region = Some(region);
        }
        Ok(())
    }

    /// API key, failing when neither the file nor the environment provides one.
    pub fn api_key(&self) -> Result<&str> {
        self.model
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty() && !k.starts_with("${"))
            .ok_or_else(|| ChatError::MissingConfigError {
                field: "model.api_key (or ANTHROPIC_API_KEY)".to_string(),
            })
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validate_non_empty_string("server.host", &self.server.host)?;
        validate_url("client.server_url", &self.client.server_url)?;
        validate_positive_number("client.timeout_seconds", self.client.timeout_seconds as usize, 1)?;

        if self.model.provider != "anthropic" {
            return Err(ChatError::InvalidConfigValueError {
                field: "model.provider".to_string(),
                value: self.model.provider.clone(),
                reason: "Unsupported provider. Valid providers: anthropic".to_string(),
            });
        }
        validate_non_empty_string("model.model_id", &self.model.model_id)?;
        validate_url("model.base_url", &self.model.base_url)?;
        validate_positive_number("model.max_tokens", self.model.max_tokens as usize, 1)?;
        validate_range("model.temperature", self.model.temperature, 0.0, 1.0)?;
        if let Some(top_p) = self.model.top_p {
            validate_range("model.top_p", top_p, 0.0, 1.0)?;
        }

        validate_range("agent.max_iterations", self.agent.max_iterations, 1, 20)?;
        validate_positive_number("agent.history_window", self.agent.history_window, 1)?;

        let valid_formats = ["compact", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ChatError::InvalidConfigValueError {
                field: "logging.format".to_string(),
                value: self.logging.format.clone(),
                reason: format!("Unsupported format. Valid formats: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.client.server_url, "http://localhost:8000");
        assert_eq!(config.agent.max_iterations, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml_config() {
        let toml_content = r#"
[server]
port = 9100

[model]
model_id = "claude-test"
temperature = 0.5

[logging]
format = "json"
"#;

        let config = AppConfig::from_toml_str(toml_content).unwrap();

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.model.model_id, "claude-test");
        assert_eq!(config.model.max_tokens, 4096);
        assert_eq!(config.logging.format, "json");
        assert!((config.model.inference().temperature - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("GEOINT_CHAT_TEST_KEY", "sk-test-123");

        let toml_content = r#"
[model]
api_key = "${GEOINT_CHAT_TEST_KEY}"
"#;

        let config = AppConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.api_key().unwrap(), "sk-test-123");

        std::env::remove_var("GEOINT_CHAT_TEST_KEY");
    }

    #[test]
    fn test_unresolved_placeholder_is_missing_key() {
        let config = AppConfig::from_toml_str(
            r#"
[model]
api_key = "${GEOINT_CHAT_UNSET_VARIABLE}"
"#,
        )
        .unwrap();
        assert!(matches!(
            config.api_key(),
            Err(ChatError::MissingConfigError { .. })
        ));
    }

    #[test]
    fn test_overrides_take_precedence() {
        let vars: HashMap<&str, &str> = [
            ("HTTP_MCP_HOST", "127.0.0.1"),
            ("HTTP_MCP_PORT", "8123"),
            ("MCP_SERVER_URL", "http://10.0.0.5:8123"),
            ("AWS_REGION", "us-west-2"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8123);
        assert_eq!(config.client.server_url, "http://10.0.0.5:8123");
        assert_eq!(config.model.region.as_deref(), Some("us-west-2"));
    }

    #[test]
    fn test_invalid_port_override() {
        let mut config = AppConfig::default();
        let result = config.apply_overrides(|k| (k == "HTTP_MCP_PORT").then(|| "http".to_string()));
        assert!(matches!(
            result,
            Err(ChatError::InvalidConfigValueError { .. })
        ));
    }

    #[test]
    fn test_config_validation() {
        let config = AppConfig::from_toml_str(
            r#"
[client]
server_url = "not-a-url"
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());

        let config = AppConfig::from_toml_str(
            r#"
[model]
provider = "bedrock"
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml() {
        let err = AppConfig::from_toml_str("[server\nport = 1").unwrap_err();
        assert!(matches!(err, ChatError::ConfigValidationError { .. }));
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[agent]\nname = \"file-test\"\nmax_iterations = 3\n")
            .unwrap();

        let config = AppConfig::load(Some(temp_file.path())).unwrap();
        assert_eq!(config.agent.name, "file-test");
        assert_eq!(config.agent.max_iterations, 3);
    }
}
