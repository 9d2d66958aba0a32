use geoint_chat::utils::validation::Validate;
use geoint_chat::{AppConfig, ChatError};
use std::io::Write;
use tempfile::NamedTempFile;
use tokio_test::{assert_err, assert_ok};

#[test]
fn test_full_config_file() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[server]
host = "127.0.0.1"
port = 8088

[client]
server_url = "http://127.0.0.1:8088"
timeout_seconds = 10

[model]
provider = "anthropic"
model_id = "claude-3-7-sonnet-20250219"
api_key = "sk-file-key"
base_url = "https://api.anthropic.com"
max_tokens = 1024
temperature = 0.2

[agent]
name = "Ops Agent"
max_iterations = 4
history_window = 3

[logging]
format = "json"
"#
    )
    .unwrap();

    let config = AppConfig::from_file(file.path()).unwrap();
    assert_ok!(config.validate());
    assert_eq!(config.server.port, 8088);
    assert_eq!(config.client.timeout_seconds, 10);
    assert_eq!(config.api_key().unwrap(), "sk-file-key");
    assert_eq!(config.model.inference().max_tokens, 1024);
    assert_eq!(config.agent.history_window, 3);
}

#[test]
fn test_out_of_range_values_fail_validation() {
    let config = AppConfig::from_toml_str(
        r#"
[model]
temperature = 1.5
"#,
    )
    .unwrap();
    assert!(matches!(
        config.validate(),
        Err(ChatError::InvalidConfigValueError { .. })
    ));

    let config = AppConfig::from_toml_str(
        r#"
[agent]
max_iterations = 0
"#,
    )
    .unwrap();
    assert_err!(config.validate());
}

#[test]
fn test_missing_file_is_io_error() {
    let err = AppConfig::from_file("/nonexistent/geoint-chat.toml").unwrap_err();
    assert!(matches!(err, ChatError::IoError(_)));
}
