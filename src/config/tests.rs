//! Config module tests

use std::io::Write;
use std::time::Duration;

use super::*;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_substitute_env_vars_simple() {
    std::env::set_var("SMQ_TEST_VAR_SIMPLE", "hello");
    let result = substitute_env_vars("value = \"${SMQ_TEST_VAR_SIMPLE}\"").unwrap();
    assert_eq!(result, "value = \"hello\"");
    std::env::remove_var("SMQ_TEST_VAR_SIMPLE");
}

#[test]
fn test_substitute_env_vars_with_default() {
    std::env::remove_var("SMQ_TEST_VAR_UNSET");
    let result = substitute_env_vars("value = \"${SMQ_TEST_VAR_UNSET:-fallback}\"").unwrap();
    assert_eq!(result, "value = \"fallback\"");

    std::env::set_var("SMQ_TEST_VAR_SET", "env_value");
    let result = substitute_env_vars("value = \"${SMQ_TEST_VAR_SET:-fallback}\"").unwrap();
    assert_eq!(result, "value = \"env_value\"");
    std::env::remove_var("SMQ_TEST_VAR_SET");
}

#[test]
fn test_substitute_env_vars_missing_no_default() {
    std::env::remove_var("SMQ_TEST_VAR_MISSING");
    let result = substitute_env_vars("value = \"${SMQ_TEST_VAR_MISSING}\"").unwrap();
    assert_eq!(result, "value = \"\"");
}

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.log.level, "info");
    assert_eq!(config.broker.url, "ws://localhost:8083/mqtt");
    assert_eq!(config.broker.keep_alive, 60);
    assert_eq!(config.broker.connect_timeout_duration(), Duration::from_secs(10));
    assert!(config.broker.use_existing_reconnect);
    assert!(!config.identity.enabled);
    assert!(config.validate().is_ok());
}

#[test]
fn test_parse_minimal_config() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.broker.max_reconnect_interval, 30);
    assert!(config.identity.secret_key.is_empty());
}

#[test]
fn test_parse_full_config() {
    let config = Config::parse(
        r#"
[log]
level = "debug"

[broker]
url = "wss://broker.example.com:8084/mqtt"
client_id = "desk-1"
keep_alive = 30
connect_timeout = 5
reconnect_interval = 2
max_reconnect_interval = 60
use_existing_reconnect = false

[identity]
secret_key = "  abc123  "
username = "alice"
enabled = true
"#,
    )
    .unwrap();

    assert_eq!(config.log.level, "debug");
    assert_eq!(config.broker.url, "wss://broker.example.com:8084/mqtt");
    assert_eq!(config.broker.keep_alive, 30);
    assert_eq!(
        config.broker.max_reconnect_interval_duration(),
        Duration::from_secs(60)
    );
    assert!(!config.broker.use_existing_reconnect);

    let settings = config.settings();
    assert_eq!(settings.broker_url, "wss://broker.example.com:8084/mqtt");
    assert_eq!(settings.username, "alice");
    assert!(settings.enabled);
    assert_eq!(settings.secret_prefix(), Some("abc123"));
}

#[test]
fn test_invalid_url_scheme() {
    let result = Config::parse(
        r#"
[broker]
url = "tcp://localhost:1883"
"#,
    );
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_invalid_keep_alive() {
    let result = Config::parse(
        r#"
[broker]
keep_alive = 0
"#,
    );
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_invalid_reconnect_window() {
    let result = Config::parse(
        r#"
[broker]
reconnect_interval = 60
max_reconnect_interval = 10
"#,
    );
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_secret_key_checked_only_when_enabled() {
    let disabled = r#"
[identity]
secret_key = "a/b"
"#;
    assert!(Config::parse(disabled).is_ok());

    for key in ["a/b", "a+", "#", "   "] {
        let enabled = format!("[identity]\nsecret_key = \"{}\"\nenabled = true\n", key);
        assert!(
            matches!(Config::parse(&enabled), Err(ConfigError::Validation(_))),
            "secret key {:?} should be rejected",
            key
        );
    }
}

#[test]
fn test_parse_error() {
    assert!(matches!(
        Config::parse("[broker\nurl = "),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn test_settings_without_secret() {
    let settings = Settings {
        secret_key: "   ".into(),
        ..Default::default()
    };
    assert_eq!(settings.secret_prefix(), None);
}

#[test]
fn test_connect_options_from_config() {
    let mut config = Config::default();
    config.broker.client_id = "desk-1".into();
    config.broker.reconnect_interval = 3;
    config.identity.username = "alice".into();

    let options = ConnectOptions::from_config(&config);
    assert_eq!(options.url, "ws://localhost:8083/mqtt");
    assert_eq!(options.client_id, "desk-1");
    assert_eq!(options.username.as_deref(), Some("alice"));
    assert_eq!(options.reconnect_interval, Duration::from_secs(3));
    assert!(options.use_existing_reconnect);

    config.broker.client_id.clear();
    config.identity.username = " ".into();
    let options = ConnectOptions::from_config(&config);
    assert!(options.client_id.starts_with("secretmq-"));
    assert_eq!(options.username, None);
}

#[test]
fn test_load_config_with_env_substitution() {
    std::env::set_var("SMQ_TEST_BROKER_HOST", "broker.local");
    std::env::remove_var("SMQ_TEST_SECRET");

    let file = write_config(
        r#"
[broker]
url = "ws://${SMQ_TEST_BROKER_HOST}:8083/mqtt"
keep_alive = ${SMQ_TEST_KEEP_ALIVE:-45}

[identity]
secret_key = "${SMQ_TEST_SECRET:-s3cr3t}"
enabled = true
"#,
    );

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.broker.url, "ws://broker.local:8083/mqtt");
    assert_eq!(config.broker.keep_alive, 45);
    assert_eq!(config.identity.secret_key, "s3cr3t");
    // untouched fields keep their defaults
    assert_eq!(config.broker.connect_timeout, 10);

    std::env::remove_var("SMQ_TEST_BROKER_HOST");
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.broker.url, "ws://localhost:8083/mqtt");
    assert!(!config.identity.enabled);
}

#[test]
fn test_load_validates() {
    let file = write_config(
        r#"
[broker]
url = "http://localhost"
"#,
    );
    assert!(matches!(
        Config::load(file.path()),
        Err(ConfigError::Validation(_))
    ));
}
