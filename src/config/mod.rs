//! Configuration Module
//!
//! TOML configuration for the messaging layer:
//! - Log level
//! - Broker connection (URL, client id, timeouts, reconnect policy)
//! - Identity (secret key, username, enabled flag)
//! - Environment variable overrides (SECRETMQ__* prefix)

use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

use crate::client::{generate_client_id, ConnectOptions};
use crate::topic;

#[cfg(test)]
mod tests;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}")
        .map_err(|e| ConfigError::Validation(e.to_string()))?;
    Ok(re
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .to_string())
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Broker connection
    pub broker: BrokerConfig,
    /// User identity and namespace
    pub identity: IdentityConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Broker connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// WebSocket URL of the broker (ws:// or wss://)
    #[serde(default = "default_url")]
    pub url: String,
    /// MQTT client identifier (empty = random)
    pub client_id: String,
    /// Keep alive in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive: u16,
    /// Handshake timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    /// First reconnect delay in seconds
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval: u64,
    /// Reconnect delay cap in seconds
    #[serde(default = "default_max_reconnect_interval")]
    pub max_reconnect_interval: u64,
    /// Revive a dropped session instead of building a new client
    #[serde(default = "default_true")]
    pub use_existing_reconnect: bool,
}

fn default_url() -> String {
    "ws://localhost:8083/mqtt".to_string()
}

fn default_keep_alive() -> u16 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_reconnect_interval() -> u64 {
    1
}

fn default_max_reconnect_interval() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            client_id: String::new(),
            keep_alive: default_keep_alive(),
            connect_timeout: default_connect_timeout(),
            reconnect_interval: default_reconnect_interval(),
            max_reconnect_interval: default_max_reconnect_interval(),
            use_existing_reconnect: true,
        }
    }
}

impl BrokerConfig {
    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn reconnect_interval_duration(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval)
    }

    pub fn max_reconnect_interval_duration(&self) -> Duration {
        Duration::from_secs(self.max_reconnect_interval)
    }
}

/// Identity configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Shared secret; its trimmed form is the topic namespace
    pub secret_key: String,
    /// Display name stamped on outgoing payloads
    pub username: String,
    /// Messaging on or off
    pub enabled: bool,
}

/// The settings the messaging layer reacts to at runtime
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Settings {
    pub broker_url: String,
    pub secret_key: String,
    pub username: String,
    pub enabled: bool,
}

impl Settings {
    /// Topic namespace derived from the secret key, if any
    pub fn secret_prefix(&self) -> Option<&str> {
        let prefix = self.secret_key.trim();
        (!prefix.is_empty()).then_some(prefix)
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `SECRETMQ__` prefix with double underscores for nesting:
    ///    - `SECRETMQ__BROKER__URL=wss://broker.example/mqtt` overrides `broker.url`
    ///    - `SECRETMQ__IDENTITY__ENABLED=true` overrides `identity.enabled`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("broker.url", default_url())?
            .set_default("broker.keep_alive", default_keep_alive() as i64)?
            .set_default("broker.connect_timeout", default_connect_timeout() as i64)?
            .set_default(
                "broker.reconnect_interval",
                default_reconnect_interval() as i64,
            )?
            .set_default(
                "broker.max_reconnect_interval",
                default_max_reconnect_interval() as i64,
            )?
            .set_default("broker.use_existing_reconnect", true)?
            .set_default("identity.enabled", false)?;

        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content)?;
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // No file, defaults and environment only
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("SECRETMQ")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.broker.url.as_str();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConfigError::Validation(format!(
                "broker.url must be a ws:// or wss:// URL, got '{}'",
                url
            )));
        }

        if self.broker.keep_alive == 0 {
            return Err(ConfigError::Validation(
                "broker.keep_alive must be greater than 0".to_string(),
            ));
        }

        if self.broker.connect_timeout == 0 {
            return Err(ConfigError::Validation(
                "broker.connect_timeout must be greater than 0".to_string(),
            ));
        }

        if self.broker.reconnect_interval > self.broker.max_reconnect_interval {
            return Err(ConfigError::Validation(format!(
                "broker.reconnect_interval ({}) exceeds broker.max_reconnect_interval ({})",
                self.broker.reconnect_interval, self.broker.max_reconnect_interval
            )));
        }

        if self.identity.enabled {
            let prefix = self.identity.secret_key.trim();
            topic::validate_secret_prefix(prefix).map_err(|reason| {
                ConfigError::Validation(format!("identity.secret_key: {}", reason))
            })?;
        }

        Ok(())
    }

    /// Runtime settings view
    pub fn settings(&self) -> Settings {
        Settings {
            broker_url: self.broker.url.clone(),
            secret_key: self.identity.secret_key.clone(),
            username: self.identity.username.clone(),
            enabled: self.identity.enabled,
        }
    }
}

impl ConnectOptions {
    /// Connection options for the configured broker
    pub fn from_config(config: &Config) -> Self {
        let broker = &config.broker;
        let client_id = if broker.client_id.is_empty() {
            generate_client_id()
        } else {
            broker.client_id.clone()
        };
        let username = Some(config.identity.username.trim())
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        ConnectOptions {
            url: broker.url.clone(),
            client_id,
            username,
            keep_alive: broker.keep_alive,
            connect_timeout: broker.connect_timeout_duration(),
            reconnect_interval: broker.reconnect_interval_duration(),
            max_reconnect_interval: broker.max_reconnect_interval_duration(),
            use_existing_reconnect: broker.use_existing_reconnect,
        }
    }
}
