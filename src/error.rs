//! Crate error type

use std::fmt;

use crate::client::ClientError;
use crate::config::ConfigError;

/// Errors surfaced by the routing layer
#[derive(Debug)]
pub enum Error {
    /// A required value (secret prefix, client) has not been set
    NotConfigured(&'static str),
    /// Topic or prefix failed validation
    InvalidTopic { topic: String, reason: &'static str },
    /// Broker client failure
    Client(ClientError),
    /// Payload could not be serialized or deserialized
    Payload(serde_json::Error),
    /// A topic or event already exists with a different payload type
    TypeMismatch { key: String, expected: &'static str },
    /// A receive callback panicked
    CallbackPanicked { topic: String, message: String },
    /// Configuration error
    Config(ConfigError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotConfigured(what) => write!(f, "{} is not configured", what),
            Error::InvalidTopic { topic, reason } => {
                write!(f, "invalid topic '{}': {}", topic, reason)
            }
            Error::Client(e) => write!(f, "client error: {}", e),
            Error::Payload(e) => write!(f, "payload error: {}", e),
            Error::TypeMismatch { key, expected } => {
                write!(f, "'{}' is registered with a payload type other than {}", key, expected)
            }
            Error::CallbackPanicked { topic, message } => {
                write!(f, "callback for '{}' panicked: {}", topic, message)
            }
            Error::Config(e) => write!(f, "config error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Client(e) => Some(e),
            Error::Payload(e) => Some(e),
            Error::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ClientError> for Error {
    fn from(e: ClientError) -> Self {
        Error::Client(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Payload(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Operator hook receiving errors the routing layer swallows
pub type ErrorHook = std::sync::Arc<dyn Fn(&Error) + Send + Sync>;
