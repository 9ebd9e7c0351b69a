//! Broker Client
//!
//! The MQTT session underneath the routing layer. A `Connector` opens a
//! session and hands back a shared `BrokerClient`; the WebSocket
//! implementation keeps that session alive on its own (keep-alive pings,
//! reconnection with exponential backoff) and reports every state change
//! through a watch channel.

pub mod memory;
mod state;
mod websocket;

#[cfg(test)]
mod tests;

pub use state::{ConnectionEvent, ConnectionState, StateCell, Transition};
pub use websocket::{WsClient, WsConnector};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;

use crate::protocol::ProtocolError;
use crate::transport::TransportError;

/// Error type for broker client operations
#[derive(Debug)]
pub enum ClientError {
    /// Connection could not be established
    ConnectionFailed(String),
    /// Connection dropped before the operation completed
    ConnectionLost(String),
    /// Broker refused the connection or subscription
    Rejected(String),
    /// Operation timed out
    Timeout,
    /// Client is not connected
    NotConnected,
    /// Session task is gone
    ChannelClosed,
    /// Broker URL is not a valid ws:// or wss:// URL
    InvalidUrl(String),
    /// Broker violated the protocol
    Protocol(ProtocolError),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            ClientError::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            ClientError::Rejected(msg) => write!(f, "Rejected: {}", msg),
            ClientError::Timeout => write!(f, "Operation timed out"),
            ClientError::NotConnected => write!(f, "Not connected"),
            ClientError::ChannelClosed => write!(f, "Client session closed"),
            ClientError::InvalidUrl(msg) => write!(f, "Invalid URL: {}", msg),
            ClientError::Protocol(e) => write!(f, "Protocol error: {}", e),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<ProtocolError> for ClientError {
    fn from(e: ProtocolError) -> Self {
        ClientError::Protocol(e)
    }
}

impl From<TransportError> for ClientError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::InvalidUrl(msg) => ClientError::InvalidUrl(msg),
            TransportError::Timeout => ClientError::Timeout,
            TransportError::Decode(e) => ClientError::Protocol(e.into()),
            TransportError::Encode(e) => ClientError::Protocol(e.into()),
            TransportError::WebSocket(e) => ClientError::ConnectionFailed(e.to_string()),
        }
    }
}

/// Handler for inbound application messages: (wire topic, payload)
pub type InboundHandler = Arc<dyn Fn(&str, Bytes) + Send + Sync>;

/// Options for opening a broker session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Broker WebSocket URL (ws:// or wss://)
    pub url: String,
    /// MQTT client identifier
    pub client_id: String,
    /// Username sent in CONNECT
    pub username: Option<String>,
    /// Keep alive in seconds
    pub keep_alive: u16,
    /// Handshake and acknowledgement timeout
    pub connect_timeout: Duration,
    /// First reconnect delay
    pub reconnect_interval: Duration,
    /// Reconnect delay cap
    pub max_reconnect_interval: Duration,
    /// Reuse a disconnected client via `reconnect()` instead of
    /// building a new one
    pub use_existing_reconnect: bool,
}

impl ConnectOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8083/mqtt".to_string(),
            client_id: generate_client_id(),
            username: None,
            keep_alive: 60,
            connect_timeout: Duration::from_secs(10),
            reconnect_interval: Duration::from_secs(1),
            max_reconnect_interval: Duration::from_secs(30),
            use_existing_reconnect: true,
        }
    }
}

/// Random client identifier, `secretmq-` plus 12 hex digits
pub fn generate_client_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("secretmq-{}", &id[..12])
}

/// A live broker session shared by the routing layer
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Current connection state
    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Receiver observing every state change
    fn watch_state(&self) -> watch::Receiver<ConnectionState>;

    /// Subscribe to a wire topic at QoS 0
    async fn subscribe(&self, topic: &str) -> Result<(), ClientError>;

    /// Unsubscribe from a wire topic
    async fn unsubscribe(&self, topic: &str) -> Result<(), ClientError>;

    /// Publish at QoS 0
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), ClientError>;

    /// Re-establish a lost session using the built-in reconnect logic.
    /// Resolves once the attempt has succeeded or failed.
    async fn reconnect(&self) -> Result<(), ClientError>;

    /// Send DISCONNECT and end the session for good
    async fn close(&self) -> Result<(), ClientError>;
}

/// Opens broker sessions
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        options: &ConnectOptions,
        inbound: InboundHandler,
    ) -> Result<Arc<dyn BrokerClient>, ClientError>;
}

/// Pointer identity for client handles, ignoring vtables
pub fn same_client(a: &Arc<dyn BrokerClient>, b: &Arc<dyn BrokerClient>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
