//! Transport Layer
//!
//! MQTT over WebSocket: every packet travels in one binary frame, and
//! inbound frames are reassembled into packets by the codec.

mod websocket;

pub use websocket::{WsReader, WsTransport, WsWriter, MQTT_SUBPROTOCOL};

use std::fmt;

use tokio_tungstenite::tungstenite;

use crate::protocol::{DecodeError, EncodeError};

/// Errors raised by the transport
#[derive(Debug)]
pub enum TransportError {
    /// The URL could not be turned into a WebSocket request
    InvalidUrl(String),
    /// WebSocket handshake or frame error
    WebSocket(tungstenite::Error),
    /// Inbound bytes were not a valid packet
    Decode(DecodeError),
    /// Outbound packet could not be encoded
    Encode(EncodeError),
    /// Handshake did not finish in time
    Timeout,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::InvalidUrl(msg) => write!(f, "invalid url: {}", msg),
            TransportError::WebSocket(e) => write!(f, "websocket error: {}", e),
            TransportError::Decode(e) => write!(f, "decode error: {}", e),
            TransportError::Encode(e) => write!(f, "encode error: {}", e),
            TransportError::Timeout => write!(f, "websocket handshake timed out"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<tungstenite::Error> for TransportError {
    fn from(e: tungstenite::Error) -> Self {
        TransportError::WebSocket(e)
    }
}

impl From<DecodeError> for TransportError {
    fn from(e: DecodeError) -> Self {
        TransportError::Decode(e)
    }
}

impl From<EncodeError> for TransportError {
    fn from(e: EncodeError) -> Self {
        TransportError::Encode(e)
    }
}
