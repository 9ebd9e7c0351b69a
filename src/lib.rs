//! secretmq - MQTT topic routing under a secret namespace
//!
//! Multiplexes one MQTT-over-WebSocket session into typed, named events.
//! Every topic travels on the wire under a prefix derived from a shared
//! secret, and subscriptions are rebuilt whenever that prefix or the
//! connection changes.

pub mod client;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod payload;
pub mod protocol;
pub mod provider;
pub mod register;
pub mod topic;
pub mod transport;

pub use client::{BrokerClient, ConnectOptions, ConnectionState, Connector, WsConnector};
pub use config::{Config, Settings};
pub use context::MessagingContext;
pub use error::{Error, Result};
pub use event::{Event, EventCenter, EventSpec};
pub use payload::{Envelope, PayloadBuilder};
pub use protocol::QoS;
pub use provider::{Callback, ConnectionProvider, PublishStatus, TopicEventHandler};
pub use register::SecretTopicRegister;
