//! In-memory broker client
//!
//! Records every wire operation and loops publishes back to its own
//! subscriptions. Tests drive connection state and inbound traffic by hand;
//! embedders can use it as an offline stand-in.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::{
    BrokerClient, ClientError, ConnectOptions, ConnectionEvent, ConnectionState, Connector,
    InboundHandler, StateCell,
};

/// A recorded wire operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireOp {
    Subscribe(String),
    Unsubscribe(String),
    Publish(String, Bytes),
}

/// Connector producing `MemoryClient`s
#[derive(Default)]
pub struct MemoryConnector {
    clients: Mutex<Vec<Arc<MemoryClient>>>,
    refuse: AtomicBool,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `connect` calls fail
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of sessions opened so far
    pub fn connect_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Most recently opened session
    pub fn last_client(&self) -> Option<Arc<MemoryClient>> {
        self.clients.lock().last().cloned()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        options: &ConnectOptions,
        inbound: InboundHandler,
    ) -> Result<Arc<dyn BrokerClient>, ClientError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ClientError::ConnectionFailed(format!(
                "{} refused the connection",
                options.url
            )));
        }

        let client = Arc::new(MemoryClient::new(options.clone(), inbound));
        client.state.apply(ConnectionEvent::ConnectStarted);
        client.state.apply(ConnectionEvent::ConnAckReceived);
        self.clients.lock().push(client.clone());
        Ok(client)
    }
}

/// In-memory session
pub struct MemoryClient {
    options: ConnectOptions,
    state: StateCell,
    inbound: InboundHandler,
    ops: Mutex<Vec<WireOp>>,
    subscriptions: Mutex<BTreeSet<String>>,
    refused_topics: Mutex<BTreeSet<String>>,
    refuse_reconnect: AtomicBool,
    slow_acks: AtomicBool,
}

impl MemoryClient {
    pub fn new(options: ConnectOptions, inbound: InboundHandler) -> Self {
        Self {
            options,
            state: StateCell::new(),
            inbound,
            ops: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(BTreeSet::new()),
            refused_topics: Mutex::new(BTreeSet::new()),
            refuse_reconnect: AtomicBool::new(false),
            slow_acks: AtomicBool::new(false),
        }
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// All wire operations so far
    pub fn ops(&self) -> Vec<WireOp> {
        self.ops.lock().clone()
    }

    /// Drain the operation log
    pub fn take_ops(&self) -> Vec<WireOp> {
        std::mem::take(&mut *self.ops.lock())
    }

    /// Topics the simulated broker currently holds for this session
    pub fn subscriptions(&self) -> BTreeSet<String> {
        self.subscriptions.lock().clone()
    }

    /// Payloads published so far, in order
    pub fn published(&self) -> Vec<(String, Bytes)> {
        self.ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                WireOp::Publish(topic, payload) => Some((topic.clone(), payload.clone())),
                _ => None,
            })
            .collect()
    }

    /// Deliver a message as if the broker had sent it
    pub fn inject(&self, topic: &str, payload: impl Into<Bytes>) {
        (self.inbound)(topic, payload.into());
    }

    /// Make SUBSCRIBE for `topic` fail
    pub fn refuse_subscription(&self, topic: &str) {
        self.refused_topics.lock().insert(topic.to_string());
    }

    /// Yield to the runtime once before acknowledging a SUBSCRIBE
    pub fn slow_acks(&self, slow: bool) {
        self.slow_acks.store(slow, Ordering::SeqCst);
    }

    /// Make `reconnect()` fail
    pub fn refuse_reconnect(&self, refuse: bool) {
        self.refuse_reconnect.store(refuse, Ordering::SeqCst);
    }

    /// Simulate the broker dropping the connection; a clean session
    /// forgets its subscriptions
    pub fn drop_connection(&self) {
        self.subscriptions.lock().clear();
        self.state.apply(ConnectionEvent::ConnectionLost);
    }

    /// Simulate the built-in reconnect succeeding
    pub fn restore_connection(&self) {
        self.state.apply(ConnectionEvent::ConnectStarted);
        self.state.apply(ConnectionEvent::ConnAckReceived);
    }

    fn ensure_connected(&self) -> Result<(), ClientError> {
        if self.state.get() == ConnectionState::Connected {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }
}

#[async_trait]
impl BrokerClient for MemoryClient {
    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    async fn subscribe(&self, topic: &str) -> Result<(), ClientError> {
        self.ensure_connected()?;
        self.ops.lock().push(WireOp::Subscribe(topic.to_string()));
        if self.refused_topics.lock().contains(topic) {
            return Err(ClientError::Rejected("subscription refused".to_string()));
        }
        if self.slow_acks.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        self.subscriptions.lock().insert(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), ClientError> {
        self.ensure_connected()?;
        self.ops.lock().push(WireOp::Unsubscribe(topic.to_string()));
        self.subscriptions.lock().remove(topic);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), ClientError> {
        self.ensure_connected()?;
        self.ops
            .lock()
            .push(WireOp::Publish(topic.to_string(), payload.clone()));

        let echo = self.subscriptions.lock().contains(topic);
        if echo {
            (self.inbound)(topic, payload);
        }
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), ClientError> {
        if self.state.get() == ConnectionState::Connected {
            return Ok(());
        }
        self.state.apply(ConnectionEvent::ConnectStarted);
        if self.refuse_reconnect.load(Ordering::SeqCst) {
            self.state.apply(ConnectionEvent::ConnectFailed);
            return Err(ClientError::ConnectionFailed(
                "reconnect refused".to_string(),
            ));
        }
        self.state.apply(ConnectionEvent::ConnAckReceived);
        Ok(())
    }

    async fn close(&self) -> Result<(), ClientError> {
        self.subscriptions.lock().clear();
        self.state.apply(ConnectionEvent::Closed);
        Ok(())
    }
}
