//! Connection Provider
//!
//! Owns the one broker session and the registry of per-topic handlers.
//! Publishes go out under the secret prefix; inbound messages are
//! de-prefixed, matched to their handler, decoded and fanned out.

mod handler;


pub use handler::{Callback, TopicEventHandler};

use std::any::Any;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::client::{
    BrokerClient, ClientError, ConnectOptions, ConnectionState, Connector, InboundHandler,
};
use crate::error::{Error, ErrorHook, Result};
use crate::register::SecretTopicRegister;
use crate::topic;

/// Payload types that can travel through a topic
pub trait EventPayload: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> EventPayload for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Outcome of a best-effort publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStatus {
    /// Handed to the broker client
    Sent,
    /// Dropped because no connection was up
    NotConnected,
}

/// Type-erased view of a `TopicEventHandler<T>` held by the registry
pub trait TopicDispatch: Send + Sync {
    fn raw_topic(&self) -> &str;

    /// Name of the payload type, for diagnostics
    fn payload_type(&self) -> &'static str;

    /// Decode a JSON body and fan it out
    fn deliver(&self, payload: &[u8]) -> Result<()>;

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

pub struct ConnectionProvider {
    connector: Arc<dyn Connector>,
    options: RwLock<ConnectOptions>,
    client: RwLock<Option<Arc<dyn BrokerClient>>>,
    register: Arc<SecretTopicRegister>,
    handlers: RwLock<HashMap<String, Arc<dyn TopicDispatch>>>,
    /// Serializes connect and disconnect
    lifecycle: tokio::sync::Mutex<()>,
    error_hook: RwLock<Option<ErrorHook>>,
    this: Weak<ConnectionProvider>,
}

impl ConnectionProvider {
    pub fn new(connector: Arc<dyn Connector>, options: ConnectOptions) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            connector,
            options: RwLock::new(options),
            client: RwLock::new(None),
            register: Arc::new(SecretTopicRegister::new()),
            handlers: RwLock::new(HashMap::new()),
            lifecycle: tokio::sync::Mutex::new(()),
            error_hook: RwLock::new(None),
            this: this.clone(),
        })
    }

    pub fn topic_register(&self) -> &Arc<SecretTopicRegister> {
        &self.register
    }

    /// Install a hook for errors that are otherwise only logged
    pub fn set_error_hook(&self, hook: impl Fn(&Error) + Send + Sync + 'static) {
        let hook: ErrorHook = Arc::new(hook);
        self.register.set_error_hook(Some(hook.clone()));
        *self.error_hook.write() = Some(hook);
    }

    pub(crate) fn report_error(&self, e: &Error) {
        let hook = self.error_hook.read().clone();
        if let Some(hook) = hook {
            hook(e);
        }
    }

    pub fn options(&self) -> ConnectOptions {
        self.options.read().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.client
            .read()
            .as_ref()
            .map(|c| c.state())
            .unwrap_or_default()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn set_secret_prefix(&self, prefix: &str) -> Result<bool> {
        self.register.set_secret_prefix(prefix)
    }

    pub async fn sync_subscription(&self) {
        self.register.sync_subscription().await
    }

    /// Connect to the broker.
    ///
    /// `options` replaces the stored options when given. With a live
    /// session this is a no-op; a dropped session is revived through the
    /// client's own reconnect unless `use_existing_reconnect` is off, in
    /// which case it is closed and replaced.
    pub async fn connect(&self, options: Option<ConnectOptions>) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        if let Some(options) = options {
            *self.options.write() = options;
        }
        let options = self.options();

        let existing = self.client.read().clone();
        if let Some(client) = existing {
            if client.is_connected() {
                trace!("Already connected");
                return Ok(());
            }

            if options.use_existing_reconnect {
                debug!("Reconnecting existing client");
                return match client.reconnect().await {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        error!("Reconnect to {} failed: {}", options.url, e);
                        self.client.write().take();
                        let _ = client.close().await;
                        Err(e.into())
                    }
                };
            }

            debug!("Replacing disconnected client");
            self.client.write().take();
            if let Err(e) = client.close().await {
                debug!("Closing stale client: {}", e);
            }
        }

        match self.connector.connect(&options, self.dispatcher()).await {
            Ok(client) => {
                info!("Connected to {}", options.url);
                *self.client.write() = Some(client.clone());
                self.register.set_client(client).await;
                Ok(())
            }
            Err(e) => {
                error!("Connect to {} failed: {}", options.url, e);
                self.client.write().take();
                Err(e.into())
            }
        }
    }

    /// Close the session and wait for it to finish.
    ///
    /// A client that is still retrying in the background is stopped too.
    pub async fn disconnect(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        let Some(client) = self.client.write().take() else {
            trace!("Not connected");
            return Ok(());
        };
        client.close().await?;
        info!("Disconnected");
        Ok(())
    }

    /// Handler for `topic`, created and registered on first use
    pub async fn get_or_create_topic_event<T: EventPayload>(
        &self,
        topic: &str,
    ) -> Result<Arc<TopicEventHandler<T>>> {
        self.provision_topic_event(topic)
            .await
            .map(|(handler, _)| handler)
    }

    /// Like `get_or_create_topic_event`, also telling whether this call
    /// created the handler
    pub(crate) async fn provision_topic_event<T: EventPayload>(
        &self,
        topic: &str,
    ) -> Result<(Arc<TopicEventHandler<T>>, bool)> {
        topic::validate_raw_topic(topic).map_err(|reason| Error::InvalidTopic {
            topic: topic.to_string(),
            reason,
        })?;

        if let Some(existing) = self.handlers.read().get(topic).cloned() {
            return downcast_handler(existing).map(|h| (h, false));
        }

        let handler = {
            let mut handlers = self.handlers.write();
            match handlers.entry(topic.to_string()) {
                Entry::Occupied(entry) => {
                    return downcast_handler(entry.get().clone()).map(|h| (h, false))
                }
                Entry::Vacant(entry) => {
                    let handler = Arc::new(TopicEventHandler::<T>::new(topic, self.this.clone()));
                    entry.insert(handler.clone());
                    handler
                }
            }
        };

        debug!("Created topic event '{}'", topic);
        self.register.register_topic(topic).await?;
        Ok((handler, true))
    }

    /// Remove `handler` and unregister its topic, whatever callbacks it
    /// still holds
    pub async fn delete_topic_event<T: EventPayload>(
        &self,
        handler: &TopicEventHandler<T>,
    ) -> Result<()> {
        let topic = handler.topic();
        let removed = {
            let mut handlers = self.handlers.write();
            let is_same = handlers.get(topic).is_some_and(|stored| {
                std::ptr::eq(
                    Arc::as_ptr(stored) as *const (),
                    handler as *const TopicEventHandler<T> as *const (),
                )
            });
            is_same && handlers.remove(topic).is_some()
        };

        if !removed {
            trace!("Topic event '{}' already deleted", topic);
            return Ok(());
        }

        debug!(
            "Deleted topic event '{}' ({} callbacks left)",
            topic,
            handler.len()
        );
        self.register.unregister_topic(topic).await
    }

    /// Best-effort JSON publish on the wire form of `topic`
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        payload: &T,
    ) -> Result<PublishStatus> {
        let client = self.client.read().clone();
        let Some(client) = client.filter(|c| c.is_connected()) else {
            warn!("Not connected, dropping publish to '{}'", topic);
            return Ok(PublishStatus::NotConnected);
        };

        let wire = self.register.join_secret_prefix(topic)?;
        let body = serde_json::to_vec(payload)?;

        match client.publish(&wire, Bytes::from(body)).await {
            Ok(()) => {
                trace!("Published to '{}'", wire);
                Ok(PublishStatus::Sent)
            }
            Err(ClientError::NotConnected) => {
                warn!("Connection dropped, publish to '{}' not sent", topic);
                Ok(PublishStatus::NotConnected)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Topics with a live handler
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.handlers.read().keys().cloned().collect();
        topics.sort();
        topics
    }

    fn dispatcher(&self) -> InboundHandler {
        let this = self.this.clone();
        Arc::new(move |wire: &str, payload: Bytes| {
            if let Some(provider) = this.upgrade() {
                provider.dispatch(wire, &payload);
            }
        })
    }

    /// Route one inbound message; never fails
    pub(crate) fn dispatch(&self, wire: &str, payload: &[u8]) {
        let raw = match self.register.remove_secret_prefix(wire) {
            Ok(raw) => raw,
            Err(_) => {
                trace!("No secret prefix, dropping message on '{}'", wire);
                return;
            }
        };

        let handler = self.handlers.read().get(&raw).cloned();
        let Some(handler) = handler else {
            trace!("No handler for '{}'", raw);
            return;
        };

        if let Err(e) = handler.deliver(payload) {
            warn!(
                "Dropping message on '{}' (expected {}): {}",
                raw,
                handler.payload_type(),
                e
            );
            self.report_error(&e);
        }
    }
}

fn downcast_handler<T: EventPayload>(
    handler: Arc<dyn TopicDispatch>,
) -> Result<Arc<TopicEventHandler<T>>> {
    let topic = handler.raw_topic().to_string();
    handler
        .as_any()
        .downcast::<TopicEventHandler<T>>()
        .map_err(|_| Error::TypeMismatch {
            key: topic,
            expected: std::any::type_name::<T>(),
        })
}
