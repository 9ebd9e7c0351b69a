//! Secret-prefix topic register
//!
//! Keeps two sets apart: the raw topics the application wants (survives
//! prefix changes and disconnects) and the wire topics currently
//! subscribed with the broker. `sync_subscription` rebuilds the second
//! from the first; it runs on demand and on every transition of the bound
//! client into `Connected`.


use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::client::{same_client, BrokerClient, ClientError, ConnectionState, Transition};
use crate::error::{Error, ErrorHook, Result};
use crate::topic;

#[derive(Debug, Default)]
struct Topics {
    prefix: Option<String>,
    desired: BTreeSet<String>,
    subscribed: HashSet<String>,
}

pub struct SecretTopicRegister {
    topics: RwLock<Topics>,
    client: RwLock<Option<Arc<dyn BrokerClient>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    /// Serializes whole sync runs
    sync_lock: tokio::sync::Mutex<()>,
    error_hook: RwLock<Option<ErrorHook>>,
}

impl SecretTopicRegister {
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(Topics::default()),
            client: RwLock::new(None),
            listener: Mutex::new(None),
            sync_lock: tokio::sync::Mutex::new(()),
            error_hook: RwLock::new(None),
        }
    }

    pub fn set_error_hook(&self, hook: Option<ErrorHook>) {
        *self.error_hook.write() = hook;
    }

    /// Replace the prefix. Returns whether it changed.
    ///
    /// Does not resubscribe; call `sync_subscription` afterwards.
    pub fn set_secret_prefix(&self, prefix: &str) -> Result<bool> {
        topic::validate_secret_prefix(prefix).map_err(|reason| Error::InvalidTopic {
            topic: prefix.to_string(),
            reason,
        })?;

        let mut topics = self.topics.write();
        if topics.prefix.as_deref() == Some(prefix) {
            return Ok(false);
        }
        debug!("Secret prefix changed");
        topics.prefix = Some(prefix.to_string());
        Ok(true)
    }

    pub fn secret_prefix(&self) -> Result<String> {
        self.topics
            .read()
            .prefix
            .clone()
            .ok_or(Error::NotConfigured("secret prefix"))
    }

    pub fn client(&self) -> Option<Arc<dyn BrokerClient>> {
        self.client.read().clone()
    }

    /// Bind a client. Rebinding the same instance is a no-op.
    ///
    /// Installs a listener that resyncs whenever the client becomes
    /// connected, and resyncs right away if it already is.
    pub async fn set_client(self: &Arc<Self>, client: Arc<dyn BrokerClient>) {
        {
            let mut current = self.client.write();
            if let Some(existing) = current.as_ref() {
                if same_client(existing, &client) {
                    trace!("Client already bound");
                    return;
                }
            }
            *current = Some(client.clone());
        }

        // Subscriptions of the previous session are not ours to track
        self.topics.write().subscribed.clear();

        let mut state_rx = client.watch_state();
        let baseline = *state_rx.borrow_and_update();
        let listener = tokio::spawn(follow_connection(Arc::downgrade(self), state_rx, baseline));
        if let Some(previous) = self.listener.lock().replace(listener) {
            previous.abort();
        }

        if baseline == ConnectionState::Connected {
            self.sync_subscription().await;
        }
    }

    /// Add a raw topic to the desired set and subscribe it when possible
    pub async fn register_topic(&self, raw: &str) -> Result<()> {
        validate_raw(raw)?;

        let wire = {
            let mut topics = self.topics.write();
            topics.desired.insert(raw.to_string());
            match &topics.prefix {
                Some(prefix) => topic::join_secret_prefix(prefix, raw),
                None => return Ok(()),
            }
        };

        if self.topics.read().subscribed.contains(&wire) {
            return Ok(());
        }

        let Some(client) = self.connected_client() else {
            trace!("Not connected, deferring subscribe of '{}'", raw);
            return Ok(());
        };

        match client.subscribe(&wire).await {
            Ok(()) => {
                self.topics.write().subscribed.insert(wire);
            }
            Err(e) => self.report_client_error("subscribe", raw, e),
        }
        Ok(())
    }

    /// Remove a raw topic from the desired set and unsubscribe it when
    /// possible
    pub async fn unregister_topic(&self, raw: &str) -> Result<()> {
        let wire = {
            let mut topics = self.topics.write();
            topics.desired.remove(raw);
            match &topics.prefix {
                Some(prefix) => topic::join_secret_prefix(prefix, raw),
                None => return Ok(()),
            }
        };

        // While disconnected the wire topic stays tracked so the next sync
        // unsubscribes it
        let Some(client) = self.connected_client() else {
            trace!("Not connected, deferring unsubscribe of '{}'", raw);
            return Ok(());
        };

        match client.unsubscribe(&wire).await {
            Ok(()) => {
                self.topics.write().subscribed.remove(&wire);
            }
            Err(e) => self.report_client_error("unsubscribe", raw, e),
        }
        Ok(())
    }

    /// Whether the wire form of `raw` is currently subscribed
    pub fn is_topic_registered(&self, raw: &str) -> Result<bool> {
        let topics = self.topics.read();
        let prefix = topics
            .prefix
            .as_deref()
            .ok_or(Error::NotConfigured("secret prefix"))?;
        Ok(topics
            .subscribed
            .contains(&topic::join_secret_prefix(prefix, raw)))
    }

    pub fn join_secret_prefix(&self, raw: &str) -> Result<String> {
        let prefix = self.secret_prefix()?;
        Ok(topic::join_secret_prefix(&prefix, raw))
    }

    pub fn remove_secret_prefix(&self, wire: &str) -> Result<String> {
        let prefix = self.secret_prefix()?;
        Ok(topic::remove_secret_prefix(&prefix, wire).to_string())
    }

    /// Unsubscribe everything tracked, then subscribe every desired topic
    /// under the current prefix.
    ///
    /// No-op unless a prefix is set and the bound client is connected.
    pub async fn sync_subscription(&self) {
        let _sync = self.sync_lock.lock().await;

        let Some(client) = self.connected_client() else {
            trace!("Skipping sync, not connected");
            return;
        };
        if self.topics.read().prefix.is_none() {
            trace!("Skipping sync, no secret prefix");
            return;
        }

        let stale = std::mem::take(&mut self.topics.write().subscribed);
        for wire in &stale {
            if let Err(e) = client.unsubscribe(wire).await {
                self.report_client_error("unsubscribe", wire, e);
            }
        }

        // Read fresh: the prefix may have moved while unsubscribing
        let (prefix, desired) = {
            let topics = self.topics.read();
            match &topics.prefix {
                Some(prefix) => (prefix.clone(), topics.desired.clone()),
                None => return,
            }
        };

        let mut subscribed = HashSet::with_capacity(desired.len());
        for raw in &desired {
            let wire = topic::join_secret_prefix(&prefix, raw);
            match client.subscribe(&wire).await {
                Ok(()) => {
                    subscribed.insert(wire);
                }
                Err(e) => self.report_client_error("subscribe", raw, e),
            }
        }

        debug!(
            "Synced subscriptions: {} removed, {} of {} subscribed",
            stale.len(),
            subscribed.len(),
            desired.len()
        );
        self.topics.write().subscribed.extend(subscribed);
    }

    /// Raw topics the application wants live
    pub fn desired_topics(&self) -> BTreeSet<String> {
        self.topics.read().desired.clone()
    }

    /// Wire topics currently subscribed with the broker
    pub fn subscribed_topics(&self) -> BTreeSet<String> {
        self.topics.read().subscribed.iter().cloned().collect()
    }

    fn connected_client(&self) -> Option<Arc<dyn BrokerClient>> {
        self.client().filter(|client| client.is_connected())
    }

    fn report_client_error(&self, op: &str, topic: &str, e: ClientError) {
        if matches!(e, ClientError::NotConnected) {
            debug!("{} '{}' skipped: not connected", op, topic);
            return;
        }
        warn!("Failed to {} '{}': {}", op, topic, e);
        let hook = self.error_hook.read().clone();
        if let Some(hook) = hook {
            hook(&Error::Client(e));
        }
    }
}

impl Default for SecretTopicRegister {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SecretTopicRegister {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
    }
}

fn validate_raw(raw: &str) -> Result<()> {
    topic::validate_raw_topic(raw).map_err(|reason| Error::InvalidTopic {
        topic: raw.to_string(),
        reason,
    })
}

/// Resync on every transition of the client into `Connected` after
/// `baseline`, the state seen when the client was bound
async fn follow_connection(
    register: Weak<SecretTopicRegister>,
    mut state_rx: watch::Receiver<ConnectionState>,
    baseline: ConnectionState,
) {
    let mut last = baseline;

    while state_rx.changed().await.is_ok() {
        let current = *state_rx.borrow_and_update();
        // The watch coalesces; seeing Connected again means we left it
        let from = if current == last {
            ConnectionState::Disconnected
        } else {
            last
        };
        last = current;

        if !(Transition { from, to: current }).requires_resync() {
            continue;
        }

        let Some(register) = register.upgrade() else {
            break;
        };
        debug!("Client connected, resyncing subscriptions");
        register.sync_subscription().await;
    }
}
