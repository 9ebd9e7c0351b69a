//! Topic Event Handler
//!
//! Ordered fan-out list for one raw topic. Callbacks are deduplicated by
//! `Arc` identity and each runs behind its own panic boundary.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{error, trace};

use super::{ConnectionProvider, EventPayload, PublishStatus, TopicDispatch};
use crate::error::{Error, Result};

/// Receive callback
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub struct TopicEventHandler<T> {
    topic: String,
    callbacks: RwLock<Vec<Callback<T>>>,
    provider: Weak<ConnectionProvider>,
}

fn same_callback<T>(a: &Callback<T>, b: &Callback<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl<T: EventPayload> TopicEventHandler<T> {
    pub(crate) fn new(topic: &str, provider: Weak<ConnectionProvider>) -> Self {
        Self {
            topic: topic.to_string(),
            callbacks: RwLock::new(Vec::new()),
            provider,
        }
    }

    /// Raw topic this handler serves
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Append `callback` unless the same `Arc` is already registered
    pub fn subscribe(&self, callback: Callback<T>) -> bool {
        let mut callbacks = self.callbacks.write();
        if callbacks.iter().any(|c| same_callback(c, &callback)) {
            return false;
        }
        callbacks.push(callback);
        true
    }

    /// Remove every occurrence of `callback`; returns how many remain
    pub fn unsubscribe(&self, callback: &Callback<T>) -> usize {
        let mut callbacks = self.callbacks.write();
        callbacks.retain(|c| !same_callback(c, callback));
        callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.callbacks.read().len()
    }

    /// Invoke every callback in registration order.
    ///
    /// Works on a snapshot, so callbacks may (un)subscribe while running.
    /// A panicking callback is logged and skipped.
    pub fn on_receive(&self, payload: &T) {
        let snapshot = self.callbacks.read().clone();
        trace!("Delivering to {} callbacks on '{}'", snapshot.len(), self.topic);

        for callback in snapshot {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(payload))) {
                let message = panic_message(panic.as_ref());
                error!("Callback on '{}' panicked: {}", self.topic, message);
                if let Some(provider) = self.provider.upgrade() {
                    provider.report_error(&Error::CallbackPanicked {
                        topic: self.topic.clone(),
                        message,
                    });
                }
            }
        }
    }

    /// Publish on this handler's topic
    pub async fn emit(&self, payload: &T) -> Result<PublishStatus> {
        let provider = self
            .provider
            .upgrade()
            .ok_or(Error::NotConfigured("connection provider"))?;
        provider.publish(&self.topic, payload).await
    }
}

impl<T: EventPayload> TopicDispatch for TopicEventHandler<T> {
    fn raw_topic(&self) -> &str {
        &self.topic
    }

    fn payload_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn deliver(&self, payload: &[u8]) -> Result<()> {
        let value: T = serde_json::from_slice(payload)?;
        self.on_receive(&value);
        Ok(())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
