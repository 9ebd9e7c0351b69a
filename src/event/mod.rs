//! Event Center
//!
//! Name-keyed events on top of the provider's topic handlers. The first
//! registration of a name fixes its topic; later lookups with a different
//! topic get the original event back and a warning in the log.


use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::provider::{Callback, ConnectionProvider, EventPayload, PublishStatus, TopicEventHandler};

/// Name and topic of an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSpec {
    pub name: String,
    pub topic: String,
}

impl EventSpec {
    pub fn new(name: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topic: topic.into(),
        }
    }
}

/// A named channel backed by exactly one topic handler
pub struct Event<T> {
    name: String,
    topic: String,
    handler: Arc<TopicEventHandler<T>>,
}

impl<T: EventPayload> Event<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn register_receive_callback(&self, callback: Callback<T>) -> bool {
        self.handler.subscribe(callback)
    }

    pub fn unregister_receive_callback(&self, callback: &Callback<T>) -> usize {
        self.handler.unsubscribe(callback)
    }

    pub async fn emit(&self, payload: &T) -> Result<PublishStatus> {
        self.handler.emit(payload).await
    }

    pub fn on_receive(&self, payload: &T) {
        self.handler.on_receive(payload)
    }

    pub(crate) fn handler(&self) -> &Arc<TopicEventHandler<T>> {
        &self.handler
    }
}

impl<T> std::fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("topic", &self.topic)
            .finish()
    }
}

pub struct EventCenter {
    provider: Arc<ConnectionProvider>,
    events: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl EventCenter {
    pub fn new(provider: Arc<ConnectionProvider>) -> Self {
        Self {
            provider,
            events: RwLock::new(HashMap::new()),
        }
    }

    pub fn provider(&self) -> &Arc<ConnectionProvider> {
        &self.provider
    }

    /// Event registered under `spec.name`, created on first use
    pub async fn get_or_register_event<T: EventPayload>(
        &self,
        spec: EventSpec,
    ) -> Result<Arc<Event<T>>> {
        if let Some(existing) = self.lookup::<T>(&spec.name)? {
            warn_on_topic_mismatch(&existing, &spec.topic);
            return Ok(existing);
        }

        let (handler, created) = self
            .provider
            .provision_topic_event::<T>(&spec.topic)
            .await?;

        // Another caller may have registered the name while we awaited
        let mut events = self.events.write();
        if let Some(existing) = events.get(&spec.name).cloned() {
            drop(events);
            // Only the registry and this call hold a handler nobody asked for
            if created && Arc::strong_count(&handler) == 2 {
                debug!("Dropping unused topic event '{}'", spec.topic);
                self.provider.delete_topic_event(&handler).await?;
            }
            let existing = downcast_event::<T>(&spec.name, existing)?;
            warn_on_topic_mismatch(&existing, &spec.topic);
            return Ok(existing);
        }

        let event = Arc::new(Event {
            name: spec.name.clone(),
            topic: spec.topic,
            handler,
        });
        events.insert(spec.name, event.clone());
        debug!("Registered event '{}' on '{}'", event.name, event.topic);
        Ok(event)
    }

    /// Registered event for `name`; never creates one
    pub fn get_registered_event<T: EventPayload>(&self, name: &str) -> Result<Option<Arc<Event<T>>>> {
        self.lookup(name)
    }

    /// Drop the name and tear down the event's topic handler
    pub async fn unregister_event<T: EventPayload>(&self, event: &Event<T>) -> Result<()> {
        let removed = {
            let mut events = self.events.write();
            let is_same = events.get(&event.name).is_some_and(|stored| {
                std::ptr::eq(
                    Arc::as_ptr(stored) as *const (),
                    event as *const Event<T> as *const (),
                )
            });
            is_same && events.remove(&event.name).is_some()
        };

        if !removed {
            trace!("Event '{}' not registered", event.name);
            return Ok(());
        }

        debug!("Unregistered event '{}'", event.name);
        self.provider.delete_topic_event(event.handler()).await
    }

    /// Names of all registered events
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.events.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn lookup<T: EventPayload>(&self, name: &str) -> Result<Option<Arc<Event<T>>>> {
        let existing = self.events.read().get(name).cloned();
        existing.map(|e| downcast_event(name, e)).transpose()
    }
}

fn downcast_event<T: EventPayload>(
    name: &str,
    event: Arc<dyn Any + Send + Sync>,
) -> Result<Arc<Event<T>>> {
    event
        .downcast::<Event<T>>()
        .map_err(|_| Error::TypeMismatch {
            key: name.to_string(),
            expected: std::any::type_name::<T>(),
        })
}

fn warn_on_topic_mismatch<T>(event: &Event<T>, requested: &str) {
    if event.topic != requested {
        warn!(
            "Event '{}' is bound to '{}', ignoring requested topic '{}'",
            event.name, event.topic, requested
        );
    }
}
