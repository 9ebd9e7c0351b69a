//! Messaging Context
//!
//! One per application: the connection provider, the event center built on
//! it and the payload builder, plus the glue that turns a settings change
//! into connect, disconnect and resubscribe calls.


use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::client::{ConnectOptions, Connector, WsConnector};
use crate::config::{Config, Settings};
use crate::error::{Error, Result};
use crate::event::{Event, EventCenter};
use crate::payload::{Envelope, PayloadBuilder};
use crate::provider::{ConnectionProvider, EventPayload, PublishStatus};

const ANONYMOUS: &str = "anonymous";

pub struct MessagingContext {
    provider: Arc<ConnectionProvider>,
    events: EventCenter,
    payloads: PayloadBuilder,
    settings: Mutex<Settings>,
}

impl MessagingContext {
    pub fn new(connector: Arc<dyn Connector>, config: &Config) -> Self {
        let provider = ConnectionProvider::new(connector, ConnectOptions::from_config(config));
        Self {
            events: EventCenter::new(provider.clone()),
            provider,
            payloads: PayloadBuilder::default(),
            settings: Mutex::new(Settings::default()),
        }
    }

    /// Context talking to a real broker over WebSocket
    pub fn from_config(config: &Config) -> Self {
        Self::new(Arc::new(WsConnector::new()), config)
    }

    pub fn provider(&self) -> &Arc<ConnectionProvider> {
        &self.provider
    }

    pub fn events(&self) -> &EventCenter {
        &self.events
    }

    pub fn payloads(&self) -> &PayloadBuilder {
        &self.payloads
    }

    /// Settings applied last
    pub fn settings(&self) -> Settings {
        self.settings.lock().clone()
    }

    /// React to new settings.
    ///
    /// Disabled: disconnect. Enabled: stamp payloads with the username,
    /// move to the new namespace and connect. A changed broker URL or
    /// username forces a fresh session. Settings that fail validation leave
    /// the context untouched.
    pub async fn apply_settings(&self, settings: Settings) -> Result<()> {
        if !settings.enabled {
            info!("Messaging disabled");
            self.provider.disconnect().await?;
            *self.settings.lock() = settings;
            return Ok(());
        }

        let prefix = settings
            .secret_prefix()
            .ok_or(Error::NotConfigured("secret key"))?;
        let prefix_changed = self.provider.set_secret_prefix(prefix)?;
        *self.settings.lock() = settings.clone();

        let sender = settings.username.trim();
        self.payloads
            .set_sender(if sender.is_empty() { ANONYMOUS } else { sender });

        if prefix_changed {
            self.provider.sync_subscription().await;
        }

        let mut options = self.provider.options();
        let username = (!sender.is_empty()).then(|| sender.to_string());
        let url_changed = options.url != settings.broker_url;
        let username_changed = options.username != username;
        options.url = settings.broker_url.clone();
        options.username = username;

        // CONNECT carries the identity, so only a new session picks it up
        if url_changed || username_changed {
            debug!(
                "Broker identity changed to {} as {}",
                options.url,
                options.username.as_deref().unwrap_or(ANONYMOUS)
            );
            self.provider.disconnect().await?;
        }
        self.provider.connect(Some(options)).await
    }

    /// Stamp `data` and emit it on `event`
    pub async fn emit<T>(&self, event: &Event<Envelope<T>>, data: T) -> Result<PublishStatus>
    where
        Envelope<T>: EventPayload,
    {
        event.emit(&self.payloads.build(data)).await
    }
}
