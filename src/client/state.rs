//! Connection state machine
//!
//! ```text
//!   Idle ──ConnectStarted──▶ Connecting ──ConnAckReceived──▶ Connected
//!                               │                               │
//!                          ConnectFailed                  ConnectionLost
//!                               ▼                               ▼
//!                          Disconnected ◀────────────────── Disconnected
//!                               │
//!                         ConnectStarted ──▶ Connecting ...
//! ```
//!
//! `Closed` moves every state to `Disconnected`.

use tokio::sync::watch;
use tracing::trace;

/// Connection state of a broker client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Never connected
    #[default]
    Idle,
    /// Handshake in progress
    Connecting,
    /// CONNACK accepted, session usable
    Connected,
    /// Lost, refused or closed
    Disconnected,
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    ConnectStarted,
    ConnAckReceived,
    ConnectFailed,
    ConnectionLost,
    Closed,
}

impl ConnectionState {
    /// Next state for `event`, or `None` when the event is not valid here
    pub fn next(self, event: ConnectionEvent) -> Option<ConnectionState> {
        use ConnectionEvent::*;
        use ConnectionState::*;

        match (self, event) {
            (Idle | Disconnected, ConnectStarted) => Some(Connecting),
            (Connecting, ConnAckReceived) => Some(Connected),
            (Connecting, ConnectFailed) => Some(Disconnected),
            (Connected, ConnectionLost) => Some(Disconnected),
            (_, Closed) => Some(Disconnected),
            _ => None,
        }
    }
}

/// An observed change of state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

impl Transition {
    /// Entering `Connected` means the broker may have forgotten our
    /// subscriptions, so they must be re-established.
    pub fn requires_resync(&self) -> bool {
        self.to == ConnectionState::Connected && self.from != ConnectionState::Connected
    }
}

/// Shared state holder publishing every change on a watch channel
#[derive(Debug)]
pub struct StateCell {
    tx: watch::Sender<ConnectionState>,
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::Idle);
        Self { tx }
    }

    pub fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Apply an event; returns the transition if the state actually changed
    pub fn apply(&self, event: ConnectionEvent) -> Option<Transition> {
        let mut transition = None;
        self.tx.send_if_modified(|state| match state.next(event) {
            Some(to) if to != *state => {
                transition = Some(Transition { from: *state, to });
                *state = to;
                true
            }
            Some(_) => false,
            None => {
                trace!("Ignoring {:?} in state {:?}", event, state);
                false
            }
        });
        transition
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
