//! Payload Builder
//!
//! Wraps outgoing data in an envelope carrying a unique id, the sender's
//! display name and a millisecond UTC timestamp.

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stamped message body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub id: String,
    pub sender: String,
    /// Unix epoch milliseconds
    pub timestamp: i64,
    pub data: T,
}

#[derive(Debug)]
pub struct PayloadBuilder {
    sender: RwLock<String>,
}

impl PayloadBuilder {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: RwLock::new(sender.into()),
        }
    }

    pub fn sender(&self) -> String {
        self.sender.read().clone()
    }

    /// Follow a username change
    pub fn set_sender(&self, sender: impl Into<String>) {
        *self.sender.write() = sender.into();
    }

    pub fn build<T>(&self, data: T) -> Envelope<T> {
        Envelope {
            id: Uuid::new_v4().to_string(),
            sender: self.sender(),
            timestamp: Utc::now().timestamp_millis(),
            data,
        }
    }
}

impl Default for PayloadBuilder {
    fn default() -> Self {
        Self::new("anonymous")
    }
}
