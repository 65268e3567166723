//! Event Bus - connection lifecycle notifications
//!
//! Design: Type-safe events over a tokio broadcast channel.
//! Protocol events go through the EventDispatcher; this bus only reports
//! what happens to the transport underneath.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Lifecycle events published by a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    Connected { endpoint: String },
    Reconnected { endpoint: String },
    Disconnected { endpoint: String, reason: String },
    Closed { endpoint: String },
}

/// Simple event bus using tokio broadcast channel
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<ConnectionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event
    pub fn publish(&self, event: ConnectionEvent) {
        let _ = self.tx.send(event); // Ignore error if no subscribers
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.tx.subscribe()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
