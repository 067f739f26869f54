//! Lifecycle event broadcast.
//!
//! Every connectivity-affecting state transition is observable for logging
//! and metrics without blocking the session that produced it: sends go
//! through a `broadcast` channel and are dropped when nobody listens.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use taghub_types::{DeviceIdentity, SensorChannel};

use crate::session::{LostReason, SessionState};

/// Events emitted by the hub and its sessions.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum SessionEvent {
    /// A tag was discovered during scanning.
    Discovered {
        identity: DeviceIdentity,
        rssi: Option<i16>,
    },
    /// A session moved between lifecycle states.
    StateChanged {
        identity: DeviceIdentity,
        from: SessionState,
        to: SessionState,
    },
    /// A measurement was decoded and handed to the sink.
    Reading {
        identity: DeviceIdentity,
        channel: SensorChannel,
    },
    /// A measurement was dropped (bad payload or sink failure).
    ReadingDropped {
        identity: DeviceIdentity,
        reason: String,
    },
    /// A session reached its terminal state.
    Lost {
        identity: DeviceIdentity,
        reason: LostReason,
    },
}

/// Sender for session events.
pub type EventSender = broadcast::Sender<SessionEvent>;

/// Receiver for session events.
pub type EventReceiver = broadcast::Receiver<SessionEvent>;

/// Event fan-out shared by the scanner, registry, and sessions.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: EventSender,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event. Never blocks; lost if there are no receivers.
    pub fn send(&self, event: SessionEvent) {
        let _ = self.sender.send(event);
    }

    /// Number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
