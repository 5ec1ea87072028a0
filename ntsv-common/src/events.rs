//! Notification lifecycle events and the broadcast EventBus
//!
//! Every admission decision and lifecycle transition the daemon takes is
//! published here. Subscribers include the SSE endpoint and tests.

use crate::category::{Category, PolicyClass, PolicyState};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Notification lifecycle events
///
/// Serialized with a `type` tag for SSE transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NsvEvent {
    /// Request accepted and given an id
    NotificationAdmitted {
        id: u32,
        category: Category,
        /// Admission will finish the notification currently occupying the slot
        preempting: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Notification waiting in the pending queue
    NotificationQueued {
        id: u32,
        category: Category,
        /// Zero-based position in the queue at insertion
        position: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Request refused (unknown category, lost preemption, handler failure)
    NotificationRejected {
        category: Option<Category>,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Policy outcome known and the type handler asked to play
    NotificationStarted {
        id: u32,
        category: Category,
        play_granted: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Notification destroyed after handler shutdown
    NotificationFinished {
        id: u32,
        category: Category,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Primary sound failed, replaying with the fallback file
    FallbackEngaged {
        id: u32,
        sound_file: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Policy authority commanded the holder of a class
    PolicyCommand {
        class: PolicyClass,
        state: PolicyState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl NsvEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            NsvEvent::NotificationAdmitted { .. } => "NotificationAdmitted",
            NsvEvent::NotificationQueued { .. } => "NotificationQueued",
            NsvEvent::NotificationRejected { .. } => "NotificationRejected",
            NsvEvent::NotificationStarted { .. } => "NotificationStarted",
            NsvEvent::NotificationFinished { .. } => "NotificationFinished",
            NsvEvent::FallbackEngaged { .. } => "FallbackEngaged",
            NsvEvent::PolicyCommand { .. } => "PolicyCommand",
        }
    }

    /// Notification id the event refers to, if any
    pub fn notification_id(&self) -> Option<u32> {
        match self {
            NsvEvent::NotificationAdmitted { id, .. }
            | NsvEvent::NotificationQueued { id, .. }
            | NsvEvent::NotificationStarted { id, .. }
            | NsvEvent::NotificationFinished { id, .. }
            | NsvEvent::FallbackEngaged { id, .. } => Some(*id),
            NsvEvent::NotificationRejected { .. } | NsvEvent::PolicyCommand { .. } => None,
        }
    }
}

// ========================================
// EventBus
// ========================================

/// Central distribution bus for lifecycle events
///
/// Wraps `tokio::broadcast`: publishing never blocks, slow subscribers
/// observe `Lagged` instead of stalling the daemon loop.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<NsvEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    ///
    /// ```
    /// use ntsv_common::events::EventBus;
    ///
    /// let bus = EventBus::new(100);
    /// assert_eq!(bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<NsvEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, returning the number of subscribers that received it
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: NsvEvent) -> Result<usize, broadcast::error::SendError<NsvEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the absence of subscribers
    pub fn emit_lossy(&self, event: NsvEvent) {
        if self.tx.send(event).is_err() {
            trace!("No subscribers for lifecycle event");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
