//! Notifications and their arbitration
//!
//! **Architecture:**
//! - `NotificationManager`: the single audio slot, the pending queue,
//!   preemption, policy serialization, fallback recovery
//! - `handlers`: one type handler per category (ringtone, alarms, messages, system)
//!
//! **Lifecycle:** `Unknown → Initialized → Playing → Stopped`. `Initialized`
//! means "awaiting the policy decision"; a finish arriving then is latched
//! and applied when the decision comes in.

pub mod handlers;
pub mod manager;

pub use handlers::{HandlerContext, HandlerFlags, HandlerRegistry, NotificationHandler, PlayStatus};
pub use manager::{ContentionMode, ManagerSnapshot, NotificationManager};

use crate::policy::PolicySessionId;
use handlers::HandlerState;
use ntsv_common::Category;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Notification identifier, unique for the daemon's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NotificationId(pub u32);

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Manager-owned status of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Unknown,
    /// Current, policy decision outstanding
    Initialized,
    /// Handler asked to play
    Playing,
    Stopped,
}

/// Everything the dispatch facade resolved for one request
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRequest {
    pub category: Category,
    pub sound_file: Option<PathBuf>,
    pub fallback_sound_file: Option<PathBuf>,
    /// 0-100
    pub volume: u8,
    pub vibra_pattern: Option<String>,
    pub vibra_enabled: bool,
    pub sound_enabled: bool,
    pub sender: Option<String>,
}

impl NotificationRequest {
    pub fn new(category: Category) -> Self {
        Self {
            category,
            sound_file: None,
            fallback_sound_file: None,
            volume: 100,
            vibra_pattern: None,
            vibra_enabled: false,
            sound_enabled: true,
            sender: None,
        }
    }
}

/// One in-flight notification
pub struct Notification {
    pub id: NotificationId,
    pub category: Category,
    pub sound_file: Option<PathBuf>,
    pub fallback_sound_file: Option<PathBuf>,
    pub volume: u8,
    pub vibra_pattern: Option<String>,
    pub vibra_enabled: bool,
    pub sound_enabled: bool,
    pub play_granted: bool,
    pub sender: Option<String>,

    pub status: Status,
    pub fallback_in_use: bool,
    /// Finish requested while the policy decision was outstanding
    pub stop_latched: bool,
    /// Handler's `play` reported audible output that must be stopped
    pub playing: bool,
    /// Admitted by winning preemption (queued ahead of losers)
    pub preempting: bool,
    pub policy: Option<PolicySessionId>,

    /// Type handler state, present between `initialize` and `shutdown`
    pub handler_state: Option<HandlerState>,
}

impl Notification {
    pub fn new(id: NotificationId, request: NotificationRequest) -> Self {
        Self {
            id,
            category: request.category,
            sound_file: request.sound_file,
            fallback_sound_file: request.fallback_sound_file,
            volume: request.volume.min(100),
            vibra_pattern: request.vibra_pattern,
            vibra_enabled: request.vibra_enabled,
            sound_enabled: request.sound_enabled,
            play_granted: false,
            sender: request.sender,
            status: Status::Unknown,
            fallback_in_use: false,
            stop_latched: false,
            playing: false,
            preempting: false,
            policy: None,
            handler_state: None,
        }
    }

    pub fn info(&self) -> NotificationInfo {
        NotificationInfo {
            id: self.id,
            category: self.category,
            status: self.status,
            play_granted: self.play_granted,
            fallback_in_use: self.fallback_in_use,
            sound_file: self
                .sound_file
                .as_ref()
                .map(|p| p.display().to_string()),
            sender: self.sender.clone(),
        }
    }
}

impl fmt::Debug for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notification")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("status", &self.status)
            .field("play_granted", &self.play_granted)
            .field("playing", &self.playing)
            .finish()
    }
}

/// Serializable view of a notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationInfo {
    pub id: NotificationId,
    pub category: Category,
    pub status: Status,
    pub play_granted: bool,
    pub fallback_in_use: bool,
    pub sound_file: Option<String>,
    pub sender: Option<String>,
}
