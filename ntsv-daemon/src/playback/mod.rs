//! Audio playback for notifications
//!
//! **Architecture:**
//! - `PlaybackSession`: one sound's lifecycle (pending → streaming → loop/pad → done)
//! - `AudioSink`: the audio service a session opens streams on
//!
//! Sessions never call back into their owner. Lifecycle events are posted to
//! the daemon loop and routed to the owning type handler by session id, so a
//! stale event from a torn-down session is simply dropped.

pub mod session;
pub mod sink;

pub use session::{PlaybackSession, SessionConfig, SessionTimer};
pub use sink::{probe_duration, AudioSink, AudioStream, PacedSink, StreamRequest};

use crate::notification::NotificationId;
use std::fmt;

/// Identity of one playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Addresses a stream back to the session that opened it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub notification: NotificationId,
    pub session: SessionId,
}

/// Lifecycle events emitted by a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// First sample rendered (once per `play()`)
    Started,
    /// Sound completed, padding and looping included
    Succeeded,
    /// Torn down by `stop()`
    Stopped,
    /// Stream could not be opened or failed while rendering
    Error,
}

/// Events reported by the audio sink for an open stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Every sample of the source has been played
    Drained,
    /// Stream entered a failed or terminated state
    Failed(String),
}
