//! Process-scoped collaborator context
//!
//! `Services` bundles everything a type handler or playback session may
//! touch: the audio sink, the tone/vibration service, the sender liveness
//! tracker, the loop's timer queue and event channel. It is constructed once
//! and passed by `&mut` down every dispatch; nothing here is global.

use crate::playback::{AudioSink, SessionId};
use crate::runtime::{DaemonEvent, EventSender, TimerQueue, TimerTarget};
use ntsv_common::events::{EventBus, NsvEvent};
use std::fmt;
use tracing::{debug, info};

// ============================================================================
// Tone / vibration service
// ============================================================================

/// Tones the tone generator can play
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tone {
    /// Short acknowledgement beep when audio playback is denied
    Acknowledge,
    /// Repeating "call waiting" tone for a denied ringtone
    Waiting,
}

impl Tone {
    /// Tone generator code
    pub fn code(&self) -> u32 {
        match self {
            Tone::Acknowledge => 256,
            Tone::Waiting => 79,
        }
    }

    /// Waiting tones are event tones (repeat until stopped); others are notification tones
    pub fn is_event_tone(&self) -> bool {
        matches!(self, Tone::Waiting)
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tone {}", self.code())
    }
}

/// Fire-and-forget tone generator and vibration motor
pub trait ToneService: Send {
    fn start_tone(&mut self, tone: Tone);
    fn stop_tone(&mut self, tone: Tone);
    fn start_vibra(&mut self, pattern: &str);
    fn stop_vibra(&mut self, pattern: &str);
}

/// Production tone service: requests are emitted as structured log records
#[derive(Debug, Default)]
pub struct LoggingToneService;

impl ToneService for LoggingToneService {
    fn start_tone(&mut self, tone: Tone) {
        info!(code = tone.code(), event_tone = tone.is_event_tone(), "Tone start");
    }

    fn stop_tone(&mut self, tone: Tone) {
        info!(code = tone.code(), event_tone = tone.is_event_tone(), "Tone stop");
    }

    fn start_vibra(&mut self, pattern: &str) {
        info!(pattern, "Vibra start");
    }

    fn stop_vibra(&mut self, pattern: &str) {
        info!(pattern, "Vibra stop");
    }
}

// ============================================================================
// Sender liveness
// ============================================================================

/// Interest registration for "sender disappeared" notifications
pub trait SenderTracker: Send {
    fn watch(&mut self, sender: &str);
    fn unwatch(&mut self, sender: &str);

    /// Whether a vanish report for `sender` should reach the manager
    fn is_watched(&self, sender: &str) -> bool;
}

/// Reference-counted watch set; vanish reports arrive on the control surface
#[derive(Debug, Default)]
pub struct WatchedSenders {
    watched: Vec<String>,
}

impl WatchedSenders {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SenderTracker for WatchedSenders {
    fn watch(&mut self, sender: &str) {
        debug!("Watching sender {}", sender);
        self.watched.push(sender.to_string());
    }

    fn unwatch(&mut self, sender: &str) {
        if let Some(pos) = self.watched.iter().position(|s| s == sender) {
            self.watched.swap_remove(pos);
            debug!("Stopped watching sender {}", sender);
        }
    }

    fn is_watched(&self, sender: &str) -> bool {
        self.watched.iter().any(|s| s == sender)
    }
}

// ============================================================================
// Services
// ============================================================================

pub struct Services {
    pub sink: Box<dyn AudioSink>,
    pub tones: Box<dyn ToneService>,
    pub tracker: Box<dyn SenderTracker>,
    pub timers: TimerQueue<TimerTarget>,
    pub bus: EventBus,
    events: EventSender,
    next_session: u64,
}

impl Services {
    pub fn new(
        sink: Box<dyn AudioSink>,
        tones: Box<dyn ToneService>,
        tracker: Box<dyn SenderTracker>,
        bus: EventBus,
        events: EventSender,
    ) -> Self {
        Self {
            sink,
            tones,
            tracker,
            timers: TimerQueue::new(),
            bus,
            events,
            next_session: 1,
        }
    }

    pub fn next_session_id(&mut self) -> SessionId {
        let id = SessionId(self.next_session);
        self.next_session += 1;
        id
    }

    /// Queue an event for a later loop iteration
    pub fn post(&self, event: DaemonEvent) {
        self.events.post(event);
    }

    pub fn sender(&self) -> &EventSender {
        &self.events
    }

    /// Publish a lifecycle event to subscribers
    pub fn publish(&self, event: NsvEvent) {
        self.bus.emit_lossy(event);
    }
}
