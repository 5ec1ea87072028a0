//! Notification type handlers
//!
//! One strategy per category, registered once at startup. A handler decides
//! how a notification is rendered (audio session, tone, vibration) once the
//! manager knows whether audio play was granted, and reacts to its session's
//! lifecycle and its own timers.
//!
//! Handlers never call the manager directly. They request `finish`/`error`
//! through [`HandlerContext`]; the manager applies those after the handler
//! call returns.

mod alarm_calendar;
mod alarm_clock;
mod message;
mod ringtone;
mod system;

pub use alarm_calendar::AlarmCalendarHandler;
pub use alarm_clock::AlarmClockHandler;
pub use message::MessageHandler;
pub use ringtone::RingtoneHandler;
pub use system::{CriticalHandler, SystemHandler, SYSTEM_SOUND_ROLE};

use super::{Notification, NotificationId};
use crate::error::{Error, Result};
use crate::playback::{PlaybackEvent, PlaybackSession, SessionConfig};
use crate::runtime::{TimerId, TimerTarget};
use crate::services::{Services, Tone};
use ntsv_common::{Category, PolicyClass};
use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Delay before a tone-only or vibration-only notification finishes
pub const SHORT_FEEDBACK: Duration = Duration::from_millis(3000);

// ============================================================================
// Flags
// ============================================================================

#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct HandlerFlags(u8);

impl HandlerFlags {
    pub const NONE: HandlerFlags = HandlerFlags(0);
    /// Equal priority preempts
    pub const RELATIVE: HandlerFlags = HandlerFlags(1);
    /// Finish when the requesting sender disappears
    pub const TRACKS_SENDER: HandlerFlags = HandlerFlags(2);
    /// Negotiate audio policy even when sound is disabled
    pub const ALWAYS_NEGOTIATE: HandlerFlags = HandlerFlags(4);

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn contains(&self, other: HandlerFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for HandlerFlags {
    type Output = HandlerFlags;

    fn bitor(self, rhs: HandlerFlags) -> HandlerFlags {
        HandlerFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for HandlerFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::RELATIVE) {
            names.push("RELATIVE");
        }
        if self.contains(Self::TRACKS_SENDER) {
            names.push("TRACKS_SENDER");
        }
        if self.contains(Self::ALWAYS_NEGOTIATE) {
            names.push("ALWAYS_NEGOTIATE");
        }
        write!(f, "HandlerFlags({})", names.join(" | "))
    }
}

// ============================================================================
// Handler state and context
// ============================================================================

/// Handler-owned timers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerTimer {
    /// Finish the notification
    Finish,
    /// Next step of a volume ramp
    Escalate,
}

/// Per-notification state owned by its type handler
#[derive(Default)]
pub struct HandlerState {
    pub playback: Option<PlaybackSession>,
    pub timer: Option<TimerId>,
    pub tone: Option<Tone>,
    pub vibra: bool,
    pub escalation_step: u8,
}

/// Request from a handler to the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerAction {
    Finish,
    Error,
}

/// Result of a handler's `play`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayStatus {
    /// Something audible or tactile was started
    Started,
    /// Nothing to do; the manager finishes the notification
    Declined,
}

/// What a handler may touch while handling one notification
pub struct HandlerContext<'a> {
    services: &'a mut Services,
    notification: NotificationId,
    actions: &'a mut Vec<(NotificationId, HandlerAction)>,
}

impl<'a> HandlerContext<'a> {
    pub fn new(
        services: &'a mut Services,
        notification: NotificationId,
        actions: &'a mut Vec<(NotificationId, HandlerAction)>,
    ) -> Self {
        Self {
            services,
            notification,
            actions,
        }
    }

    pub fn services(&mut self) -> &mut Services {
        self.services
    }

    pub fn notification(&self) -> NotificationId {
        self.notification
    }

    /// Ask the manager to finish this notification
    pub fn finish(&mut self) {
        self.actions.push((self.notification, HandlerAction::Finish));
    }

    /// Report a playback failure (fallback protocol)
    pub fn error(&mut self) {
        self.actions.push((self.notification, HandlerAction::Error));
    }

    pub fn new_session(&mut self, config: SessionConfig) -> PlaybackSession {
        let id = self.services.next_session_id();
        PlaybackSession::new(id, self.notification, config)
    }

    pub fn start_tone(&mut self, tone: Tone) {
        self.services.tones.start_tone(tone);
    }

    pub fn stop_tone(&mut self, tone: Tone) {
        self.services.tones.stop_tone(tone);
    }

    pub fn start_vibra(&mut self, pattern: &str) {
        self.services.tones.start_vibra(pattern);
    }

    pub fn stop_vibra(&mut self, pattern: &str) {
        self.services.tones.stop_vibra(pattern);
    }

    pub fn schedule(&mut self, after: Duration, timer: HandlerTimer) -> TimerId {
        self.services.timers.schedule(
            after,
            TimerTarget::Handler {
                notification: self.notification,
                timer,
            },
        )
    }

    pub fn cancel(&mut self, id: TimerId) {
        self.services.timers.cancel(id);
    }
}

// ============================================================================
// Handler trait
// ============================================================================

/// Strategy for one notification category
pub trait NotificationHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Higher is more urgent
    fn priority(&self) -> i32;

    fn flags(&self) -> HandlerFlags;

    fn policy_class(&self) -> PolicyClass;

    /// Whether the vibration pattern starts with the audio
    fn vibrates_on_start(&self) -> bool {
        true
    }

    /// Attach fresh handler state; fails if already attached
    fn initialize(&self, n: &mut Notification) -> Result<()> {
        if n.handler_state.is_some() {
            return Err(Error::Handler(format!(
                "{} handler already initialized for {}",
                self.name(),
                n.category
            )));
        }
        n.handler_state = Some(HandlerState::default());
        Ok(())
    }

    /// Release everything owned and drop the handler state
    fn shutdown(&self, n: &mut Notification, cx: &mut HandlerContext<'_>) {
        release_outputs(n, cx);
        n.handler_state = None;
    }

    /// Render the notification; `n.play_granted` carries the policy outcome
    fn play(&self, n: &mut Notification, cx: &mut HandlerContext<'_>) -> PlayStatus;

    /// Stop everything audible or tactile
    fn stop(&self, n: &mut Notification, cx: &mut HandlerContext<'_>) {
        release_outputs(n, cx);
    }

    fn on_playback(&self, n: &mut Notification, event: PlaybackEvent, cx: &mut HandlerContext<'_>) {
        match event {
            PlaybackEvent::Started => {
                if self.vibrates_on_start() {
                    vibra_start(n, cx);
                }
            }
            PlaybackEvent::Succeeded => cx.finish(),
            PlaybackEvent::Error => cx.error(),
            PlaybackEvent::Stopped => {}
        }
    }

    fn on_timer(&self, _n: &mut Notification, timer: HandlerTimer, cx: &mut HandlerContext<'_>) {
        if timer == HandlerTimer::Finish {
            cx.finish();
        }
    }
}

/// Preemption rule
///
/// The new handler wins over the occupant when it is strictly more urgent,
/// or equally urgent with [`HandlerFlags::RELATIVE`] set. A missing handler
/// on either side never wins.
pub fn preempts(
    new: Option<&dyn NotificationHandler>,
    current: Option<&dyn NotificationHandler>,
) -> bool {
    let Some(new) = new else {
        return false;
    };
    let Some(current) = current else {
        return true;
    };

    if new.flags().contains(HandlerFlags::RELATIVE) {
        new.priority() >= current.priority()
    } else {
        new.priority() > current.priority()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Category → handler table; the first registration for a category wins
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Category, Arc<dyn NotificationHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a handler for every canonical category
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let message: Arc<dyn NotificationHandler> = Arc::new(MessageHandler);

        registry.register(Category::Ringtone, Arc::new(RingtoneHandler));
        registry.register(Category::Clock, Arc::new(AlarmClockHandler));
        registry.register(Category::Calendar, Arc::new(AlarmCalendarHandler));
        for category in [Category::Sms, Category::Email, Category::Chat, Category::Sound] {
            registry.register(category, message.clone());
        }
        registry.register(Category::System, Arc::new(SystemHandler));
        registry.register(Category::Critical, Arc::new(CriticalHandler));
        registry
    }

    /// Returns false (and keeps the existing handler) if `category` is taken
    pub fn register(&mut self, category: Category, handler: Arc<dyn NotificationHandler>) -> bool {
        if self.handlers.contains_key(&category) {
            debug!(
                "Handler for {} already registered, ignoring {}",
                category,
                handler.name()
            );
            return false;
        }
        debug!("Registered {} handler for {}", handler.name(), category);
        self.handlers.insert(category, handler);
        true
    }

    pub fn get(&self, category: Category) -> Option<Arc<dyn NotificationHandler>> {
        self.handlers.get(&category).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Start and keep a playback session for `n`
pub(crate) fn start_session(
    n: &mut Notification,
    cx: &mut HandlerContext<'_>,
    config: SessionConfig,
) -> PlayStatus {
    let mut session = cx.new_session(config);
    session.play(cx.services());
    if let Some(state) = n.handler_state.as_mut() {
        state.playback = Some(session);
    }
    PlayStatus::Started
}

/// Session config for `n`'s current sound file and volume
pub(crate) fn session_config(n: &Notification) -> SessionConfig {
    SessionConfig::new(n.sound_file.clone(), n.volume)
}

pub(crate) fn start_tone(n: &mut Notification, cx: &mut HandlerContext<'_>, tone: Tone) {
    cx.start_tone(tone);
    if let Some(state) = n.handler_state.as_mut() {
        state.tone = Some(tone);
    }
}

pub(crate) fn vibra_start(n: &mut Notification, cx: &mut HandlerContext<'_>) {
    if !n.vibra_enabled {
        return;
    }
    let Some(pattern) = n.vibra_pattern.as_deref() else {
        return;
    };
    cx.start_vibra(pattern);
    if let Some(state) = n.handler_state.as_mut() {
        state.vibra = true;
    }
}

/// Arm the handler's single timer, replacing any pending one
pub(crate) fn schedule(
    n: &mut Notification,
    cx: &mut HandlerContext<'_>,
    after: Duration,
    timer: HandlerTimer,
) {
    let Some(state) = n.handler_state.as_mut() else {
        return;
    };
    if let Some(previous) = state.timer.take() {
        cx.cancel(previous);
    }
    state.timer = Some(cx.schedule(after, timer));
}

/// Stop session, tone, vibration and pending timer
pub(crate) fn release_outputs(n: &mut Notification, cx: &mut HandlerContext<'_>) {
    let Some(state) = n.handler_state.as_mut() else {
        return;
    };

    if let Some(timer) = state.timer.take() {
        cx.cancel(timer);
    }
    if let Some(mut session) = state.playback.take() {
        session.stop(cx.services());
    }
    if let Some(tone) = state.tone.take() {
        cx.stop_tone(tone);
    }
    if std::mem::take(&mut state.vibra) {
        if let Some(pattern) = n.vibra_pattern.as_deref() {
            cx.stop_vibra(pattern);
        }
    }
    state.escalation_step = 0;
}
