//! Single-task daemon loop
//!
//! **Architecture:**
//! - One task owns the manager, the facade and every collaborator
//! - Everything else talks to it through [`DaemonEvent`]s on one channel:
//!   control requests, policy traffic, playback and stream reports, deferred
//!   finishes and queue hand-over
//! - Timers live in a [`TimerQueue`]; the loop sleeps until the earliest
//!   deadline and dispatches due targets as `DaemonEvent::Timer`
//!
//! Nothing in here is reentrant: an event handler that needs follow-up work
//! posts another event.

pub mod timer;

pub use timer::{TimerId, TimerQueue};

use crate::error::{Error, Result};
use crate::facade::{Facade, ProfileChange, ProfileStore, ProfileUpdate, Transcoder};
use crate::notification::handlers::HandlerTimer;
use crate::notification::{
    ContentionMode, HandlerRegistry, ManagerSnapshot, NotificationId, NotificationManager,
};
use crate::playback::{AudioSink, PlaybackEvent, SessionId, SessionTimer, StreamEvent, StreamKey};
use crate::policy::{ClassSettings, PolicyArbitrator, PolicyAuthority, PolicyEvent};
use crate::services::{SenderTracker, Services, ToneService};
use ntsv_common::events::EventBus;
use ntsv_common::{Category, PolicyClass, ResolvedHints};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

// ============================================================================
// Events
// ============================================================================

/// Timer payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTarget {
    /// Type handler timer (short-feedback finish, volume escalation)
    Handler {
        notification: NotificationId,
        timer: HandlerTimer,
    },
    /// Playback session timer (min/max timeout, loop gap)
    Session {
        notification: NotificationId,
        session: SessionId,
        timer: SessionTimer,
    },
    /// Latest point at which tone decoding is synchronized
    StartupSync,
}

/// Requests that expect an answer
#[derive(Debug)]
pub enum ControlCommand {
    Play {
        hints: ResolvedHints,
        sender: Option<String>,
        reply: oneshot::Sender<Result<NotificationId>>,
    },
    Stop {
        id: NotificationId,
        reply: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<ManagerSnapshot>,
    },
    UpdateProfile {
        update: ProfileUpdate,
        reply: oneshot::Sender<Result<Vec<ProfileChange>>>,
    },
}

/// Everything the daemon loop reacts to
#[derive(Debug)]
pub enum DaemonEvent {
    Control(ControlCommand),
    /// Slot may be free: start the head of the queue
    StartNext,
    /// Finish posted from inside a dispatch
    FinishDeferred(NotificationId),
    Policy(PolicyEvent),
    Playback {
        notification: NotificationId,
        session: SessionId,
        event: PlaybackEvent,
    },
    Stream {
        key: StreamKey,
        event: StreamEvent,
    },
    Timer {
        id: TimerId,
        target: TimerTarget,
    },
    /// Audio sink finished connecting
    AudioReady,
    SenderVanished(String),
    /// Foreground application window (`None` when no application is shown)
    ForegroundChanged(Option<u64>),
    Profile(ProfileChange),
    /// Device startup finished; tone decoding may begin
    StartupDone,
    Decoded {
        category: Category,
        source: PathBuf,
        target: PathBuf,
    },
    DecodeFailed {
        category: Category,
        source: PathBuf,
        reason: String,
    },
    Shutdown,
}

/// Posting side of the daemon channel
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<DaemonEvent>,
}

impl EventSender {
    /// Queue an event; dropped silently once the loop has exited
    pub fn post(&self, event: DaemonEvent) {
        if let Err(e) = self.tx.send(event) {
            trace!("Daemon loop gone, dropping {:?}", e.0);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create the daemon channel
pub fn channel() -> (EventSender, mpsc::UnboundedReceiver<DaemonEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}

// ============================================================================
// Handle
// ============================================================================

/// Cloneable front end used by the HTTP surface
#[derive(Debug, Clone)]
pub struct DaemonHandle {
    events: EventSender,
}

impl DaemonHandle {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }

    pub fn post(&self, event: DaemonEvent) {
        self.events.post(event);
    }

    pub async fn play(&self, hints: ResolvedHints, sender: Option<String>) -> Result<NotificationId> {
        self.request(|reply| ControlCommand::Play { hints, sender, reply })
            .await?
    }

    pub async fn stop(&self, id: NotificationId) -> Result<()> {
        self.request(|reply| ControlCommand::Stop { id, reply }).await?
    }

    pub async fn snapshot(&self) -> Result<ManagerSnapshot> {
        self.request(|reply| ControlCommand::Snapshot { reply }).await
    }

    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<Vec<ProfileChange>> {
        self.request(|reply| ControlCommand::UpdateProfile { update, reply })
            .await?
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ControlCommand,
    ) -> Result<T> {
        if self.events.is_closed() {
            return Err(Error::Internal("daemon loop is not running".to_string()));
        }
        let (tx, rx) = oneshot::channel();
        self.events.post(DaemonEvent::Control(build(tx)));
        rx.await
            .map_err(|_| Error::Internal("daemon loop dropped the request".to_string()))
    }
}

// ============================================================================
// Daemon
// ============================================================================

/// Collaborators the daemon is assembled from
pub struct DaemonParts {
    pub sink: Box<dyn AudioSink>,
    pub tones: Box<dyn ToneService>,
    pub tracker: Box<dyn SenderTracker>,
    pub authority: Box<dyn PolicyAuthority>,
    pub profile: Box<dyn ProfileStore>,
    pub transcoder: Box<dyn Transcoder>,
}

/// Arbitration settings
#[derive(Debug, Clone)]
pub struct DaemonSettings {
    pub contention: ContentionMode,
    pub policy: HashMap<PolicyClass, ClassSettings>,
    pub system_sounds_dir: PathBuf,
    pub startup_sync_timeout: Duration,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            contention: ContentionMode::Reject,
            policy: HashMap::new(),
            system_sounds_dir: PathBuf::from("/usr/share/sounds"),
            startup_sync_timeout: Duration::from_secs(90),
        }
    }
}

pub struct Daemon {
    manager: NotificationManager,
    facade: Facade,
    services: Services,
    events: mpsc::UnboundedReceiver<DaemonEvent>,
}

impl Daemon {
    /// Assemble the daemon
    ///
    /// `events`/`rx` must come from the same [`channel()`] the collaborators
    /// in `parts` post to. Initialization order: profile, policy, manager.
    pub fn new(
        parts: DaemonParts,
        settings: DaemonSettings,
        bus: EventBus,
        events: EventSender,
        rx: mpsc::UnboundedReceiver<DaemonEvent>,
    ) -> Self {
        let facade = Facade::new(parts.profile, parts.transcoder, settings.system_sounds_dir);
        let arbitrator = PolicyArbitrator::new(parts.authority, &settings.policy);
        let manager = NotificationManager::new(
            HandlerRegistry::with_defaults(),
            arbitrator,
            settings.contention,
        );
        let mut services = Services::new(parts.sink, parts.tones, parts.tracker, bus, events);
        services
            .timers
            .schedule(settings.startup_sync_timeout, TimerTarget::StartupSync);

        info!(
            "Daemon assembled (contention: {:?}, startup sync within {:?})",
            settings.contention, settings.startup_sync_timeout
        );

        Self {
            manager,
            facade,
            services,
            events: rx,
        }
    }

    pub fn handle(&self) -> DaemonHandle {
        DaemonHandle::new(self.services.sender().clone())
    }

    pub fn manager(&self) -> &NotificationManager {
        &self.manager
    }

    pub fn facade(&self) -> &Facade {
        &self.facade
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn snapshot(&self) -> ManagerSnapshot {
        self.manager.snapshot()
    }

    /// Resolve and admit a notification directly (bypassing the channel)
    pub fn play(&mut self, hints: ResolvedHints, sender: Option<String>) -> Result<NotificationId> {
        self.facade
            .play(hints, sender, &mut self.manager, &mut self.services)
    }

    pub fn stop(&mut self, id: NotificationId) -> Result<()> {
        self.manager.stop(id, &mut self.services)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.services.timers.next_deadline()
    }

    /// Dispatch every queued event and every timer already due
    pub fn run_until_idle(&mut self) {
        loop {
            if let Ok(event) = self.events.try_recv() {
                self.dispatch(event);
                continue;
            }
            if let Some((id, target)) = self.services.timers.pop_due(Instant::now()) {
                self.dispatch(DaemonEvent::Timer { id, target });
                continue;
            }
            break;
        }
    }

    /// Run until `Shutdown` arrives or every sender is gone
    pub async fn run(mut self) {
        info!("Daemon loop running");
        loop {
            let deadline = self.services.timers.next_deadline();
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(DaemonEvent::Shutdown) | None => break,
                    Some(event) => self.dispatch(event),
                },
                _ = wait_until(deadline) => {
                    while let Some((id, target)) = self.services.timers.pop_due(Instant::now()) {
                        self.dispatch(DaemonEvent::Timer { id, target });
                    }
                }
            }
        }

        info!("Daemon loop stopping, finishing every notification");
        self.manager.shutdown(&mut self.services);
        self.run_until_idle();
        if self.manager.is_active() {
            warn!("Exiting with notifications still awaiting policy release");
        }
    }

    pub fn dispatch(&mut self, event: DaemonEvent) {
        let svc = &mut self.services;
        match event {
            DaemonEvent::Control(command) => self.control(command),
            DaemonEvent::StartNext => self.manager.start_next(svc),
            DaemonEvent::FinishDeferred(id) => self.manager.finish_deferred(id, svc),
            DaemonEvent::Policy(event) => self.manager.on_policy(event, svc),
            DaemonEvent::Playback {
                notification,
                session,
                event,
            } => self.manager.on_playback(notification, session, event, svc),
            DaemonEvent::Stream { key, event } => self.manager.on_stream(key, event, svc),
            DaemonEvent::Timer { id, target } => match target {
                TimerTarget::Handler {
                    notification,
                    timer,
                } => self.manager.on_handler_timer(id, notification, timer, svc),
                TimerTarget::Session {
                    notification,
                    session,
                    timer,
                } => self
                    .manager
                    .on_session_timer(id, notification, session, timer, svc),
                TimerTarget::StartupSync => {
                    debug!("Startup sync timeout reached");
                    self.facade.startup_sync();
                }
            },
            DaemonEvent::AudioReady => {
                info!("Audio sink ready");
                self.facade.apply_system_volume(svc);
                self.manager.on_audio_ready(svc);
            }
            DaemonEvent::SenderVanished(sender) => {
                if svc.tracker.is_watched(&sender) {
                    info!("Sender {} vanished", sender);
                    self.manager.finish_by_sender(&sender, svc);
                } else {
                    trace!("Ignoring vanish of unwatched sender {}", sender);
                }
            }
            DaemonEvent::ForegroundChanged(window) => {
                self.facade.on_foreground(window, &mut self.manager, svc)
            }
            DaemonEvent::Profile(change) => self.facade.on_profile_change(change, svc),
            DaemonEvent::StartupDone => self.facade.startup_sync(),
            DaemonEvent::Decoded {
                category,
                source,
                target,
            } => self.facade.on_decoded(category, &source, &target),
            DaemonEvent::DecodeFailed {
                category,
                source,
                reason,
            } => self.facade.on_decode_failed(category, &source, &reason),
            DaemonEvent::Shutdown => self.manager.shutdown(svc),
        }
    }

    fn control(&mut self, command: ControlCommand) {
        let svc = &mut self.services;
        // Send errors mean the requester went away; nothing to do
        match command {
            ControlCommand::Play {
                hints,
                sender,
                reply,
            } => {
                let result = self.facade.play(hints, sender, &mut self.manager, svc);
                let _ = reply.send(result);
            }
            ControlCommand::Stop { id, reply } => {
                let _ = reply.send(self.manager.stop(id, svc));
            }
            ControlCommand::Snapshot { reply } => {
                let _ = reply.send(self.manager.snapshot());
            }
            ControlCommand::UpdateProfile { update, reply } => {
                let _ = reply.send(self.facade.update_profile(update, svc));
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
