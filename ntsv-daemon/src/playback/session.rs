//! Playback session state machine
//!
//! **Completion policy:**
//! - Stream drained before `min_timeout`: `succeeded` is delayed until the
//!   floor has elapsed (skipped when less than 50 ms remain)
//! - `repeat`: restart after a fixed 1 s gap instead of succeeding
//! - `max_timeout` elapsed: `succeeded` is forced, the stream is torn down
//!
//! `started` is emitted once per `play()`, not once per loop.

use super::{PlaybackEvent, SessionId, StreamEvent, StreamKey, StreamRequest};
use crate::notification::NotificationId;
use crate::playback::AudioStream;
use crate::runtime::{DaemonEvent, TimerId, TimerTarget};
use crate::services::Services;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Gap between two loops of a repeating sound
pub const REPEAT_GAP: Duration = Duration::from_millis(1000);

/// Remaining min-timeout below which padding is skipped
pub const MIN_TIMEOUT_SLACK: Duration = Duration::from_millis(50);

/// Parameters of one playback session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub file: Option<PathBuf>,
    /// Target volume, 0-100
    pub volume: u8,
    pub repeat: bool,
    pub min_timeout: Option<Duration>,
    pub max_timeout: Option<Duration>,
    /// Event identifier attached to the stream (for the audio service's routing)
    pub event_id: Option<String>,
    /// Stream role; role volumes set on the sink scale streams carrying it
    pub role: Option<String>,
}

impl SessionConfig {
    pub fn new(file: Option<PathBuf>, volume: u8) -> Self {
        Self {
            file,
            volume: volume.min(100),
            repeat: false,
            min_timeout: None,
            max_timeout: None,
            event_id: None,
            role: None,
        }
    }

    pub fn repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn min_timeout_ms(mut self, ms: u64) -> Self {
        self.min_timeout = Some(Duration::from_millis(ms));
        self
    }

    pub fn max_timeout_ms(mut self, ms: u64) -> Self {
        self.max_timeout = Some(Duration::from_millis(ms));
        self
    }

    pub fn event_id(mut self, event_id: &str) -> Self {
        self.event_id = Some(event_id.to_string());
        self
    }

    pub fn role(mut self, role: &str) -> Self {
        self.role = Some(role.to_string());
        self
    }
}

/// Session-owned timers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTimer {
    /// Delayed `succeeded` after a short sound
    MinTimeout,
    /// Next loop of a repeating sound
    Repeat,
    /// Hard upper bound on the session
    MaxTimeout,
}

#[derive(Debug, Default)]
struct PendingTimers {
    min_timeout: Option<TimerId>,
    repeat: Option<TimerId>,
    max_timeout: Option<TimerId>,
}

impl PendingTimers {
    fn slot(&mut self, timer: SessionTimer) -> &mut Option<TimerId> {
        match timer {
            SessionTimer::MinTimeout => &mut self.min_timeout,
            SessionTimer::Repeat => &mut self.repeat,
            SessionTimer::MaxTimeout => &mut self.max_timeout,
        }
    }
}

/// One sound's lifecycle on the audio sink
pub struct PlaybackSession {
    id: SessionId,
    notification: NotificationId,
    config: SessionConfig,
    stream: Option<Box<dyn AudioStream>>,
    started_at: Option<Instant>,
    /// `play()` called before the sink was ready
    pending: bool,
    /// `started` still owed for the current `play()`
    announce_start: bool,
    stopped: bool,
    timers: PendingTimers,
}

impl PlaybackSession {
    pub fn new(id: SessionId, notification: NotificationId, config: SessionConfig) -> Self {
        Self {
            id,
            notification,
            config,
            stream: None,
            started_at: None,
            pending: false,
            announce_start: false,
            stopped: false,
            timers: PendingTimers::default(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    fn key(&self) -> StreamKey {
        StreamKey {
            notification: self.notification,
            session: self.id,
        }
    }

    /// Begin rendering, or wait for the sink to become ready
    pub fn play(&mut self, svc: &mut Services) {
        if self.stream.is_some() || self.pending {
            debug!("{} already playing", self.id);
            return;
        }

        self.stopped = false;
        self.announce_start = true;

        if let Some(max) = self.config.max_timeout {
            self.arm(svc, SessionTimer::MaxTimeout, max);
        }

        if svc.sink.is_ready() {
            self.play_real(svc);
        } else {
            debug!("{} waiting for audio sink", self.id);
            self.pending = true;
        }
    }

    /// Sink became ready
    pub fn audio_ready(&mut self, svc: &mut Services) {
        if self.pending && !self.stopped {
            self.pending = false;
            self.play_real(svc);
        }
    }

    fn play_real(&mut self, svc: &mut Services) {
        let Some(file) = self.config.file.clone() else {
            self.fail(svc, "no sound file");
            return;
        };

        let request = StreamRequest {
            key: self.key(),
            file,
            volume: self.config.volume,
            event_id: self.config.event_id.clone(),
            role: self.config.role.clone(),
        };

        match svc.sink.open(request) {
            Ok(stream) => {
                debug!(
                    "{} streaming (volume {}, repeat {})",
                    self.id, self.config.volume, self.config.repeat
                );
                self.stream = Some(stream);
                self.started_at = Some(Instant::now());
                if self.announce_start {
                    self.announce_start = false;
                    self.emit(svc, PlaybackEvent::Started);
                }
            }
            Err(e) => {
                warn!("{} failed to open stream: {}", self.id, e);
                self.fail(svc, &e.to_string());
            }
        }
    }

    /// Event reported by the sink for this session's stream
    pub fn on_stream(&mut self, event: StreamEvent, svc: &mut Services) {
        match event {
            StreamEvent::Drained => {
                self.close_stream();
                self.cancel(svc, SessionTimer::MaxTimeout);

                if self.stopped {
                    return;
                }

                let elapsed = self
                    .started_at
                    .map(|t| t.elapsed())
                    .unwrap_or_default();

                if let Some(min) = self.config.min_timeout {
                    let remaining = min.saturating_sub(elapsed);
                    if remaining > MIN_TIMEOUT_SLACK {
                        debug!("{} padding {:?} to min timeout", self.id, remaining);
                        self.arm(svc, SessionTimer::MinTimeout, remaining);
                        return;
                    }
                }

                self.complete(svc);
            }
            StreamEvent::Failed(reason) => {
                warn!("{} stream failed: {}", self.id, reason);
                self.fail(svc, &reason);
            }
        }
    }

    /// Session timer fired; ignored unless `timer_id` is still armed
    pub fn on_timer(&mut self, timer_id: TimerId, timer: SessionTimer, svc: &mut Services) {
        let slot = self.timers.slot(timer);
        if *slot != Some(timer_id) {
            return;
        }
        *slot = None;

        if self.stopped {
            return;
        }

        match timer {
            SessionTimer::MinTimeout => self.complete(svc),
            SessionTimer::Repeat => {
                debug!("{} looping", self.id);
                self.play_real(svc);
            }
            SessionTimer::MaxTimeout => {
                debug!("{} reached max timeout", self.id);
                self.cleanup(svc);
                self.emit(svc, PlaybackEvent::Succeeded);
            }
        }
    }

    /// Tear down and emit `stopped`; later calls are no-ops
    pub fn stop(&mut self, svc: &mut Services) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.pending = false;
        self.cleanup(svc);
        self.emit(svc, PlaybackEvent::Stopped);
    }

    pub fn set_volume(&mut self, volume: u8) {
        let volume = volume.min(100);
        self.config.volume = volume;
        if let Some(stream) = self.stream.as_mut() {
            stream.set_volume(volume);
        }
    }

    pub fn volume(&self) -> u8 {
        self.config.volume
    }

    fn complete(&mut self, svc: &mut Services) {
        if self.config.repeat {
            self.arm(svc, SessionTimer::Repeat, REPEAT_GAP);
        } else {
            self.cancel(svc, SessionTimer::MaxTimeout);
            self.emit(svc, PlaybackEvent::Succeeded);
        }
    }

    fn fail(&mut self, svc: &mut Services, reason: &str) {
        debug!("{} error: {}", self.id, reason);
        self.cleanup(svc);
        self.emit(svc, PlaybackEvent::Error);
    }

    fn cleanup(&mut self, svc: &mut Services) {
        self.close_stream();
        for timer in [
            SessionTimer::MinTimeout,
            SessionTimer::Repeat,
            SessionTimer::MaxTimeout,
        ] {
            self.cancel(svc, timer);
        }
    }

    fn close_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }
    }

    fn arm(&mut self, svc: &mut Services, timer: SessionTimer, after: Duration) {
        self.cancel(svc, timer);
        let id = svc.timers.schedule(
            after,
            TimerTarget::Session {
                notification: self.notification,
                session: self.id,
                timer,
            },
        );
        *self.timers.slot(timer) = Some(id);
    }

    fn cancel(&mut self, svc: &mut Services, timer: SessionTimer) {
        if let Some(id) = self.timers.slot(timer).take() {
            svc.timers.cancel(id);
        }
    }

    fn emit(&self, svc: &Services, event: PlaybackEvent) {
        svc.post(DaemonEvent::Playback {
            notification: self.notification,
            session: self.id,
            event,
        });
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.close_stream();
    }
}
