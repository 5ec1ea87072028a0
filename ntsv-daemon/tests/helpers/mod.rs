//! Test Helper Utilities
//!
//! Shared harness for driving a [`Daemon`] synchronously: every collaborator
//! is a recording fake, events are dispatched with `run_until_idle()` and
//! time moves only through [`Harness::advance`] on a paused tokio clock.

#![allow(dead_code)]

pub mod fakes;

pub use fakes::*;

use ntsv_common::events::{EventBus, NsvEvent};
use ntsv_common::{Category, PolicyClass, PolicyState, ResolvedHints};
use ntsv_daemon::facade::{ProfileChange, ProfileSettings, ProfileUpdate};
use ntsv_daemon::notification::{ContentionMode, NotificationId, Status};
use ntsv_daemon::playback::StreamEvent;
use ntsv_daemon::policy::{ClassSettings, LocalAuthority, PolicyAuthority, PolicyEvent};
use ntsv_daemon::runtime::{
    self, ControlCommand, Daemon, DaemonEvent, DaemonHandle, DaemonParts, DaemonSettings,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Write a mono 16-bit WAV of `frames` samples at 8 kHz
pub fn write_wav(path: &Path, frames: u32) {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).unwrap();
    }
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..frames {
        writer.write_sample(((i % 32) as i16 - 16) * 500).unwrap();
    }
    writer.finalize().unwrap();
}

/// Hints as the control surface would resolve them
pub fn hints(category: Category, sound_file: Option<&Path>) -> ResolvedHints {
    ResolvedHints {
        category,
        sound_file: sound_file.map(Path::to_path_buf),
        volume: 100,
        vibra_pattern: None,
        override_profile: false,
    }
}

// ============================================================================
// Builder
// ============================================================================

enum AuthorityKind {
    /// In-process authority with per-class grants
    Local(HashMap<PolicyClass, bool>),
    Manual,
}

pub struct HarnessBuilder {
    settings: DaemonSettings,
    profile: ProfileSettings,
    authority: AuthorityKind,
    sink_ready: bool,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            settings: DaemonSettings::default(),
            profile: ProfileSettings::default(),
            authority: AuthorityKind::Local(HashMap::new()),
            sink_ready: true,
        }
    }

    pub fn contention(mut self, mode: ContentionMode) -> Self {
        self.settings.contention = mode;
        self
    }

    pub fn class(mut self, class: PolicyClass, settings: ClassSettings) -> Self {
        self.settings.policy.insert(class, settings);
        self
    }

    /// The in-process authority denies `class`
    pub fn deny(mut self, class: PolicyClass) -> Self {
        if let AuthorityKind::Local(grants) = &mut self.authority {
            grants.insert(class, false);
        }
        self
    }

    /// Policy replies are sent by the test
    pub fn manual_policy(mut self) -> Self {
        self.authority = AuthorityKind::Manual;
        self
    }

    pub fn profile(mut self, profile: ProfileSettings) -> Self {
        self.profile = profile;
        self
    }

    pub fn sink_ready(mut self, ready: bool) -> Self {
        self.sink_ready = ready;
        self
    }

    pub fn build(mut self) -> Harness {
        let dir = TempDir::new().unwrap();
        let system_sounds = dir.path().join("system");
        let decoded = dir.path().join("decoded");
        std::fs::create_dir_all(&system_sounds).unwrap();
        std::fs::create_dir_all(&decoded).unwrap();
        self.settings.system_sounds_dir = system_sounds.clone();

        let (events, rx) = runtime::channel();
        let (sink, sink_log) = RecordingSink::new(self.sink_ready);
        let (tones, tone_log) = RecordingTones::new();
        let (tracker, watched) = RecordingTracker::new();
        let (transcoder, decodes) = FakeTranscoder::new(&decoded);
        let (authority, policy): (Box<dyn PolicyAuthority>, SharedPolicyLog) = match self.authority
        {
            AuthorityKind::Local(grants) => (
                Box::new(LocalAuthority::new(events.clone(), grants)) as Box<dyn PolicyAuthority>,
                SharedPolicyLog::default(),
            ),
            AuthorityKind::Manual => {
                let (authority, log) = ManualAuthority::new();
                (Box::new(authority) as Box<dyn PolicyAuthority>, log)
            }
        };

        let bus = EventBus::new(1024);
        let lifecycle = bus.subscribe();
        let daemon = Daemon::new(
            DaemonParts {
                sink: Box::new(sink),
                tones: Box::new(tones),
                tracker: Box::new(tracker),
                authority,
                profile: Box::new(self.profile),
                transcoder: Box::new(transcoder),
            },
            self.settings,
            bus,
            events,
            rx,
        );

        Harness {
            daemon,
            sink: sink_log,
            tones: tone_log,
            watched,
            decodes,
            policy,
            lifecycle,
            system_sounds,
            decoded,
            _dir: dir,
        }
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub daemon: Daemon,
    pub sink: SharedSinkLog,
    pub tones: SharedToneLog,
    pub watched: SharedWatchLog,
    pub decodes: SharedDecodeLog,
    /// Requests seen by a manual authority (empty for the local one)
    pub policy: SharedPolicyLog,
    pub lifecycle: broadcast::Receiver<NsvEvent>,
    pub system_sounds: PathBuf,
    pub decoded: PathBuf,
    _dir: TempDir,
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::new()
    }

    /// Daemon with every class at its defaults and every request granted
    pub fn new() -> Self {
        HarnessBuilder::new().build()
    }

    /// A valid WAV under the system sounds directory
    pub fn system_sound(&self, name: &str) -> PathBuf {
        let path = self.system_sounds.join(name);
        if !path.exists() {
            write_wav(&path, 800);
        }
        path
    }

    /// Play and let every immediate consequence settle
    pub fn play(&mut self, category: Category, file: Option<&Path>) -> Option<NotificationId> {
        let id = self.daemon.play(hints(category, file), None).ok();
        self.daemon.run_until_idle();
        id
    }

    pub fn play_from(
        &mut self,
        category: Category,
        file: Option<&Path>,
        sender: &str,
    ) -> Option<NotificationId> {
        let id = self
            .daemon
            .play(hints(category, file), Some(sender.to_string()))
            .ok();
        self.daemon.run_until_idle();
        id
    }

    pub fn stop(&mut self, id: NotificationId) -> ntsv_daemon::Result<()> {
        let result = self.daemon.stop(id);
        self.daemon.run_until_idle();
        result
    }

    pub fn post(&mut self, event: DaemonEvent) {
        self.daemon.dispatch(event);
        self.daemon.run_until_idle();
    }

    /// Report the most recently opened stream as drained
    pub fn drain_last(&mut self) {
        let key = self.sink.lock().unwrap().last_key().expect("no stream opened");
        self.post(DaemonEvent::Stream {
            key,
            event: StreamEvent::Drained,
        });
    }

    /// Apply a profile update through the control path
    pub fn update_profile(&mut self, update: ProfileUpdate) -> ntsv_daemon::Result<Vec<ProfileChange>> {
        let (reply, mut rx) = oneshot::channel();
        self.post(DaemonEvent::Control(ControlCommand::UpdateProfile { update, reply }));
        rx.try_recv().expect("profile update not answered")
    }

    /// Answer the oldest unanswered manual policy request
    pub fn reply(&mut self, state: PolicyState) {
        let request = {
            let mut log = self.policy.lock().unwrap();
            assert!(!log.is_empty(), "no outstanding policy request");
            log.remove(0)
        };
        self.post(DaemonEvent::Policy(PolicyEvent::Reply {
            class: request.class,
            ticket: request.ticket,
            state,
        }));
    }

    /// Move the paused clock forward, firing every timer on the way in order
    pub async fn advance(&mut self, by: Duration) {
        let target = Instant::now() + by;
        self.daemon.run_until_idle();
        while let Some(deadline) = self.daemon.next_deadline().filter(|d| *d <= target) {
            let now = Instant::now();
            if deadline > now {
                tokio::time::advance(deadline - now).await;
            }
            self.daemon.run_until_idle();
        }
        let now = Instant::now();
        if target > now {
            tokio::time::advance(target - now).await;
        }
        self.daemon.run_until_idle();
    }

    pub fn current_id(&self) -> Option<NotificationId> {
        self.daemon.manager().current().map(|n| n.id)
    }

    pub fn current_status(&self) -> Option<Status> {
        self.daemon.manager().current().map(|n| n.status)
    }

    pub fn tone_calls(&self) -> Vec<ToneCall> {
        self.tones.lock().unwrap().clone()
    }

    /// Lifecycle events published since the last call
    pub fn lifecycle_events(&mut self) -> Vec<NsvEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.lifecycle.try_recv() {
            events.push(event);
        }
        events
    }

    /// Ids of `NotificationStarted` events since the last call
    pub fn started_ids(&mut self) -> Vec<u32> {
        self.lifecycle_events()
            .into_iter()
            .filter_map(|e| match e {
                NsvEvent::NotificationStarted { id, .. } => Some(id),
                _ => None,
            })
            .collect()
    }
}

// ============================================================================
// Running loop
// ============================================================================

/// A harness whose daemon runs as a task on the test runtime
pub struct Spawned {
    pub handle: DaemonHandle,
    pub bus: EventBus,
    pub task: JoinHandle<()>,
    pub sink: SharedSinkLog,
    pub decodes: SharedDecodeLog,
    _dir: TempDir,
}

impl Harness {
    pub fn spawn(self) -> Spawned {
        let handle = self.daemon.handle();
        let bus = self.daemon.services().bus.clone();
        let task = tokio::spawn(self.daemon.run());
        Spawned {
            handle,
            bus,
            task,
            sink: self.sink,
            decodes: self.decodes,
            _dir: self._dir,
        }
    }
}
