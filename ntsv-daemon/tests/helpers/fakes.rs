//! Recording fakes for the daemon's collaborator contracts

use ntsv_common::{Category, PolicyClass, PolicyState};
use ntsv_daemon::error::{Error, Result};
use ntsv_daemon::facade::Transcoder;
use ntsv_daemon::playback::{AudioSink, AudioStream, StreamKey, StreamRequest};
use ntsv_daemon::policy::{PolicyAuthority, PolicyTicket};
use ntsv_daemon::services::{SenderTracker, Tone, ToneService};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

// ============================================================================
// Audio sink
// ============================================================================

#[derive(Debug, Default)]
pub struct SinkLog {
    pub ready: bool,
    pub opened: Vec<StreamRequest>,
    pub closed: Vec<StreamKey>,
    pub volumes: Vec<(StreamKey, u8)>,
    pub role_volumes: Vec<(String, u8)>,
    /// Files whose streams fail to open
    pub failing: HashSet<PathBuf>,
}

impl SinkLog {
    pub fn open_count(&self) -> usize {
        self.opened.len()
    }

    pub fn last_key(&self) -> Option<StreamKey> {
        self.opened.last().map(|r| r.key)
    }

    /// Streams opened but not closed yet
    pub fn live(&self) -> Vec<StreamKey> {
        self.opened
            .iter()
            .map(|r| r.key)
            .filter(|k| !self.closed.contains(k))
            .collect()
    }
}

pub type SharedSinkLog = Arc<Mutex<SinkLog>>;

pub struct RecordingSink {
    log: SharedSinkLog,
}

impl RecordingSink {
    pub fn new(ready: bool) -> (Self, SharedSinkLog) {
        let log = Arc::new(Mutex::new(SinkLog {
            ready,
            ..Default::default()
        }));
        (Self { log: log.clone() }, log)
    }
}

impl AudioSink for RecordingSink {
    fn is_ready(&self) -> bool {
        self.log.lock().unwrap().ready
    }

    fn open(&mut self, request: StreamRequest) -> Result<Box<dyn AudioStream>> {
        let mut log = self.log.lock().unwrap();
        if log.failing.contains(&request.file) {
            return Err(Error::Playback(format!(
                "cannot open {}",
                request.file.display()
            )));
        }
        let key = request.key;
        log.opened.push(request);
        Ok(Box::new(RecordingStream {
            key,
            log: self.log.clone(),
            closed: false,
        }))
    }

    fn set_role_volume(&mut self, role: &str, volume: u8) {
        self.log
            .lock()
            .unwrap()
            .role_volumes
            .push((role.to_string(), volume));
    }
}

struct RecordingStream {
    key: StreamKey,
    log: SharedSinkLog,
    closed: bool,
}

impl AudioStream for RecordingStream {
    fn set_volume(&mut self, volume: u8) {
        self.log.lock().unwrap().volumes.push((self.key, volume));
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.log.lock().unwrap().closed.push(self.key);
        }
    }
}

// ============================================================================
// Tones and vibration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToneCall {
    StartTone(Tone),
    StopTone(Tone),
    StartVibra(String),
    StopVibra(String),
}

pub type SharedToneLog = Arc<Mutex<Vec<ToneCall>>>;

pub struct RecordingTones {
    log: SharedToneLog,
}

impl RecordingTones {
    pub fn new() -> (Self, SharedToneLog) {
        let log = SharedToneLog::default();
        (Self { log: log.clone() }, log)
    }
}

impl ToneService for RecordingTones {
    fn start_tone(&mut self, tone: Tone) {
        self.log.lock().unwrap().push(ToneCall::StartTone(tone));
    }

    fn stop_tone(&mut self, tone: Tone) {
        self.log.lock().unwrap().push(ToneCall::StopTone(tone));
    }

    fn start_vibra(&mut self, pattern: &str) {
        self.log
            .lock()
            .unwrap()
            .push(ToneCall::StartVibra(pattern.to_string()));
    }

    fn stop_vibra(&mut self, pattern: &str) {
        self.log
            .lock()
            .unwrap()
            .push(ToneCall::StopVibra(pattern.to_string()));
    }
}

// ============================================================================
// Policy authority
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyRequest {
    pub class: PolicyClass,
    pub state: PolicyState,
    pub ticket: PolicyTicket,
}

pub type SharedPolicyLog = Arc<Mutex<Vec<PolicyRequest>>>;

/// Authority that only records; tests answer through `DaemonEvent::Policy`
pub struct ManualAuthority {
    log: SharedPolicyLog,
}

impl ManualAuthority {
    pub fn new() -> (Self, SharedPolicyLog) {
        let log = SharedPolicyLog::default();
        (Self { log: log.clone() }, log)
    }
}

impl PolicyAuthority for ManualAuthority {
    fn request_state(&mut self, class: PolicyClass, state: PolicyState, ticket: PolicyTicket) {
        self.log.lock().unwrap().push(PolicyRequest {
            class,
            state,
            ticket,
        });
    }
}

// ============================================================================
// Sender tracking
// ============================================================================

pub type SharedWatchLog = Arc<Mutex<Vec<String>>>;

/// Tracker exposing its watch list to the test
pub struct RecordingTracker {
    watched: SharedWatchLog,
}

impl RecordingTracker {
    pub fn new() -> (Self, SharedWatchLog) {
        let watched = SharedWatchLog::default();
        (
            Self {
                watched: watched.clone(),
            },
            watched,
        )
    }
}

impl SenderTracker for RecordingTracker {
    fn watch(&mut self, sender: &str) {
        self.watched.lock().unwrap().push(sender.to_string());
    }

    fn unwatch(&mut self, sender: &str) {
        let mut watched = self.watched.lock().unwrap();
        if let Some(pos) = watched.iter().position(|s| s == sender) {
            watched.remove(pos);
        }
    }

    fn is_watched(&self, sender: &str) -> bool {
        self.watched.lock().unwrap().iter().any(|s| s == sender)
    }
}

// ============================================================================
// Transcoder
// ============================================================================

pub type SharedDecodeLog = Arc<Mutex<Vec<(Category, PathBuf)>>>;

/// Transcoder over a real directory that records decode requests instead of decoding
pub struct FakeTranscoder {
    dir: PathBuf,
    log: SharedDecodeLog,
}

impl FakeTranscoder {
    pub fn new(dir: &Path) -> (Self, SharedDecodeLog) {
        let log = SharedDecodeLog::default();
        (
            Self {
                dir: dir.to_path_buf(),
                log: log.clone(),
            },
            log,
        )
    }
}

impl Transcoder for FakeTranscoder {
    fn target_filename(&self, source: &Path) -> PathBuf {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.dir.join(format!("{}.wav", name))
    }

    fn decode(&mut self, category: Category, source: &Path) {
        self.log
            .lock()
            .unwrap()
            .push((category, source.to_path_buf()));
    }
}
