//! Audio sink contract and the paced production sink
//!
//! The device's audio service is external; `PacedSink` stands in for it by
//! probing each sound with symphonia and reporting `Drained` after the
//! sound's real duration, which is all the session state machine observes.

use super::{StreamEvent, StreamKey};
use crate::error::{Error, Result};
use crate::runtime::{DaemonEvent, EventSender};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Raw A-law files produced by the legacy transcoder: mono, 48 kHz, 1 byte/frame
const DECODED_EXTENSION: &str = "decoded";
const DECODED_SAMPLE_RATE: f64 = 48_000.0;

/// Parameters for opening one stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub key: StreamKey,
    pub file: PathBuf,
    pub volume: u8,
    pub event_id: Option<String>,
    pub role: Option<String>,
}

/// Audio service the playback sessions render on
pub trait AudioSink: Send {
    /// Whether streams can be opened right now
    fn is_ready(&self) -> bool;

    /// Open and start a stream; completion is reported as [`StreamEvent`]s
    fn open(&mut self, request: StreamRequest) -> Result<Box<dyn AudioStream>>;

    /// Volume applied to every stream carrying `role`
    fn set_role_volume(&mut self, role: &str, volume: u8);
}

/// An open stream
pub trait AudioStream: Send {
    fn set_volume(&mut self, volume: u8);

    /// Stop rendering; no further events are reported
    fn close(&mut self);
}

// ============================================================================
// Duration probing
// ============================================================================

/// Duration of a sound file
///
/// # Errors
/// - File cannot be opened
/// - Unsupported container or no audio track
pub fn probe_duration(path: &Path) -> Result<Duration> {
    if path.extension().and_then(|e| e.to_str()) == Some(DECODED_EXTENSION) {
        let len = std::fs::metadata(path)?.len();
        return Ok(Duration::from_secs_f64(len as f64 / DECODED_SAMPLE_RATE));
    }

    let file = std::fs::File::open(path)
        .map_err(|e| Error::Playback(format!("Failed to open {}: {}", path.display(), e)))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| Error::Decode(format!("Failed to probe {}: {}", path.display(), e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::Decode(format!("No audio track in {}", path.display())))?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    if let (Some(frames), Some(rate)) = (params.n_frames, params.sample_rate) {
        if rate > 0 {
            return Ok(Duration::from_secs_f64(frames as f64 / rate as f64));
        }
    }

    // Container without a frame count: sum packet durations
    let time_base = params
        .time_base
        .ok_or_else(|| Error::Decode(format!("No time base for {}", path.display())))?;
    let mut total = 0u64;
    while let Ok(packet) = format.next_packet() {
        if packet.track_id() == track_id {
            total += packet.dur;
        }
    }
    let time = time_base.calc_time(total);
    Ok(Duration::from_secs(time.seconds) + Duration::from_secs_f64(time.frac))
}

// ============================================================================
// PacedSink
// ============================================================================

/// Sink that renders nothing but honours each sound's duration
pub struct PacedSink {
    events: EventSender,
    role_volumes: HashMap<String, u8>,
}

impl PacedSink {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            role_volumes: HashMap::new(),
        }
    }

    fn effective_volume(&self, request: &StreamRequest) -> u8 {
        match request.role.as_ref().and_then(|r| self.role_volumes.get(r)) {
            Some(role_volume) => ((request.volume as u32 * *role_volume as u32) / 100) as u8,
            None => request.volume,
        }
    }
}

impl AudioSink for PacedSink {
    fn is_ready(&self) -> bool {
        true
    }

    fn open(&mut self, request: StreamRequest) -> Result<Box<dyn AudioStream>> {
        let duration = probe_duration(&request.file)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Playback(format!("No runtime for stream: {}", e)))?;

        info!(
            "Playing {} ({:?}, volume {}, event {:?})",
            request.file.display(),
            duration,
            self.effective_volume(&request),
            request.event_id
        );

        let events = self.events.clone();
        let key = request.key;
        let task = runtime.spawn(async move {
            tokio::time::sleep(duration).await;
            events.post(DaemonEvent::Stream {
                key,
                event: StreamEvent::Drained,
            });
        });

        Ok(Box::new(PacedStream {
            file: request.file,
            task: Some(task),
        }))
    }

    fn set_role_volume(&mut self, role: &str, volume: u8) {
        debug!("Role {} volume set to {}", role, volume);
        self.role_volumes.insert(role.to_string(), volume.min(100));
    }
}

struct PacedStream {
    file: PathBuf,
    task: Option<JoinHandle<()>>,
}

impl AudioStream for PacedStream {
    fn set_volume(&mut self, volume: u8) {
        debug!("{} volume {}", self.file.display(), volume);
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for PacedStream {
    fn drop(&mut self) {
        self.close();
    }
}
