//! Offline tone transcoding
//!
//! User-selected tones (MP3, AAC ...) are decoded once into PCM WAV copies
//! under the decode directory; notifications then play the copy. Decoding
//! runs on a blocking task and reports back through the daemon channel.

use crate::error::{Error, Result};
use crate::runtime::{DaemonEvent, EventSender};
use ntsv_common::Category;
use std::fs::File;
use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info, warn};

/// Transcoding service contract
pub trait Transcoder: Send {
    /// Where the decoded copy of `source` is (or would be) stored
    fn target_filename(&self, source: &Path) -> PathBuf;

    /// Decoded copy of `source`, if it exists
    fn decoded_filename(&self, source: &Path) -> Option<PathBuf> {
        let target = self.target_filename(source);
        target.exists().then_some(target)
    }

    /// Start decoding; completion arrives as `Decoded` / `DecodeFailed`
    fn decode(&mut self, category: Category, source: &Path);
}

/// True for a readable PCM (integer or float) WAV file
pub fn is_valid_sound_file(path: &Path) -> bool {
    match hound::WavReader::open(path) {
        Ok(reader) => {
            let spec = reader.spec();
            debug!(
                "{} is a valid sound file ({} Hz, {} channels, {} bits)",
                path.display(),
                spec.sample_rate,
                spec.channels,
                spec.bits_per_sample
            );
            true
        }
        Err(e) => {
            debug!("{} is not a valid sound file: {}", path.display(), e);
            false
        }
    }
}

/// True for a valid `.wav` file under the system sounds directory
pub fn is_valid_system_sound(path: &Path, system_sounds_dir: &Path) -> bool {
    path.starts_with(system_sounds_dir)
        && path.extension().and_then(|e| e.to_str()) == Some("wav")
        && is_valid_sound_file(path)
}

// ============================================================================
// WavTranscoder
// ============================================================================

/// Symphonia decoder writing 16-bit PCM WAV copies
pub struct WavTranscoder {
    decode_dir: PathBuf,
    events: EventSender,
}

impl WavTranscoder {
    pub fn new(decode_dir: PathBuf, events: EventSender) -> Self {
        Self { decode_dir, events }
    }

    pub fn decode_dir(&self) -> &Path {
        &self.decode_dir
    }
}

impl Transcoder for WavTranscoder {
    fn target_filename(&self, source: &Path) -> PathBuf {
        let basename = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.decode_dir.join(format!("{}.wav", basename))
    }

    fn decode(&mut self, category: Category, source: &Path) {
        let source = source.to_path_buf();
        let target = self.target_filename(&source);
        let events = self.events.clone();

        let job = move || {
            let event = match decode_to_wav(&source, &target) {
                Ok(()) => DaemonEvent::Decoded {
                    category,
                    source,
                    target,
                },
                Err(e) => DaemonEvent::DecodeFailed {
                    category,
                    source,
                    reason: e.to_string(),
                },
            };
            events.post(event);
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Queued decode for {}", category);
                handle.spawn_blocking(job);
            }
            Err(_) => {
                warn!("No runtime for background decoding, decoding inline");
                job();
            }
        }
    }
}

/// Decode `source` into a 16-bit WAV at `target` (written atomically)
pub fn decode_to_wav(source: &Path, target: &Path) -> Result<()> {
    info!("Decoding {} -> {}", source.display(), target.display());

    if let Some(dir) = target.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let file = File::open(source)
        .map_err(|e| Error::Decode(format!("Failed to open {}: {}", source.display(), e)))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = source.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| Error::Decode(format!("Failed to probe {}: {}", source.display(), e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::Decode(format!("No audio track in {}", source.display())))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| Error::Decode("Sample rate unknown".to_string()))?;
    let channels = track
        .codec_params
        .channels
        .ok_or_else(|| Error::Decode("Channel layout unknown".to_string()))?
        .count() as u16;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Decode(format!("Failed to create decoder: {}", e)))?;

    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let partial = target.with_extension("wav.part");
    let mut writer = hound::WavWriter::create(&partial, spec)
        .map_err(|e| Error::Decode(format!("Failed to create {}: {}", partial.display(), e)))?;

    let mut frames = 0u64;
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => {
                let _ = std::fs::remove_file(&partial);
                return Err(Error::Decode(format!("Failed to read packet: {}", e)));
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => {
                let _ = std::fs::remove_file(&partial);
                return Err(Error::Decode(format!("Fatal decode error: {}", e)));
            }
        };

        let mut buffer = SampleBuffer::<i16>::new(decoded.capacity() as u64, *decoded.spec());
        buffer.copy_interleaved_ref(decoded);
        for sample in buffer.samples() {
            writer
                .write_sample(*sample)
                .map_err(|e| Error::Decode(format!("Failed to write sample: {}", e)))?;
        }
        frames += (buffer.samples().len() / channels.max(1) as usize) as u64;
    }

    writer
        .finalize()
        .map_err(|e| Error::Decode(format!("Failed to finalize WAV: {}", e)))?;
    std::fs::rename(&partial, target)?;

    debug!("Decoded {} frames at {} Hz", frames, sample_rate);
    Ok(())
}
