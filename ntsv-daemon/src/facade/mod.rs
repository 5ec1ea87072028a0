//! Event dispatch facade
//!
//! Turns resolved request hints into a [`NotificationRequest`] using the
//! active profile and the transcoder's decoded copies, then hands it to the
//! manager. Also owns the profile-driven housekeeping: decoding newly
//! selected tones, pruning stale decoded copies, forwarding the system sound
//! level and closing messaging notifications when the messaging application
//! leaves the foreground.

pub mod profile;
pub mod transcoder;

pub use profile::{ProfileChange, ProfileSettings, ProfileStore, ProfileUpdate};
pub use transcoder::{is_valid_sound_file, is_valid_system_sound, Transcoder, WavTranscoder};

use crate::error::Result;
use crate::notification::handlers::SYSTEM_SOUND_ROLE;
use crate::notification::{NotificationId, NotificationManager, NotificationRequest};
use crate::runtime::DaemonEvent;
use crate::services::Services;
use ntsv_common::{Category, ResolvedHints};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub struct Facade {
    profile: Box<dyn ProfileStore>,
    transcoder: Box<dyn Transcoder>,
    system_sounds_dir: PathBuf,
    foreground: Option<u64>,
    synced: bool,
}

impl Facade {
    pub fn new(
        profile: Box<dyn ProfileStore>,
        transcoder: Box<dyn Transcoder>,
        system_sounds_dir: PathBuf,
    ) -> Self {
        Self {
            profile,
            transcoder,
            system_sounds_dir,
            foreground: None,
            synced: false,
        }
    }

    pub fn profile(&self) -> &dyn ProfileStore {
        self.profile.as_ref()
    }

    fn is_system_sound(&self, path: &Path) -> bool {
        is_valid_system_sound(path, &self.system_sounds_dir)
    }

    /// Resolve `hints` against the profile into a manager request
    pub fn resolve(&self, hints: ResolvedHints, sender: Option<String>) -> NotificationRequest {
        let category = hints.category;
        let mut request = NotificationRequest::new(category);
        request.sound_file = hints.sound_file;
        request.vibra_pattern = hints.vibra_pattern;
        request.sender = sender;
        request.sound_enabled = !self.profile.is_silent_mode();
        request.vibra_enabled = self.profile.is_vibra_enabled();

        if !hints.override_profile {
            let fallback = self.profile.fallback(category).and_then(|f| {
                if self.is_system_sound(&f) {
                    Some(f)
                } else {
                    self.transcoder.decoded_filename(&f)
                }
            });

            if let Some(tone) = self.profile.tone(category) {
                if self.is_system_sound(&tone) {
                    request.sound_file = Some(tone);
                } else if let Some(decoded) = self.transcoder.decoded_filename(&tone) {
                    request.sound_file = Some(decoded);
                } else if let Some(fallback) = fallback.as_ref().filter(|f| f.exists()) {
                    debug!("{} tone not decoded yet, using fallback", category);
                    request.sound_file = Some(fallback.clone());
                }
            }
            request.fallback_sound_file = fallback;

            if let Some(pattern) = self.profile.vibra_pattern(category) {
                request.vibra_pattern = Some(pattern);
            }
        }

        request.vibra_enabled &= request.vibra_pattern.is_some();

        let requested = hints.volume.clamp(0, 100) as u8;
        request.volume = match category {
            Category::System | Category::Critical => self.profile.system_volume(),
            Category::Calendar => self
                .profile
                .volume(Category::Ringtone)
                .unwrap_or(requested),
            _ => self.profile.volume(category).unwrap_or(requested),
        };

        debug!(
            "Resolved {}: sound={:?} fallback={:?} volume={} sound_enabled={} vibra={:?}",
            category,
            request.sound_file,
            request.fallback_sound_file,
            request.volume,
            request.sound_enabled,
            request.vibra_enabled.then_some(&request.vibra_pattern)
        );
        request
    }

    /// Resolve and admit a notification
    pub fn play(
        &mut self,
        hints: ResolvedHints,
        sender: Option<String>,
        manager: &mut NotificationManager,
        svc: &mut Services,
    ) -> Result<NotificationId> {
        let request = self.resolve(hints, sender);
        manager.start(request, svc)
    }

    // ========================================================================
    // Profile
    // ========================================================================

    /// Apply a profile update; change notifications are posted to the loop
    pub fn update_profile(
        &mut self,
        update: ProfileUpdate,
        svc: &mut Services,
    ) -> Result<Vec<ProfileChange>> {
        let changes = self.profile.apply(update)?;
        for change in &changes {
            svc.post(DaemonEvent::Profile(change.clone()));
        }
        Ok(changes)
    }

    pub fn on_profile_change(&mut self, change: ProfileChange, svc: &mut Services) {
        match change {
            ProfileChange::ToneChanged { category, old, new } => {
                if let Some(new) = new {
                    let decoded_ok = self
                        .transcoder
                        .decoded_filename(&new)
                        .is_some_and(|d| is_valid_sound_file(&d));
                    if !self.is_system_sound(&new) && !decoded_ok {
                        info!("Decoding new {} tone {}", category, new.display());
                        self.transcoder.decode(category, &new);
                    }
                }
                if let Some(old) = old {
                    if !self.is_referenced(&old) {
                        self.unlink_decoded(&old);
                    }
                }
            }
            ProfileChange::SystemVolumeChanged { volume } => {
                info!("System sound volume now {}", volume);
                svc.sink.set_role_volume(SYSTEM_SOUND_ROLE, volume);
            }
            ProfileChange::VolumeChanged { category, volume } => {
                debug!("{} volume now {}", category, volume);
            }
        }
    }

    /// Push the profile's system sound volume to the audio sink
    pub fn apply_system_volume(&self, svc: &mut Services) {
        svc.sink
            .set_role_volume(SYSTEM_SOUND_ROLE, self.profile.system_volume());
    }

    /// Whether any profile tone or fallback still points at `path`
    fn is_referenced(&self, path: &Path) -> bool {
        Category::PROFILED.iter().any(|c| {
            self.profile.tone(*c).as_deref() == Some(path)
                || self.profile.fallback(*c).as_deref() == Some(path)
        })
    }

    fn unlink_decoded(&self, source: &Path) {
        if let Some(decoded) = self.transcoder.decoded_filename(source) {
            match std::fs::remove_file(&decoded) {
                Ok(()) => info!("Removed stale decoded tone {}", decoded.display()),
                Err(e) => warn!("Failed to remove {}: {}", decoded.display(), e),
            }
        }
    }

    // ========================================================================
    // Startup sync
    // ========================================================================

    /// Request decodes for every profile tone and fallback lacking a valid copy
    ///
    /// Runs once; later calls are ignored.
    pub fn startup_sync(&mut self) {
        if self.synced {
            return;
        }
        self.synced = true;
        info!("Synchronizing decoded tones with the profile");

        for category in Category::PROFILED {
            if let Some(tone) = self.profile.tone(category) {
                if !self.is_system_sound(&tone) {
                    match self.transcoder.decoded_filename(&tone) {
                        Some(decoded) if is_valid_sound_file(&decoded) => {}
                        Some(decoded) => {
                            debug!("Discarding invalid decoded copy {}", decoded.display());
                            if let Err(e) = std::fs::remove_file(&decoded) {
                                warn!("Failed to remove {}: {}", decoded.display(), e);
                            }
                            self.transcoder.decode(category, &tone);
                        }
                        None => self.transcoder.decode(category, &tone),
                    }
                }
            }

            if let Some(fallback) = self.profile.fallback(category) {
                if !self.is_system_sound(&fallback) {
                    let valid = self
                        .transcoder
                        .decoded_filename(&fallback)
                        .is_some_and(|d| is_valid_sound_file(&d));
                    if !valid {
                        self.transcoder.decode(category, &fallback);
                    }
                }
            }
        }
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn on_decoded(&self, category: Category, source: &Path, target: &Path) {
        info!(
            "Decoded {} tone {} -> {}",
            category,
            source.display(),
            target.display()
        );
    }

    pub fn on_decode_failed(&self, category: Category, source: &Path, reason: &str) {
        warn!(
            "Failed to decode {} tone {}: {}",
            category,
            source.display(),
            reason
        );
    }

    // ========================================================================
    // Foreground tracking
    // ========================================================================

    /// Foreground window changed
    ///
    /// When the foreground goes from an application to none (the messaging
    /// application was closed), the first SMS, Chat and Email notifications
    /// are finished.
    pub fn on_foreground(
        &mut self,
        window: Option<u64>,
        manager: &mut NotificationManager,
        svc: &mut Services,
    ) {
        let previous = std::mem::replace(&mut self.foreground, window);
        if previous == window {
            return;
        }
        debug!("Foreground window {:?} -> {:?}", previous, window);

        if window.is_none() && manager.is_active() {
            for category in [Category::Sms, Category::Chat, Category::Email] {
                manager.finish_by_category(category, svc);
            }
        }
    }
}
