//! Profile settings store
//!
//! The active sound profile decides, per category, the tone, its fallback,
//! the volume and the vibration pattern, plus the device-wide silent mode,
//! vibration switch and system sound level.

use crate::error::{Error, Result};
use ntsv_common::Category;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// Profile store contract consumed by the dispatch facade
pub trait ProfileStore: Send {
    fn tone(&self, category: Category) -> Option<PathBuf>;
    fn fallback(&self, category: Category) -> Option<PathBuf>;
    /// `None` when the profile has no volume for the category
    fn volume(&self, category: Category) -> Option<u8>;
    fn system_volume(&self) -> u8;
    fn is_silent_mode(&self) -> bool;
    fn is_vibra_enabled(&self) -> bool;
    fn vibra_pattern(&self, category: Category) -> Option<String>;

    /// Apply an update, returning what changed
    fn apply(&mut self, update: ProfileUpdate) -> Result<Vec<ProfileChange>>;
}

/// Change notification emitted by the profile store
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ProfileChange {
    ToneChanged {
        category: Category,
        old: Option<PathBuf>,
        new: Option<PathBuf>,
    },
    VolumeChanged { category: Category, volume: u8 },
    SystemVolumeChanged { volume: u8 },
}

/// Partial profile update; absent fields are left untouched
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub silent: Option<bool>,
    #[serde(default)]
    pub vibra_enabled: Option<bool>,
    #[serde(default)]
    pub system_sound_level: Option<u8>,
    #[serde(default)]
    pub tones: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub volumes: BTreeMap<String, u8>,
}

// ============================================================================
// TOML-backed profile
// ============================================================================

/// Profile loaded from the `[profile]` table of the config file
///
/// Category keys are matched case-insensitively (`SMS`, `sms`).
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileSettings {
    #[serde(default)]
    pub silent: bool,

    #[serde(default = "default_vibra_enabled")]
    pub vibra_enabled: bool,

    /// 0 = off, 1 = level 1, 2 = level 2
    #[serde(default = "default_system_sound_level")]
    pub system_sound_level: u8,

    #[serde(default)]
    pub tones: BTreeMap<String, PathBuf>,

    #[serde(default)]
    pub volumes: BTreeMap<String, u8>,

    #[serde(default = "default_vibra_patterns")]
    pub vibra_patterns: BTreeMap<String, String>,

    #[serde(default = "default_fallbacks")]
    pub fallbacks: BTreeMap<String, PathBuf>,
}

fn default_vibra_enabled() -> bool {
    true
}

fn default_system_sound_level() -> u8 {
    2
}

fn default_vibra_patterns() -> BTreeMap<String, String> {
    [
        (Category::Ringtone, "PatternIncomingCall"),
        (Category::Calendar, "PatternIncomingCall"),
        (Category::Clock, "PatternIncomingCall"),
        (Category::Sms, "PatternIncomingMessage"),
        (Category::Email, "PatternChatAndEmail"),
        (Category::Chat, "PatternChatAndEmail"),
    ]
    .into_iter()
    .map(|(c, p)| (c.as_str().to_string(), p.to_string()))
    .collect()
}

fn default_fallbacks() -> BTreeMap<String, PathBuf> {
    [
        (Category::Calendar, "/usr/share/sounds/ui-calendar_alarm_default.aac"),
        (Category::Clock, "/usr/share/sounds/ui-clock_alarm_default.aac"),
    ]
    .into_iter()
    .map(|(c, p)| (c.as_str().to_string(), PathBuf::from(p)))
    .collect()
}

impl Default for ProfileSettings {
    fn default() -> Self {
        Self {
            silent: false,
            vibra_enabled: default_vibra_enabled(),
            system_sound_level: default_system_sound_level(),
            tones: BTreeMap::new(),
            volumes: BTreeMap::new(),
            vibra_patterns: default_vibra_patterns(),
            fallbacks: default_fallbacks(),
        }
    }
}

/// System sound level (0/1/2) as a volume
pub fn system_level_volume(level: u8) -> u8 {
    match level {
        0 => 0,
        1 => 50,
        _ => 100,
    }
}

fn lookup<'a, T>(map: &'a BTreeMap<String, T>, category: Category) -> Option<&'a T> {
    if !category.is_profiled() {
        return None;
    }
    map.iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(category.as_str()))
        .map(|(_, value)| value)
}

fn parse_profiled(key: &str) -> Result<Category> {
    let category: Category = key.parse()?;
    if !category.is_profiled() {
        return Err(Error::BadRequest(format!(
            "{} is not a profiled category",
            category
        )));
    }
    Ok(category)
}

impl ProfileSettings {
    /// Rewrite category keys to their canonical names
    ///
    /// # Errors
    /// Returns `Common(InvalidCategory)` for an unknown key.
    pub fn normalized(self) -> Result<Self> {
        fn canonical<T>(map: BTreeMap<String, T>) -> Result<BTreeMap<String, T>> {
            map.into_iter()
                .map(|(key, value)| Ok((parse_profiled(&key)?.as_str().to_string(), value)))
                .collect()
        }

        Ok(Self {
            tones: canonical(self.tones)?,
            volumes: canonical(self.volumes)?,
            vibra_patterns: canonical(self.vibra_patterns)?,
            fallbacks: canonical(self.fallbacks)?,
            ..self
        })
    }
}

impl ProfileStore for ProfileSettings {
    fn tone(&self, category: Category) -> Option<PathBuf> {
        lookup(&self.tones, category).cloned()
    }

    fn fallback(&self, category: Category) -> Option<PathBuf> {
        lookup(&self.fallbacks, category).cloned()
    }

    fn volume(&self, category: Category) -> Option<u8> {
        lookup(&self.volumes, category).map(|v| (*v).min(100))
    }

    fn system_volume(&self) -> u8 {
        system_level_volume(self.system_sound_level)
    }

    fn is_silent_mode(&self) -> bool {
        self.silent
    }

    fn is_vibra_enabled(&self) -> bool {
        self.vibra_enabled
    }

    fn vibra_pattern(&self, category: Category) -> Option<String> {
        lookup(&self.vibra_patterns, category).cloned()
    }

    fn apply(&mut self, update: ProfileUpdate) -> Result<Vec<ProfileChange>> {
        // Validate every key before touching anything
        let tones = update
            .tones
            .into_iter()
            .map(|(key, path)| Ok((parse_profiled(&key)?, path)))
            .collect::<Result<Vec<_>>>()?;
        let volumes = update
            .volumes
            .into_iter()
            .map(|(key, volume)| Ok((parse_profiled(&key)?, volume.min(100))))
            .collect::<Result<Vec<_>>>()?;

        let mut changes = Vec::new();

        if let Some(silent) = update.silent {
            if silent != self.silent {
                info!("Silent mode {}", if silent { "on" } else { "off" });
                self.silent = silent;
            }
        }
        if let Some(enabled) = update.vibra_enabled {
            self.vibra_enabled = enabled;
        }
        if let Some(level) = update.system_sound_level {
            let before = self.system_volume();
            self.system_sound_level = level.min(2);
            if self.system_volume() != before {
                changes.push(ProfileChange::SystemVolumeChanged {
                    volume: self.system_volume(),
                });
            }
        }

        for (category, path) in tones {
            let old = self.tone(category);
            if old.as_ref() == Some(&path) {
                continue;
            }
            debug!("Tone for {} changed to {}", category, path.display());
            self.tones
                .insert(category.as_str().to_string(), path.clone());
            changes.push(ProfileChange::ToneChanged {
                category,
                old,
                new: Some(path),
            });
        }

        for (category, volume) in volumes {
            if self.volume(category) == Some(volume) {
                continue;
            }
            self.volumes.insert(category.as_str().to_string(), volume);
            changes.push(ProfileChange::VolumeChanged { category, volume });
        }

        Ok(changes)
    }
}
