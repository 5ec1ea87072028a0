//! Notification categories, audio-policy classes and hint resolution
//!
//! Inbound requests carry free-form category strings (`"sms-message"`,
//! `"chat-invitation"`, `"alarm-event"` ...). The resolution table here
//! collapses them onto the canonical [`Category`] set the daemon registers
//! type handlers for.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Category-string prefix for generic sound notes
pub const SYSTEM_NOTE_PREFIX: &str = "system.note.";

/// Volume used when the request carries no `volume` hint
pub const DEFAULT_HINT_VOLUME: i32 = 100;

// ============================================================================
// Category
// ============================================================================

/// Canonical notification category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Ringtone,
    Calendar,
    Clock,
    #[serde(rename = "SMS", alias = "Sms")]
    Sms,
    Email,
    Chat,
    System,
    Sound,
    Critical,
}

impl Category {
    /// Every canonical category, in registration order
    pub const ALL: [Category; 9] = [
        Category::Ringtone,
        Category::Calendar,
        Category::Clock,
        Category::Sms,
        Category::Email,
        Category::Chat,
        Category::System,
        Category::Sound,
        Category::Critical,
    ];

    /// Categories that carry a tone, volume and vibration pattern in the profile
    pub const PROFILED: [Category; 6] = [
        Category::Ringtone,
        Category::Calendar,
        Category::Clock,
        Category::Sms,
        Category::Email,
        Category::Chat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Ringtone => "Ringtone",
            Category::Calendar => "Calendar",
            Category::Clock => "Clock",
            Category::Sms => "SMS",
            Category::Email => "Email",
            Category::Chat => "Chat",
            Category::System => "System",
            Category::Sound => "Sound",
            Category::Critical => "Critical",
        }
    }

    pub fn is_profiled(&self) -> bool {
        Self::PROFILED.contains(self)
    }

    /// Messaging categories dropped when the messaging application closes
    pub fn is_messaging(&self) -> bool {
        matches!(self, Category::Sms | Category::Chat | Category::Email)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidCategory(s.to_string()))
    }
}

// ============================================================================
// Policy class
// ============================================================================

/// Audio-policy class used for arbitration with the policy authority
///
/// Coarser than [`Category`]: both alarm handlers share `Alarm`, every
/// message-like category shares `Event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyClass {
    Ringtone,
    Alarm,
    Event,
    System,
}

impl PolicyClass {
    pub const ALL: [PolicyClass; 4] = [
        PolicyClass::Ringtone,
        PolicyClass::Alarm,
        PolicyClass::Event,
        PolicyClass::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyClass::Ringtone => "ringtone",
            PolicyClass::Alarm => "alarm",
            PolicyClass::Event => "event",
            PolicyClass::System => "system",
        }
    }
}

impl fmt::Display for PolicyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        PolicyClass::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidInput(format!("unknown policy class: {}", s)))
    }
}

/// State requested from, or granted by, the audio-policy authority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyState {
    /// No decision (passive class not allowed)
    None,
    Play,
    Stop,
}

impl PolicyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyState::None => "none",
            PolicyState::Play => "play",
            PolicyState::Stop => "stop",
        }
    }
}

impl fmt::Display for PolicyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Hint resolution
// ============================================================================

/// Exact category strings and the canonical category each maps to
const CATEGORY_TABLE: &[(&str, Category)] = &[
    ("system-sound", Category::System),
    ("incoming-call", Category::Ringtone),
    ("sms-message", Category::Sms),
    ("sms-message-class-0", Category::Sms),
    ("voice-mail", Category::Sms),
    ("chat-message", Category::Chat),
    ("auth-request", Category::Chat),
    ("chat-invitation", Category::Chat),
    ("im", Category::Chat),
    ("im.received", Category::Chat),
    ("im.error", Category::Chat),
    ("email-message", Category::Email),
    ("email", Category::Email),
    ("email.arrived", Category::Email),
    ("email.bounced", Category::Email),
    ("system-critical", Category::Critical),
    ("play-sound", Category::Sound),
];

/// Map an inbound category string onto a canonical category
///
/// `"alarm-event"` is split by the `alarm-type` hint: `"clock"` selects the
/// alarm clock, anything else (or no hint) the calendar alarm.
pub fn resolve_category(category: &str, alarm_type: Option<&str>) -> Option<Category> {
    if category == "alarm-event" {
        return Some(match alarm_type {
            Some("clock") => Category::Clock,
            _ => Category::Calendar,
        });
    }

    if category.starts_with(SYSTEM_NOTE_PREFIX) {
        return Some(Category::Sound);
    }

    CATEGORY_TABLE
        .iter()
        .find(|(name, _)| *name == category)
        .map(|(_, c)| *c)
}

/// Raw hints attached to an inbound notification request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationHints {
    #[serde(default)]
    pub category: Option<String>,

    #[serde(default, rename = "sound-file")]
    pub sound_file: Option<PathBuf>,

    #[serde(default)]
    pub volume: Option<i32>,

    #[serde(default)]
    pub vibra: Option<String>,

    #[serde(default, rename = "override")]
    pub override_profile: bool,

    #[serde(default, rename = "alarm-type")]
    pub alarm_type: Option<String>,
}

/// Hints after category resolution, ready for the dispatch facade
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedHints {
    pub category: Category,
    pub sound_file: Option<PathBuf>,
    pub volume: i32,
    pub vibra_pattern: Option<String>,
    pub override_profile: bool,
}

impl NotificationHints {
    /// Resolve the category string and apply hint defaults
    ///
    /// # Errors
    /// - `InvalidInput` when no category hint is present
    /// - `InvalidCategory` when the hint maps to no canonical category
    pub fn resolve(&self) -> Result<ResolvedHints> {
        let raw = self
            .category
            .as_deref()
            .ok_or_else(|| Error::InvalidInput("missing category hint".to_string()))?;

        let category = resolve_category(raw, self.alarm_type.as_deref())
            .ok_or_else(|| Error::InvalidCategory(raw.to_string()))?;

        Ok(ResolvedHints {
            category,
            sound_file: self.sound_file.clone(),
            volume: self.volume.unwrap_or(DEFAULT_HINT_VOLUME),
            vibra_pattern: self.vibra.clone(),
            override_profile: self.override_profile,
        })
    }
}
