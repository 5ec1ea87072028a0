//! System and critical system sounds
//!
//! Neither vibrates. A system sound is dropped when not granted; a critical
//! one falls back to a 3 s acknowledgement tone and negotiates policy even
//! on a silent profile.

use super::{
    schedule, session_config, start_session, start_tone, HandlerContext, HandlerFlags,
    HandlerTimer, NotificationHandler, PlayStatus, SHORT_FEEDBACK,
};
use crate::notification::Notification;
use crate::services::Tone;
use ntsv_common::PolicyClass;

/// Role carried by system-sound streams (scaled by the system volume)
pub const SYSTEM_SOUND_ROLE: &str = "system-sound";

pub struct SystemHandler;

impl NotificationHandler for SystemHandler {
    fn name(&self) -> &'static str {
        "system"
    }

    fn priority(&self) -> i32 {
        1
    }

    fn flags(&self) -> HandlerFlags {
        HandlerFlags::NONE
    }

    fn policy_class(&self) -> PolicyClass {
        PolicyClass::System
    }

    fn vibrates_on_start(&self) -> bool {
        false
    }

    fn play(&self, n: &mut Notification, cx: &mut HandlerContext<'_>) -> PlayStatus {
        if !(n.play_granted && n.sound_enabled) {
            return PlayStatus::Declined;
        }
        let config = session_config(n)
            .min_timeout_ms(1000)
            .event_id("dialog-information")
            .role(SYSTEM_SOUND_ROLE);
        start_session(n, cx, config)
    }
}

pub struct CriticalHandler;

impl NotificationHandler for CriticalHandler {
    fn name(&self) -> &'static str {
        "critical"
    }

    fn priority(&self) -> i32 {
        1
    }

    fn flags(&self) -> HandlerFlags {
        HandlerFlags::ALWAYS_NEGOTIATE
    }

    fn policy_class(&self) -> PolicyClass {
        PolicyClass::System
    }

    fn vibrates_on_start(&self) -> bool {
        false
    }

    fn play(&self, n: &mut Notification, cx: &mut HandlerContext<'_>) -> PlayStatus {
        if !n.sound_enabled {
            return PlayStatus::Declined;
        }

        if n.play_granted {
            let config = session_config(n)
                .min_timeout_ms(1000)
                .event_id("dialog-warning")
                .role(SYSTEM_SOUND_ROLE);
            start_session(n, cx, config)
        } else {
            start_tone(n, cx, Tone::Acknowledge);
            schedule(n, cx, SHORT_FEEDBACK, HandlerTimer::Finish);
            PlayStatus::Started
        }
    }
}
