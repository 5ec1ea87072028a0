//! Incoming-call ringtone
//!
//! Granted: loop the ringtone (3 s floor per loop) and vibrate once audio
//! starts. Granted but silent: vibrate only. Denied: the tone generator's
//! repeating "waiting" tone until the call is answered or the authority
//! hands the ringtone class over.

use super::{
    session_config, start_session, start_tone, vibra_start, HandlerContext, HandlerFlags,
    NotificationHandler, PlayStatus,
};
use crate::notification::Notification;
use crate::services::Tone;
use ntsv_common::PolicyClass;

pub struct RingtoneHandler;

impl NotificationHandler for RingtoneHandler {
    fn name(&self) -> &'static str {
        "ringtone"
    }

    fn priority(&self) -> i32 {
        100
    }

    fn flags(&self) -> HandlerFlags {
        HandlerFlags::RELATIVE | HandlerFlags::TRACKS_SENDER
    }

    fn policy_class(&self) -> PolicyClass {
        PolicyClass::Ringtone
    }

    fn play(&self, n: &mut Notification, cx: &mut HandlerContext<'_>) -> PlayStatus {
        if !n.play_granted {
            start_tone(n, cx, Tone::Waiting);
            return PlayStatus::Started;
        }

        if n.sound_enabled {
            let config = session_config(n)
                .repeat(true)
                .min_timeout_ms(3000)
                .event_id("phone-incoming-call");
            start_session(n, cx, config)
        } else {
            vibra_start(n, cx);
            PlayStatus::Started
        }
    }
}
