//! SMS, e-mail, chat and generic sound notes
//!
//! Silent profile: vibrate for 3 s. Denied: vibrate plus a 3 s
//! acknowledgement tone. Granted: play the tone once with a 3 s floor.

use super::{
    schedule, session_config, start_session, start_tone, vibra_start, HandlerContext,
    HandlerFlags, HandlerTimer, NotificationHandler, PlayStatus, SHORT_FEEDBACK,
};
use crate::notification::Notification;
use crate::services::Tone;
use ntsv_common::PolicyClass;

pub struct MessageHandler;

impl NotificationHandler for MessageHandler {
    fn name(&self) -> &'static str {
        "message"
    }

    fn priority(&self) -> i32 {
        5
    }

    fn flags(&self) -> HandlerFlags {
        HandlerFlags::TRACKS_SENDER
    }

    fn policy_class(&self) -> PolicyClass {
        PolicyClass::Event
    }

    fn play(&self, n: &mut Notification, cx: &mut HandlerContext<'_>) -> PlayStatus {
        if !n.sound_enabled {
            vibra_start(n, cx);
            schedule(n, cx, SHORT_FEEDBACK, HandlerTimer::Finish);
            return PlayStatus::Started;
        }

        if !n.play_granted {
            vibra_start(n, cx);
            start_tone(n, cx, Tone::Acknowledge);
            schedule(n, cx, SHORT_FEEDBACK, HandlerTimer::Finish);
            return PlayStatus::Started;
        }

        let config = session_config(n)
            .min_timeout_ms(3000)
            .event_id("message-new-email");
        start_session(n, cx, config)
    }
}
