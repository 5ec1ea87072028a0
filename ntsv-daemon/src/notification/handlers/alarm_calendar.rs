//! Calendar alarm: one bounded sound, or an acknowledgement tone

use super::{
    schedule, session_config, start_session, start_tone, HandlerContext, HandlerFlags,
    HandlerTimer, NotificationHandler, PlayStatus, SHORT_FEEDBACK,
};
use crate::notification::Notification;
use crate::services::Tone;
use ntsv_common::PolicyClass;

pub struct AlarmCalendarHandler;

impl NotificationHandler for AlarmCalendarHandler {
    fn name(&self) -> &'static str {
        "alarm-calendar"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn flags(&self) -> HandlerFlags {
        HandlerFlags::RELATIVE
    }

    fn policy_class(&self) -> PolicyClass {
        PolicyClass::Alarm
    }

    fn play(&self, n: &mut Notification, cx: &mut HandlerContext<'_>) -> PlayStatus {
        if n.play_granted {
            // Silent profile: the alarm still runs its course, inaudibly
            if !n.sound_enabled {
                n.volume = 0;
            }
            let config = session_config(n)
                .min_timeout_ms(3000)
                .max_timeout_ms(10000)
                .event_id("calendar-alarm");
            start_session(n, cx, config)
        } else if n.sound_enabled {
            start_tone(n, cx, Tone::Acknowledge);
            schedule(n, cx, SHORT_FEEDBACK, HandlerTimer::Finish);
            PlayStatus::Started
        } else {
            PlayStatus::Declined
        }
    }
}
