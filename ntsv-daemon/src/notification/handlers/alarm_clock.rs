//! Alarm clock with volume escalation
//!
//! Granted: loop the alarm at 50% volume; once audio starts, step to 75%
//! after 6 s, to 100% after a further 6 s, and give up 46 s later.
//! Denied: a 3 s acknowledgement tone.

use super::{
    schedule, session_config, start_session, start_tone, HandlerContext, HandlerFlags,
    HandlerTimer, NotificationHandler, PlayStatus, SHORT_FEEDBACK,
};
use crate::notification::Notification;
use crate::playback::PlaybackEvent;
use crate::services::Tone;
use ntsv_common::PolicyClass;
use std::time::Duration;
use tracing::debug;

/// Volume the alarm starts at
pub const INITIAL_VOLUME: u8 = 50;

/// (delay before the step, volume applied by the step); `None` ends the alarm
const ESCALATION: [(u64, Option<u8>); 3] = [(6000, Some(75)), (6000, Some(100)), (46000, None)];

pub struct AlarmClockHandler;

impl AlarmClockHandler {
    fn arm_step(&self, n: &mut Notification, cx: &mut HandlerContext<'_>) {
        let step = n.handler_state.as_ref().map_or(0, |s| s.escalation_step) as usize;
        if let Some((delay, _)) = ESCALATION.get(step) {
            schedule(n, cx, Duration::from_millis(*delay), HandlerTimer::Escalate);
        }
    }
}

impl NotificationHandler for AlarmClockHandler {
    fn name(&self) -> &'static str {
        "alarm-clock"
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
            let mut config = session_config(n)
                .repeat(true)
                .min_timeout_ms(3000)
                .event_id("alarm-clock-elapsed");
            config.volume = INITIAL_VOLUME;
            start_session(n, cx, config)
        } else {
            start_tone(n, cx, Tone::Acknowledge);
            schedule(n, cx, SHORT_FEEDBACK, HandlerTimer::Finish);
            PlayStatus::Started
        }
    }

    fn on_playback(&self, n: &mut Notification, event: PlaybackEvent, cx: &mut HandlerContext<'_>) {
        match event {
            PlaybackEvent::Started => {
                super::vibra_start(n, cx);
                if let Some(state) = n.handler_state.as_mut() {
                    state.escalation_step = 0;
                }
                self.arm_step(n, cx);
            }
            PlaybackEvent::Succeeded => cx.finish(),
            PlaybackEvent::Error => cx.error(),
            PlaybackEvent::Stopped => {}
        }
    }

    fn on_timer(&self, n: &mut Notification, timer: HandlerTimer, cx: &mut HandlerContext<'_>) {
        match timer {
            HandlerTimer::Finish => cx.finish(),
            HandlerTimer::Escalate => {
                let Some(state) = n.handler_state.as_mut() else {
                    return;
                };
                let step = state.escalation_step as usize;
                state.escalation_step += 1;

                match ESCALATION.get(step) {
                    Some((_, Some(volume))) => {
                        debug!("{} escalating to volume {}", n.id, volume);
                        if let Some(session) = state.playback.as_mut() {
                            session.set_volume(*volume);
                        }
                        self.arm_step(n, cx);
                    }
                    _ => {
                        debug!("{} alarm envelope elapsed", n.id);
                        cx.finish();
                    }
                }
            }
        }
    }
}
