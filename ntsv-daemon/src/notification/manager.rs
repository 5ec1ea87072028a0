//! Notification manager
//!
//! Owns the audio slot and the pending queue. Every mutation happens on the
//! daemon loop; slot hand-over (`StartNext`) and deferred finishes are posted
//! back to the loop rather than run inline.
//!
//! **Slots:**
//! - `current`: the one notification with an active policy/playback session
//! - `releasing`: finished, waiting for the policy stop-reply; still blocks
//!   the queue
//! - `queue`: admitted but not started; preempting winners sit ahead of
//!   queued losers

use super::handlers::{
    preempts, HandlerAction, HandlerFlags, HandlerTimer, NotificationHandler, PlayStatus,
};
use super::{
    HandlerContext, HandlerRegistry, Notification, NotificationId, NotificationInfo,
    NotificationRequest, Status,
};
use crate::error::{Error, Result};
use crate::playback::{PlaybackEvent, PlaybackSession, SessionId, SessionTimer, StreamEvent, StreamKey};
use crate::policy::{
    NotAttempted, PlayOutcome, PolicyArbitrator, PolicyEvent, PolicyNotice, PolicySessionId,
    StopOutcome,
};
use crate::runtime::{DaemonEvent, TimerId};
use crate::services::Services;
use ntsv_common::events::NsvEvent;
use ntsv_common::{Category, PolicyClass, PolicyState};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// What happens to a request that loses preemption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentionMode {
    /// Destroy the loser and report -1
    #[default]
    Reject,
    /// Keep the loser queued until the slot frees
    Queue,
}

/// Serializable view of the manager's slots
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManagerSnapshot {
    pub current: Option<NotificationInfo>,
    pub releasing: Option<NotificationInfo>,
    pub queue: Vec<NotificationInfo>,
}

/// A notification together with the handler it was admitted under
struct Entry {
    handler: Arc<dyn NotificationHandler>,
    notification: Notification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Immediate,
    Preempt,
    /// Slot empty but not yet handed over; wins against the queue head
    AheadOfQueue,
    Queue,
}

type Actions = Vec<(NotificationId, HandlerAction)>;

/// Run one handler call for `entry`
fn invoke<R>(
    entry: &mut Entry,
    svc: &mut Services,
    actions: &mut Actions,
    f: impl FnOnce(&dyn NotificationHandler, &mut Notification, &mut HandlerContext<'_>) -> R,
) -> R {
    let mut cx = HandlerContext::new(svc, entry.notification.id, actions);
    f(entry.handler.as_ref(), &mut entry.notification, &mut cx)
}

pub struct NotificationManager {
    registry: HandlerRegistry,
    arbitrator: PolicyArbitrator,
    contention: ContentionMode,
    current: Option<Entry>,
    releasing: Option<Entry>,
    queue: VecDeque<Entry>,
    next_id: u32,
    actions: Actions,
}

impl NotificationManager {
    pub fn new(
        registry: HandlerRegistry,
        arbitrator: PolicyArbitrator,
        contention: ContentionMode,
    ) -> Self {
        Self {
            registry,
            arbitrator,
            contention,
            current: None,
            releasing: None,
            queue: VecDeque::new(),
            next_id: 1,
            actions: Vec::new(),
        }
    }

    // ========================================================================
    // Admission
    // ========================================================================

    /// Admission control entry point
    ///
    /// Returns the new id, or `Error::Rejected` when no handler is registered
    /// for the category, the request lost preemption under
    /// [`ContentionMode::Reject`], or the handler failed to initialize.
    pub fn start(&mut self, request: NotificationRequest, svc: &mut Services) -> Result<NotificationId> {
        let category = request.category;
        let Some(handler) = self.registry.get(category) else {
            return Err(self.reject(Some(category), "no handler registered", svc));
        };

        // Compare against the slot's occupant, or against the queue head
        // while a hand-over is already posted
        let contender = match self.occupant() {
            Some(occupant) => Some((occupant, true)),
            None => self.queue.front().map(|head| (head, false)),
        };
        let admission = match contender {
            None => Admission::Immediate,
            Some((other, occupying)) => {
                if preempts(Some(handler.as_ref()), Some(other.handler.as_ref())) {
                    if occupying {
                        Admission::Preempt
                    } else {
                        Admission::AheadOfQueue
                    }
                } else if self.contention == ContentionMode::Queue {
                    Admission::Queue
                } else {
                    let reason = format!(
                        "{} (priority {}) does not preempt {} (priority {})",
                        category,
                        handler.priority(),
                        other.notification.category,
                        other.handler.priority()
                    );
                    return Err(self.reject(Some(category), &reason, svc));
                }
            }
        };

        let id = NotificationId(self.next_id);
        let mut notification = Notification::new(id, request);
        if let Err(e) = handler.initialize(&mut notification) {
            warn!("Failed to initialize {} notification: {}", category, e);
            return Err(self.reject(Some(category), &e.to_string(), svc));
        }
        self.next_id += 1;

        if handler.flags().contains(HandlerFlags::TRACKS_SENDER) {
            if let Some(sender) = notification.sender.as_deref() {
                svc.tracker.watch(sender);
            }
        }

        svc.publish(NsvEvent::NotificationAdmitted {
            id: id.0,
            category,
            preempting: matches!(admission, Admission::Preempt | Admission::AheadOfQueue),
            timestamp: chrono::Utc::now(),
        });

        let entry = Entry {
            handler,
            notification,
        };

        match admission {
            Admission::Immediate => {
                info!("{} {} admitted into free slot", category, id);
                self.current = Some(entry);
                self.begin(svc);
            }
            Admission::Preempt | Admission::AheadOfQueue => {
                let position = self
                    .queue
                    .iter()
                    .position(|e| !e.notification.preempting)
                    .unwrap_or(self.queue.len());
                if admission == Admission::Preempt {
                    info!("{} {} preempts the current notification", category, id);
                } else {
                    info!("{} {} goes ahead of the pending hand-over", category, id);
                }
                let mut entry = entry;
                entry.notification.preempting = true;
                self.queue.insert(position, entry);
                self.publish_queued(id, category, position, svc);
                if admission == Admission::Preempt {
                    self.finish_current(svc);
                }
            }
            Admission::Queue => {
                let position = self.queue.len();
                info!("{} {} queued at position {}", category, id, position);
                self.queue.push_back(entry);
                self.publish_queued(id, category, position, svc);
            }
        }

        self.apply_actions(svc);
        Ok(id)
    }

    fn reject(&self, category: Option<Category>, reason: &str, svc: &Services) -> Error {
        info!("Rejected {:?} notification: {}", category, reason);
        svc.publish(NsvEvent::NotificationRejected {
            category,
            reason: reason.to_string(),
            timestamp: chrono::Utc::now(),
        });
        Error::Rejected(reason.to_string())
    }

    fn publish_queued(&self, id: NotificationId, category: Category, position: usize, svc: &Services) {
        svc.publish(NsvEvent::NotificationQueued {
            id: id.0,
            category,
            position,
            timestamp: chrono::Utc::now(),
        });
    }

    /// Whatever occupies the audio slot
    fn occupant(&self) -> Option<&Entry> {
        self.current.as_ref().or(self.releasing.as_ref())
    }

    /// Take the head of the queue once both slots are empty
    pub fn start_next(&mut self, svc: &mut Services) {
        if self.current.is_some() || self.releasing.is_some() {
            trace!("Slot still occupied, not starting next");
            return;
        }
        let Some(mut entry) = self.queue.pop_front() else {
            return;
        };
        entry.notification.preempting = false;
        info!(
            "Starting queued {} {}",
            entry.notification.category, entry.notification.id
        );
        self.current = Some(entry);
        self.begin(svc);
        self.apply_actions(svc);
    }

    /// Move the new current notification into policy negotiation
    fn begin(&mut self, svc: &mut Services) {
        let request = {
            let Some(entry) = self.current.as_mut() else {
                return;
            };
            let n = &mut entry.notification;
            n.status = Status::Initialized;

            let needs_policy = n.sound_enabled
                || entry.handler.flags().contains(HandlerFlags::ALWAYS_NEGOTIATE);
            if needs_policy {
                let session = self.arbitrator.create_session(entry.handler.policy_class());
                n.policy = Some(session);
                Some((session, self.arbitrator.request_play(session)))
            } else {
                None
            }
        };

        match request {
            None => self.try_play(true, svc),
            Some((_, PlayOutcome::Pending)) => {
                debug!("Awaiting play permission");
            }
            Some((_, PlayOutcome::Decided { granted })) => self.try_play(granted, svc),
            Some((session, PlayOutcome::NotAttempted(reason))) => {
                self.arbitrator.release_session(session);
                if let Some(entry) = self.current.as_mut() {
                    entry.notification.policy = None;
                }
                self.try_play(reason == NotAttempted::NoChannel, svc);
            }
        }
    }

    /// Policy outcome known: hand the notification to its handler
    fn try_play(&mut self, granted: bool, svc: &mut Services) {
        let Some(entry) = self.current.as_mut() else {
            return;
        };
        let n = &mut entry.notification;
        n.status = Status::Playing;
        n.play_granted = granted;
        let (id, category) = (n.id, n.category);
        info!("{} {} playing (granted={})", category, id, granted);

        svc.publish(NsvEvent::NotificationStarted {
            id: id.0,
            category,
            play_granted: granted,
            timestamp: chrono::Utc::now(),
        });

        match invoke(entry, svc, &mut self.actions, |h, n, cx| h.play(n, cx)) {
            PlayStatus::Started => entry.notification.playing = true,
            PlayStatus::Declined => {
                debug!("{} handler declined to play", id);
                svc.post(DaemonEvent::FinishDeferred(id));
            }
        }
    }

    // ========================================================================
    // Finish
    // ========================================================================

    /// Finish `id` wherever it is; false if unknown
    pub fn stop(&mut self, id: NotificationId, svc: &mut Services) -> Result<()> {
        let found = self.finish(id, svc);
        self.apply_actions(svc);
        if found {
            Ok(())
        } else {
            Err(Error::NotFound(format!("notification {}", id)))
        }
    }

    /// Finish a notification posted as `FinishDeferred`
    pub fn finish_deferred(&mut self, id: NotificationId, svc: &mut Services) {
        self.finish(id, svc);
        self.apply_actions(svc);
    }

    fn finish(&mut self, id: NotificationId, svc: &mut Services) -> bool {
        if self.current.as_ref().is_some_and(|e| e.notification.id == id) {
            self.finish_current(svc);
            return true;
        }
        if let Some(index) = self.queue.iter().position(|e| e.notification.id == id) {
            self.finish_queued(index, svc);
            return true;
        }
        // Already stopping
        self.releasing
            .as_ref()
            .is_some_and(|e| e.notification.id == id)
    }

    fn finish_current(&mut self, svc: &mut Services) {
        let policy = {
            let Some(entry) = self.current.as_mut() else {
                return;
            };
            let n = &mut entry.notification;
            match n.status {
                Status::Stopped => return,
                Status::Initialized => {
                    debug!("{} finish latched until the policy reply", n.id);
                    n.stop_latched = true;
                    return;
                }
                Status::Unknown | Status::Playing => {}
            }

            info!("Finishing {} {}", n.category, n.id);
            n.status = Status::Stopped;
            if n.playing {
                invoke(entry, svc, &mut self.actions, |h, n, cx| h.stop(n, cx));
                entry.notification.playing = false;
            }
            entry.notification.policy
        };

        if let Some(session) = policy {
            if self.arbitrator.request_stop(session) == StopOutcome::Pending {
                debug!("Awaiting policy release for {}", session);
                self.releasing = self.current.take();
                return;
            }
        }

        if let Some(entry) = self.current.take() {
            self.destroy(entry, svc);
        }
        svc.post(DaemonEvent::StartNext);
    }

    fn finish_queued(&mut self, index: usize, svc: &mut Services) {
        if let Some(mut entry) = self.queue.remove(index) {
            info!(
                "Dropping queued {} {}",
                entry.notification.category, entry.notification.id
            );
            entry.notification.status = Status::Stopped;
            self.destroy(entry, svc);
        }
    }

    /// Shut the handler down and forget the notification
    fn destroy(&mut self, mut entry: Entry, svc: &mut Services) {
        invoke(&mut entry, svc, &mut self.actions, |h, n, cx| h.shutdown(n, cx));

        let n = &entry.notification;
        if entry.handler.flags().contains(HandlerFlags::TRACKS_SENDER) {
            if let Some(sender) = n.sender.as_deref() {
                svc.tracker.unwatch(sender);
            }
        }
        if let Some(session) = n.policy {
            self.arbitrator.release_session(session);
        }

        debug!("Destroyed {} {}", n.category, n.id);
        svc.publish(NsvEvent::NotificationFinished {
            id: n.id.0,
            category: n.category,
            timestamp: chrono::Utc::now(),
        });
    }

    /// Finish the first notification (current, then queue) from `sender`
    ///
    /// Only notifications whose handler tracks its sender are considered.
    pub fn finish_by_sender(&mut self, sender: &str, svc: &mut Services) -> bool {
        let matches = |e: &Entry| {
            e.handler.flags().contains(HandlerFlags::TRACKS_SENDER)
                && e.notification.sender.as_deref() == Some(sender)
        };
        let target = self
            .current
            .iter()
            .chain(self.queue.iter())
            .find(|e| matches(e))
            .map(|e| e.notification.id);
        self.finish_target(target, svc)
    }

    /// Finish the first notification (current, then queue) of `category`
    pub fn finish_by_category(&mut self, category: Category, svc: &mut Services) -> bool {
        let target = self
            .current
            .iter()
            .chain(self.queue.iter())
            .find(|e| e.notification.category == category)
            .map(|e| e.notification.id);
        self.finish_target(target, svc)
    }

    fn finish_target(&mut self, target: Option<NotificationId>, svc: &mut Services) -> bool {
        let Some(id) = target else {
            return false;
        };
        let found = self.finish(id, svc);
        self.apply_actions(svc);
        found
    }

    /// Finish every notification, queued ones first
    pub fn shutdown(&mut self, svc: &mut Services) {
        while !self.queue.is_empty() {
            self.finish_queued(0, svc);
        }
        self.finish_current(svc);
        self.apply_actions(svc);
    }

    // ========================================================================
    // Fallback protocol
    // ========================================================================

    fn error(&mut self, id: NotificationId, svc: &mut Services) {
        let Some(entry) = self.current.as_mut().filter(|e| e.notification.id == id) else {
            debug!("Ignoring error for {} (not current)", id);
            return;
        };
        let n = &mut entry.notification;

        if n.fallback_in_use {
            warn!("{} fallback sound failed too, finishing", id);
            self.finish_current(svc);
            return;
        }
        let Some(fallback) = n.fallback_sound_file.clone() else {
            warn!("{} sound failed and no fallback is configured", id);
            self.finish_current(svc);
            return;
        };

        info!("{} switching to fallback {}", id, fallback.display());
        svc.publish(NsvEvent::FallbackEngaged {
            id: id.0,
            sound_file: fallback.display().to_string(),
            timestamp: chrono::Utc::now(),
        });
        n.sound_file = Some(fallback);
        n.fallback_in_use = true;

        if n.playing {
            invoke(entry, svc, &mut self.actions, |h, n, cx| h.stop(n, cx));
            entry.notification.playing = false;
        }
        match invoke(entry, svc, &mut self.actions, |h, n, cx| h.play(n, cx)) {
            PlayStatus::Started => entry.notification.playing = true,
            PlayStatus::Declined => svc.post(DaemonEvent::FinishDeferred(id)),
        }
    }

    fn apply_actions(&mut self, svc: &mut Services) {
        while !self.actions.is_empty() {
            for (id, action) in std::mem::take(&mut self.actions) {
                match action {
                    HandlerAction::Finish => {
                        self.finish(id, svc);
                    }
                    HandlerAction::Error => self.error(id, svc),
                }
            }
        }
    }

    // ========================================================================
    // Inbound events
    // ========================================================================

    pub fn on_policy(&mut self, event: PolicyEvent, svc: &mut Services) {
        let Some(notice) = self.arbitrator.handle(event) else {
            return;
        };

        match notice {
            PolicyNotice::PlayReply { session, granted } => {
                let Some(entry) = self
                    .current
                    .as_mut()
                    .filter(|e| e.notification.policy == Some(session))
                else {
                    debug!("Play reply for {} without a waiting notification", session);
                    return;
                };
                let n = &mut entry.notification;
                if n.stop_latched {
                    debug!("{} applying latched finish", n.id);
                    n.stop_latched = false;
                    n.status = Status::Unknown;
                    self.finish_current(svc);
                } else {
                    self.try_play(granted, svc);
                }
            }
            PolicyNotice::StopReply { session } => {
                let releasing = self
                    .releasing
                    .as_ref()
                    .is_some_and(|e| e.notification.policy == Some(session));
                if !releasing {
                    debug!("Stop reply for {} without a releasing notification", session);
                    return;
                }
                if let Some(entry) = self.releasing.take() {
                    self.destroy(entry, svc);
                }
                svc.post(DaemonEvent::StartNext);
            }
            PolicyNotice::Command { session, state } => self.on_policy_command(session, state, svc),
        }

        self.apply_actions(svc);
    }

    fn on_policy_command(&mut self, session: PolicySessionId, state: PolicyState, svc: &mut Services) {
        let class = self
            .arbitrator
            .class_of(session)
            .unwrap_or(PolicyClass::Event);
        svc.publish(NsvEvent::PolicyCommand {
            class,
            state,
            timestamp: chrono::Utc::now(),
        });

        let Some(entry) = self
            .current
            .as_mut()
            .filter(|e| e.notification.policy == Some(session))
        else {
            return;
        };

        match state {
            PolicyState::Stop => {
                let id = entry.notification.id;
                if entry.notification.playing {
                    info!("{} stopped by the policy authority", id);
                    invoke(entry, svc, &mut self.actions, |h, n, cx| h.stop(n, cx));
                    entry.notification.playing = false;
                }
                // Only a ringtone can be handed the class back; anything else
                // has lost its timers and would hold the slot forever
                if entry.notification.category != Category::Ringtone {
                    svc.post(DaemonEvent::FinishDeferred(id));
                }
            }
            PolicyState::Play
                if entry.notification.category == Category::Ringtone
                    && (!entry.notification.play_granted || !entry.notification.playing) =>
            {
                info!("{} ringtone granted by the policy authority", entry.notification.id);
                if entry.notification.playing {
                    invoke(entry, svc, &mut self.actions, |h, n, cx| h.stop(n, cx));
                    entry.notification.playing = false;
                }
                entry.notification.play_granted = true;
                match invoke(entry, svc, &mut self.actions, |h, n, cx| h.play(n, cx)) {
                    PlayStatus::Started => entry.notification.playing = true,
                    PlayStatus::Declined => {
                        svc.post(DaemonEvent::FinishDeferred(entry.notification.id))
                    }
                }
            }
            _ => {}
        }
    }

    /// Lifecycle event of a playback session
    pub fn on_playback(
        &mut self,
        notification: NotificationId,
        session: SessionId,
        event: PlaybackEvent,
        svc: &mut Services,
    ) {
        let Some(entry) = self
            .current
            .as_mut()
            .filter(|e| e.notification.id == notification)
        else {
            return;
        };
        let owned = entry
            .notification
            .handler_state
            .as_ref()
            .and_then(|s| s.playback.as_ref())
            .is_some_and(|p| p.id() == session);
        if !owned {
            trace!("Dropping {:?} from stale {}", event, session);
            return;
        }

        invoke(entry, svc, &mut self.actions, |h, n, cx| h.on_playback(n, event, cx));
        self.apply_actions(svc);
    }

    /// Audio sink report for an open stream
    pub fn on_stream(&mut self, key: StreamKey, event: StreamEvent, svc: &mut Services) {
        if let Some(session) = self.current_session(key.notification, key.session) {
            session.on_stream(event, svc);
        }
    }

    pub fn on_session_timer(
        &mut self,
        timer_id: TimerId,
        notification: NotificationId,
        session: SessionId,
        timer: SessionTimer,
        svc: &mut Services,
    ) {
        if let Some(s) = self.current_session(notification, session) {
            s.on_timer(timer_id, timer, svc);
        }
    }

    fn current_session(
        &mut self,
        notification: NotificationId,
        session: SessionId,
    ) -> Option<&mut PlaybackSession> {
        self.current
            .as_mut()
            .filter(|e| e.notification.id == notification)?
            .notification
            .handler_state
            .as_mut()?
            .playback
            .as_mut()
            .filter(|p| p.id() == session)
    }

    pub fn on_handler_timer(
        &mut self,
        timer_id: TimerId,
        notification: NotificationId,
        timer: HandlerTimer,
        svc: &mut Services,
    ) {
        let Some(entry) = self
            .current
            .as_mut()
            .filter(|e| e.notification.id == notification)
        else {
            return;
        };
        let Some(state) = entry.notification.handler_state.as_mut() else {
            return;
        };
        if state.timer != Some(timer_id) {
            trace!("Ignoring stale {:?} timer for {}", timer, notification);
            return;
        }
        state.timer = None;

        invoke(entry, svc, &mut self.actions, |h, n, cx| h.on_timer(n, timer, cx));
        self.apply_actions(svc);
    }

    /// Audio sink became ready: release a session waiting for it
    pub fn on_audio_ready(&mut self, svc: &mut Services) {
        if let Some(session) = self
            .current
            .as_mut()
            .and_then(|e| e.notification.handler_state.as_mut())
            .and_then(|s| s.playback.as_mut())
        {
            session.audio_ready(svc);
        }
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn arbitrator(&self) -> &PolicyArbitrator {
        &self.arbitrator
    }

    pub fn contention(&self) -> ContentionMode {
        self.contention
    }

    pub fn current(&self) -> Option<&Notification> {
        self.current.as_ref().map(|e| &e.notification)
    }

    pub fn releasing(&self) -> Option<&Notification> {
        self.releasing.as_ref().map(|e| &e.notification)
    }

    pub fn queued_ids(&self) -> Vec<NotificationId> {
        self.queue.iter().map(|e| e.notification.id).collect()
    }

    /// Any notification current, releasing or queued
    pub fn is_active(&self) -> bool {
        self.current.is_some() || self.releasing.is_some() || !self.queue.is_empty()
    }

    /// Notifications in `Playing` status across every slot
    pub fn playing_count(&self) -> usize {
        self.current
            .iter()
            .chain(self.releasing.iter())
            .chain(self.queue.iter())
            .filter(|e| e.notification.status == Status::Playing)
            .count()
    }

    pub fn snapshot(&self) -> ManagerSnapshot {
        ManagerSnapshot {
            current: self.current().map(Notification::info),
            releasing: self.releasing().map(Notification::info),
            queue: self.queue.iter().map(|e| e.notification.info()).collect(),
        }
    }
}
