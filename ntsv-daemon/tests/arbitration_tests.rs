//! Integration tests for notification arbitration
//!
//! Tests the manager through a fully assembled daemon:
//! - Id assignment and rejection
//! - Preemption and the releasing slot
//! - Queue contention ordering
//! - Finish semantics (idempotence, latching, fallback)
//! - Sender, foreground and shutdown driven finishes

mod helpers;

use helpers::*;
use ntsv_common::events::NsvEvent;
use ntsv_common::{Category, PolicyClass, PolicyState};
use ntsv_daemon::facade::ProfileSettings;
use ntsv_daemon::notification::{ContentionMode, NotificationId, Status};
use ntsv_daemon::policy::PolicyEvent;
use ntsv_daemon::runtime::DaemonEvent;
use ntsv_daemon::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn sound(name: &str) -> PathBuf {
    PathBuf::from("/media/sounds").join(name)
}

fn finished_ids(events: &[NsvEvent]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|e| match e {
            NsvEvent::NotificationFinished { id, .. } => Some(*id),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Admission
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_ids_start_at_one_and_rejections_consume_none() {
    let mut h = Harness::new();
    let ring = sound("ring.wav");

    let first = h.play(Category::Ringtone, Some(&ring)).unwrap();
    assert_eq!(first, NotificationId(1));
    assert_eq!(h.current_status(), Some(Status::Playing));

    // Calendar (10) does not preempt a ringtone (100)
    assert_eq!(h.play(Category::Calendar, Some(&sound("cal.wav"))), None);
    let rejected = h
        .lifecycle_events()
        .into_iter()
        .find(|e| matches!(e, NsvEvent::NotificationRejected { .. }));
    assert!(matches!(
        rejected,
        Some(NsvEvent::NotificationRejected {
            category: Some(Category::Calendar),
            ..
        })
    ));

    h.stop(first).unwrap();
    assert!(!h.daemon.manager().is_active());

    let second = h.play(Category::Sms, Some(&sound("sms.wav"))).unwrap();
    assert_eq!(second, NotificationId(2));
}

#[tokio::test(start_paused = true)]
async fn test_single_message_lifecycle() {
    let mut h = Harness::new();
    let file = sound("sms.wav");

    let id = h.play(Category::Sms, Some(&file)).unwrap();
    {
        let sink = h.sink.lock().unwrap();
        assert_eq!(sink.open_count(), 1);
        assert_eq!(sink.opened[0].file, file);
        assert_eq!(sink.opened[0].volume, 100);
        assert_eq!(sink.opened[0].event_id.as_deref(), Some("message-new-email"));
    }
    assert_eq!(
        h.tone_calls(),
        vec![ToneCall::StartVibra("PatternIncomingMessage".to_string())]
    );

    // Sound ends immediately; padded to the 3 s floor
    h.drain_last();
    assert_eq!(h.current_id(), Some(id));
    h.advance(std::time::Duration::from_millis(2900)).await;
    assert_eq!(h.current_id(), Some(id));
    h.advance(std::time::Duration::from_millis(100)).await;

    assert!(!h.daemon.manager().is_active());
    assert_eq!(
        h.tone_calls().last(),
        Some(&ToneCall::StopVibra("PatternIncomingMessage".to_string()))
    );
    let events = h.lifecycle_events();
    assert_eq!(finished_ids(&events), vec![id.0]);
}

#[tokio::test(start_paused = true)]
async fn test_equal_priority_without_relative_is_rejected() {
    let mut h = Harness::new();

    h.play(Category::Sms, Some(&sound("a.wav"))).unwrap();
    assert_eq!(h.play(Category::Email, Some(&sound("b.wav"))), None);

    let mut sys = Harness::new();
    let info = sys.system_sound("info.wav");
    sys.play(Category::System, Some(&info)).unwrap();
    assert_eq!(sys.play(Category::Critical, Some(&info)), None);
    assert_eq!(sys.current_id(), Some(NotificationId(1)));
}

#[tokio::test(start_paused = true)]
async fn test_critical_queues_behind_system_sound_in_queue_mode() {
    let mut h = Harness::builder().contention(ContentionMode::Queue).build();
    let system = h.system_sound("info.wav");

    let first = h.play(Category::System, Some(&system)).unwrap();
    let second = h.play(Category::Critical, Some(&system)).unwrap();
    assert_eq!(h.daemon.manager().queued_ids(), vec![second]);

    h.stop(first).unwrap();
    assert_eq!(h.current_id(), Some(second));
}

// =============================================================================
// Preemption
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_ringtone_preempts_message() {
    let mut h = Harness::new();

    let sms = h.play(Category::Sms, Some(&sound("sms.wav"))).unwrap();
    let ring = h.play(Category::Ringtone, Some(&sound("ring.wav"))).unwrap();

    assert_eq!(h.current_id(), Some(ring));
    assert_eq!(h.current_status(), Some(Status::Playing));
    assert_eq!(h.daemon.manager().playing_count(), 1);

    let sink = h.sink.lock().unwrap();
    assert_eq!(sink.open_count(), 2);
    assert_eq!(sink.live(), vec![sink.opened[1].key]);
    assert_eq!(sink.opened[1].event_id.as_deref(), Some("phone-incoming-call"));
    drop(sink);

    let events = h.lifecycle_events();
    assert!(events.iter().any(|e| matches!(
        e,
        NsvEvent::NotificationAdmitted { id, preempting: true, .. } if *id == ring.0
    )));
    assert_eq!(finished_ids(&events), vec![sms.0]);
}

#[tokio::test(start_paused = true)]
async fn test_ringtone_replaces_ringtone() {
    let mut h = Harness::new();

    let first = h.play(Category::Ringtone, Some(&sound("a.wav"))).unwrap();
    let second = h.play(Category::Ringtone, Some(&sound("b.wav"))).unwrap();

    assert_eq!(h.current_id(), Some(second));
    assert_eq!(finished_ids(&h.lifecycle_events()), vec![first.0]);
}

#[tokio::test(start_paused = true)]
async fn test_preemption_waits_for_policy_release() {
    let mut h = Harness::builder().manual_policy().build();

    let sms = h.play(Category::Sms, Some(&sound("sms.wav"))).unwrap();
    assert_eq!(h.current_status(), Some(Status::Initialized));
    h.reply(PolicyState::Play);
    assert_eq!(h.current_status(), Some(Status::Playing));

    let ring = h.play(Category::Ringtone, Some(&sound("ring.wav"))).unwrap();

    // Loser stopped, its policy release outstanding
    let manager = h.daemon.manager();
    assert!(manager.current().is_none());
    let releasing = manager.releasing().unwrap();
    assert_eq!(releasing.id, sms);
    assert_eq!(releasing.status, Status::Stopped);
    assert_eq!(manager.queued_ids(), vec![ring]);
    assert_eq!(manager.playing_count(), 0);
    assert!(h.sink.lock().unwrap().live().is_empty());

    {
        let policy = h.policy.lock().unwrap();
        assert_eq!(policy.len(), 1);
        assert_eq!(policy[0].class, PolicyClass::Event);
        assert_eq!(policy[0].state, PolicyState::Stop);
    }

    h.reply(PolicyState::Stop);
    assert!(h.daemon.manager().releasing().is_none());
    assert_eq!(h.current_id(), Some(ring));
    assert_eq!(h.current_status(), Some(Status::Initialized));

    h.reply(PolicyState::Play);
    assert_eq!(h.current_status(), Some(Status::Playing));
    assert_eq!(h.sink.lock().unwrap().live().len(), 1);
}

/// Answer the oldest manual policy request without draining the loop
fn reply_in_place(h: &mut Harness, state: PolicyState) {
    let request = h.policy.lock().unwrap().remove(0);
    h.daemon.dispatch(DaemonEvent::Policy(PolicyEvent::Reply {
        class: request.class,
        ticket: request.ticket,
        state,
    }));
}

/// SMS preempted by a ringtone, stop reply handled but `StartNext` not yet run
fn hand_over_pending(mode: ContentionMode) -> (Harness, NotificationId) {
    let mut h = Harness::builder().manual_policy().contention(mode).build();
    h.play(Category::Sms, Some(&sound("sms.wav"))).unwrap();
    h.reply(PolicyState::Play);
    let ring = h.play(Category::Ringtone, Some(&sound("ring.wav"))).unwrap();

    reply_in_place(&mut h, PolicyState::Stop);
    let manager = h.daemon.manager();
    assert!(manager.current().is_none());
    assert!(manager.releasing().is_none());
    assert_eq!(manager.queued_ids(), vec![ring]);
    (h, ring)
}

#[tokio::test(start_paused = true)]
async fn test_loser_rejected_while_hand_over_pending() {
    let (mut h, ring) = hand_over_pending(ContentionMode::Reject);

    let late = h
        .daemon
        .play(hints(Category::Email, Some(&sound("mail.wav"))), None);
    assert!(matches!(late, Err(Error::Rejected(_))));

    h.daemon.run_until_idle();
    assert_eq!(h.current_id(), Some(ring));
    assert!(h.daemon.manager().queued_ids().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_loser_queued_behind_pending_winner_in_queue_mode() {
    let (mut h, ring) = hand_over_pending(ContentionMode::Queue);

    let late = h
        .daemon
        .play(hints(Category::Email, Some(&sound("mail.wav"))), None)
        .unwrap();
    assert_eq!(h.daemon.manager().queued_ids(), vec![ring, late]);

    h.daemon.run_until_idle();
    assert_eq!(h.current_id(), Some(ring));
    assert_eq!(h.daemon.manager().queued_ids(), vec![late]);
}

#[tokio::test(start_paused = true)]
async fn test_winner_admitted_while_hand_over_pending() {
    let (mut h, ring) = hand_over_pending(ContentionMode::Reject);

    // Beats the queue head, keeps arrival order among winners
    let call = h
        .daemon
        .play(hints(Category::Ringtone, Some(&sound("call.wav"))), None)
        .unwrap();
    assert_eq!(h.daemon.manager().queued_ids(), vec![ring, call]);

    h.daemon.run_until_idle();
    assert_eq!(h.current_id(), Some(ring));
}

// =============================================================================
// Queue contention
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_queue_mode_fifo_with_preempting_winner_first() {
    let mut h = Harness::builder().contention(ContentionMode::Queue).build();

    let ring = h.play(Category::Ringtone, Some(&sound("ring.wav"))).unwrap();
    let sms = h.play(Category::Sms, Some(&sound("sms.wav"))).unwrap();
    let email = h.play(Category::Email, Some(&sound("mail.wav"))).unwrap();
    assert_eq!(h.daemon.manager().queued_ids(), vec![sms, email]);
    assert_eq!(h.started_ids(), vec![ring.0]);

    // A winner goes ahead of the queued losers
    let call = h.play(Category::Ringtone, Some(&sound("call.wav"))).unwrap();
    assert_eq!(h.current_id(), Some(call));
    assert_eq!(h.daemon.manager().queued_ids(), vec![sms, email]);

    h.stop(call).unwrap();
    assert_eq!(h.current_id(), Some(sms));
    h.stop(sms).unwrap();
    assert_eq!(h.current_id(), Some(email));
    h.stop(email).unwrap();
    assert!(!h.daemon.manager().is_active());

    assert_eq!(h.started_ids(), vec![call.0, sms.0, email.0]);
}

// =============================================================================
// Finish
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent_until_destroyed() {
    let mut h = Harness::builder().manual_policy().build();

    let id = h.play(Category::Sms, Some(&sound("sms.wav"))).unwrap();
    h.reply(PolicyState::Play);

    h.stop(id).unwrap();
    assert_eq!(h.daemon.manager().releasing().map(|n| n.id), Some(id));
    // Already stopping
    h.stop(id).unwrap();

    h.reply(PolicyState::Stop);
    assert!(!h.daemon.manager().is_active());
    assert!(matches!(h.stop(id), Err(Error::NotFound(_))));

    assert_eq!(finished_ids(&h.lifecycle_events()), vec![id.0]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_unknown_id() {
    let mut h = Harness::new();
    assert!(matches!(h.stop(NotificationId(42)), Err(Error::NotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn test_finish_latched_until_policy_reply() {
    let mut h = Harness::builder().manual_policy().build();

    let id = h.play(Category::Sms, Some(&sound("sms.wav"))).unwrap();
    h.stop(id).unwrap();

    // Nothing happens until the authority answers
    assert_eq!(h.current_status(), Some(Status::Initialized));
    assert!(h.daemon.manager().current().unwrap().stop_latched);

    h.reply(PolicyState::Play);

    // Never rendered, release requested instead
    assert_eq!(h.sink.lock().unwrap().open_count(), 0);
    assert!(h.tone_calls().is_empty());
    assert_eq!(h.daemon.manager().releasing().map(|n| n.id), Some(id));
    assert_eq!(h.policy.lock().unwrap()[0].state, PolicyState::Stop);

    h.reply(PolicyState::Stop);
    assert!(!h.daemon.manager().is_active());
    assert!(h.started_ids().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_playback_error_without_fallback_finishes() {
    let mut h = Harness::new();
    let broken = sound("broken.wav");
    h.sink.lock().unwrap().failing.insert(broken.clone());

    let id = h.play(Category::Sms, Some(&broken)).unwrap();

    assert!(!h.daemon.manager().is_active());
    let events = h.lifecycle_events();
    assert!(!events
        .iter()
        .any(|e| matches!(e, NsvEvent::FallbackEngaged { .. })));
    assert_eq!(finished_ids(&events), vec![id.0]);
}

fn profile_with_sms_fallback(source: &Path) -> ProfileSettings {
    let mut profile = ProfileSettings::default();
    profile
        .fallbacks
        .insert("SMS".to_string(), source.to_path_buf());
    profile
}

#[tokio::test(start_paused = true)]
async fn test_playback_error_switches_to_fallback() {
    let backup = PathBuf::from("/media/backup.mp3");
    let mut h = Harness::builder()
        .profile(profile_with_sms_fallback(&backup))
        .build();
    let decoded_backup = h.decoded.join("backup.mp3.wav");
    write_wav(&decoded_backup, 800);

    let broken = sound("broken.wav");
    h.sink.lock().unwrap().failing.insert(broken.clone());

    let id = h.play(Category::Sms, Some(&broken)).unwrap();

    let current = h.daemon.manager().current().unwrap();
    assert_eq!(current.id, id);
    assert!(current.fallback_in_use);
    assert_eq!(current.sound_file.as_deref(), Some(decoded_backup.as_path()));

    let sink = h.sink.lock().unwrap();
    assert_eq!(sink.open_count(), 1);
    assert_eq!(sink.opened[0].file, decoded_backup);
    drop(sink);

    let events = h.lifecycle_events();
    assert!(events.iter().any(|e| matches!(
        e,
        NsvEvent::FallbackEngaged { id: fid, .. } if *fid == id.0
    )));
}

#[tokio::test(start_paused = true)]
async fn test_fallback_failure_finishes() {
    let backup = PathBuf::from("/media/backup.mp3");
    let mut h = Harness::builder()
        .profile(profile_with_sms_fallback(&backup))
        .build();
    let decoded_backup = h.decoded.join("backup.mp3.wav");
    write_wav(&decoded_backup, 800);

    let broken = sound("broken.wav");
    {
        let mut sink = h.sink.lock().unwrap();
        sink.failing.insert(broken.clone());
        sink.failing.insert(decoded_backup.clone());
    }

    let id = h.play(Category::Sms, Some(&broken)).unwrap();

    assert!(!h.daemon.manager().is_active());
    let events = h.lifecycle_events();
    let engaged = events
        .iter()
        .filter(|e| matches!(e, NsvEvent::FallbackEngaged { .. }))
        .count();
    assert_eq!(engaged, 1);
    assert_eq!(finished_ids(&events), vec![id.0]);
}

// =============================================================================
// External finishes
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_sender_vanish_finishes_tracked_notification() {
    let mut h = Harness::new();

    let id = h
        .play_from(Category::Ringtone, Some(&sound("ring.wav")), "caller-1")
        .unwrap();
    assert_eq!(*h.watched.lock().unwrap(), vec!["caller-1".to_string()]);

    h.post(DaemonEvent::SenderVanished("someone-else".to_string()));
    assert_eq!(h.current_id(), Some(id));

    h.post(DaemonEvent::SenderVanished("caller-1".to_string()));
    assert!(!h.daemon.manager().is_active());
    assert!(h.watched.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_system_sound_ignores_sender() {
    let mut h = Harness::new();
    let system = h.system_sound("info.wav");

    let id = h.play_from(Category::System, Some(&system), "panel").unwrap();
    assert!(h.watched.lock().unwrap().is_empty());

    h.post(DaemonEvent::SenderVanished("panel".to_string()));
    assert_eq!(h.current_id(), Some(id));
}

#[tokio::test(start_paused = true)]
async fn test_foreground_loss_finishes_messages_only() {
    let mut h = Harness::new();
    h.post(DaemonEvent::ForegroundChanged(Some(7)));

    h.play(Category::Sms, Some(&sound("sms.wav"))).unwrap();
    h.post(DaemonEvent::ForegroundChanged(Some(8)));
    assert!(h.current_id().is_some());

    h.post(DaemonEvent::ForegroundChanged(None));
    assert!(!h.daemon.manager().is_active());

    let ring = h.play(Category::Ringtone, Some(&sound("ring.wav"))).unwrap();
    h.post(DaemonEvent::ForegroundChanged(Some(3)));
    h.post(DaemonEvent::ForegroundChanged(None));
    assert_eq!(h.current_id(), Some(ring));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_finishes_queue_then_current() {
    let mut h = Harness::builder().contention(ContentionMode::Queue).build();

    let ring = h.play(Category::Ringtone, Some(&sound("ring.wav"))).unwrap();
    let sms = h.play(Category::Sms, Some(&sound("sms.wav"))).unwrap();
    h.lifecycle_events();

    h.post(DaemonEvent::Shutdown);

    assert!(!h.daemon.manager().is_active());
    assert!(h.sink.lock().unwrap().live().is_empty());
    assert_eq!(finished_ids(&h.lifecycle_events()), vec![sms.0, ring.0]);
}

// =============================================================================
// Policy and audio readiness
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_authority_stop_command_silences_holder() {
    let mut h = Harness::new();

    let id = h.play(Category::Ringtone, Some(&sound("ring.wav"))).unwrap();
    h.post(DaemonEvent::Policy(PolicyEvent::StateRequest {
        class: PolicyClass::Ringtone,
        state: PolicyState::Stop,
    }));

    // Silenced but still the current notification
    let current = h.daemon.manager().current().unwrap();
    assert_eq!(current.id, id);
    assert!(!current.playing);
    assert!(h.sink.lock().unwrap().live().is_empty());

    assert!(h.lifecycle_events().iter().any(|e| matches!(
        e,
        NsvEvent::PolicyCommand {
            class: PolicyClass::Ringtone,
            state: PolicyState::Stop,
            ..
        }
    )));

    // Handed back: rings again
    h.post(DaemonEvent::Policy(PolicyEvent::StateRequest {
        class: PolicyClass::Ringtone,
        state: PolicyState::Play,
    }));
    assert!(h.daemon.manager().current().unwrap().playing);
    assert_eq!(h.sink.lock().unwrap().live().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_authority_stop_command_finishes_message() {
    let mut h = Harness::new();

    let sms = h.play(Category::Sms, Some(&sound("sms.wav"))).unwrap();
    h.lifecycle_events();
    h.post(DaemonEvent::Policy(PolicyEvent::StateRequest {
        class: PolicyClass::Event,
        state: PolicyState::Stop,
    }));

    assert!(!h.daemon.manager().is_active());
    assert!(h.sink.lock().unwrap().live().is_empty());
    assert_eq!(finished_ids(&h.lifecycle_events()), vec![sms.0]);

    // The slot is free for the next message
    let email = h.play(Category::Email, Some(&sound("mail.wav"))).unwrap();
    assert_eq!(h.current_id(), Some(email));
    assert_eq!(h.current_status(), Some(Status::Playing));
}

#[tokio::test(start_paused = true)]
async fn test_playback_waits_for_audio_sink() {
    let mut h = Harness::builder().sink_ready(false).build();

    let id = h.play(Category::Sms, Some(&sound("sms.wav"))).unwrap();
    assert_eq!(h.current_status(), Some(Status::Playing));
    assert_eq!(h.sink.lock().unwrap().open_count(), 0);

    h.sink.lock().unwrap().ready = true;
    h.post(DaemonEvent::AudioReady);

    let sink = h.sink.lock().unwrap();
    assert_eq!(sink.open_count(), 1);
    assert_eq!(sink.opened[0].key.notification, id);
    assert_eq!(sink.role_volumes, vec![("system-sound".to_string(), 100)]);
}

// =============================================================================
// Single playing notification
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_at_most_one_playing_for_mixed_sequence() {
    for mode in [ContentionMode::Reject, ContentionMode::Queue] {
        let mut h = Harness::builder().contention(mode).build();
        let system = h.system_sound("info.wav");
        let steps = [
            (Category::Sms, sound("sms.wav")),
            (Category::Ringtone, sound("ring.wav")),
            (Category::Calendar, sound("cal.wav")),
            (Category::Email, sound("mail.wav")),
            (Category::Clock, sound("clock.wav")),
            (Category::System, system.clone()),
            (Category::Critical, system.clone()),
            (Category::Ringtone, sound("call.wav")),
            (Category::Chat, sound("chat.wav")),
        ];

        let mut admitted = Vec::new();
        for (category, file) in &steps {
            admitted.extend(h.play(*category, Some(file.as_path())));
            assert!(
                h.daemon.manager().playing_count() <= 1,
                "{:?}: more than one playing after {}",
                mode,
                category
            );
            h.advance(Duration::from_millis(1500)).await;
            assert!(h.daemon.manager().playing_count() <= 1);
        }

        for id in admitted {
            let _ = h.stop(id);
            assert!(h.daemon.manager().playing_count() <= 1);
            h.advance(Duration::from_millis(500)).await;
            assert!(h.daemon.manager().playing_count() <= 1);
        }
        h.advance(Duration::from_secs(60)).await;
        assert!(!h.daemon.manager().is_active(), "{:?}: slot not drained", mode);
    }
}
