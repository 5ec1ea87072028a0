//! Audio-policy arbitration
//!
//! One holder slot per audio class. A negotiated class asks the policy
//! authority asynchronously and keeps the requester as holder until its stop
//! is acknowledged. A passive class answers synchronously from the last
//! "allowed" hint the authority broadcast. A disabled class has no backing
//! channel at all.
//!
//! **Invariant:** at most one policy session holds a class; every request's
//! reply is delivered at most once (replies for unknown tickets are dropped).

pub mod authority;

pub use authority::{LocalAuthority, PolicyAuthority};

use ntsv_common::{PolicyClass, PolicyState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Identity of one negotiating notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolicySessionId(pub u64);

impl fmt::Display for PolicySessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "policy-{}", self.0)
    }
}

/// Correlates an authority reply with the request it answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolicyTicket(pub u64);

/// How a class is arbitrated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassMode {
    /// Explicit asynchronous grant from the authority
    Negotiated,
    /// Synchronous grant from the last broadcast hint
    Passive,
    /// No policy channel; requests are not attempted
    Disabled,
}

/// Per-class arbitration settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassSettings {
    pub mode: ClassMode,
    /// Initial "allowed" hint for passive classes
    pub allowed: bool,
}

impl ClassSettings {
    pub fn negotiated() -> Self {
        Self {
            mode: ClassMode::Negotiated,
            allowed: false,
        }
    }

    pub fn passive(allowed: bool) -> Self {
        Self {
            mode: ClassMode::Passive,
            allowed,
        }
    }

    pub fn disabled() -> Self {
        Self {
            mode: ClassMode::Disabled,
            allowed: false,
        }
    }

    /// Ringtone, alarm and event negotiate; system sounds follow the hint
    pub fn default_for(class: PolicyClass) -> Self {
        match class {
            PolicyClass::System => Self::passive(true),
            _ => Self::negotiated(),
        }
    }
}

/// Inbound traffic from the policy authority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyEvent {
    /// Answer to `request_state`
    Reply {
        class: PolicyClass,
        ticket: PolicyTicket,
        state: PolicyState,
    },
    /// Authority-initiated command to the class holder
    StateRequest {
        class: PolicyClass,
        state: PolicyState,
    },
    /// Broadcast of the currently allowed state of a passive class
    StateHint { class: PolicyClass, allowed: bool },
}

/// Why a play request was not sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotAttempted {
    /// Class has no backing policy channel
    NoChannel,
    /// Class is held by another session
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    /// Reply will arrive as [`PolicyNotice::PlayReply`]
    Pending,
    /// Passive class answered synchronously
    Decided { granted: bool },
    NotAttempted(NotAttempted),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Release will be acknowledged as [`PolicyNotice::StopReply`]
    Pending,
    /// Nothing to release, or released synchronously
    Released,
}

/// Arbitrator output addressed to the owner of a policy session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyNotice {
    PlayReply {
        session: PolicySessionId,
        granted: bool,
    },
    StopReply {
        session: PolicySessionId,
    },
    Command {
        session: PolicySessionId,
        state: PolicyState,
    },
}

#[derive(Debug)]
struct ClassSlot {
    mode: ClassMode,
    holder: Option<PolicySessionId>,
    allowed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outstanding {
    Play(PolicyTicket),
    Stop(PolicyTicket),
}

#[derive(Debug)]
struct SessionEntry {
    class: PolicyClass,
    outstanding: Option<Outstanding>,
}

pub struct PolicyArbitrator {
    authority: Box<dyn PolicyAuthority>,
    classes: HashMap<PolicyClass, ClassSlot>,
    sessions: HashMap<PolicySessionId, SessionEntry>,
    next_session: u64,
    next_ticket: u64,
}

impl PolicyArbitrator {
    /// Create an arbitrator; classes missing from `settings` use their defaults
    pub fn new(
        authority: Box<dyn PolicyAuthority>,
        settings: &HashMap<PolicyClass, ClassSettings>,
    ) -> Self {
        let classes = PolicyClass::ALL
            .iter()
            .map(|class| {
                let s = settings
                    .get(class)
                    .copied()
                    .unwrap_or_else(|| ClassSettings::default_for(*class));
                (
                    *class,
                    ClassSlot {
                        mode: s.mode,
                        holder: None,
                        allowed: s.allowed,
                    },
                )
            })
            .collect();

        Self {
            authority,
            classes,
            sessions: HashMap::new(),
            next_session: 1,
            next_ticket: 1,
        }
    }

    pub fn create_session(&mut self, class: PolicyClass) -> PolicySessionId {
        let id = PolicySessionId(self.next_session);
        self.next_session += 1;
        self.sessions.insert(
            id,
            SessionEntry {
                class,
                outstanding: None,
            },
        );
        debug!("Created {} for class {}", id, class);
        id
    }

    /// Forget a session; its holder slot is vacated and late replies are dropped
    pub fn release_session(&mut self, id: PolicySessionId) {
        if let Some(entry) = self.sessions.remove(&id) {
            if let Some(slot) = self.classes.get_mut(&entry.class) {
                if slot.holder == Some(id) {
                    slot.holder = None;
                }
            }
        }
    }

    pub fn class_of(&self, id: PolicySessionId) -> Option<PolicyClass> {
        self.sessions.get(&id).map(|e| e.class)
    }

    pub fn holder(&self, class: PolicyClass) -> Option<PolicySessionId> {
        self.classes.get(&class).and_then(|s| s.holder)
    }

    pub fn is_allowed(&self, class: PolicyClass) -> bool {
        self.classes.get(&class).map(|s| s.allowed).unwrap_or(false)
    }

    pub fn mode(&self, class: PolicyClass) -> ClassMode {
        self.classes
            .get(&class)
            .map(|s| s.mode)
            .unwrap_or(ClassMode::Disabled)
    }

    /// Ask for play permission
    pub fn request_play(&mut self, id: PolicySessionId) -> PlayOutcome {
        let Some(class) = self.class_of(id) else {
            warn!("Play request for unknown {}", id);
            return PlayOutcome::NotAttempted(NotAttempted::NoChannel);
        };
        let Some(slot) = self.classes.get_mut(&class) else {
            return PlayOutcome::NotAttempted(NotAttempted::NoChannel);
        };

        if slot.mode == ClassMode::Disabled {
            debug!("Class {} has no policy channel", class);
            return PlayOutcome::NotAttempted(NotAttempted::NoChannel);
        }

        if let Some(holder) = slot.holder {
            info!("Class {} busy (held by {}), {} not attempted", class, holder, id);
            return PlayOutcome::NotAttempted(NotAttempted::Busy);
        }

        match slot.mode {
            ClassMode::Negotiated => {
                slot.holder = Some(id);
                let ticket = self.issue_ticket();
                if let Some(entry) = self.sessions.get_mut(&id) {
                    entry.outstanding = Some(Outstanding::Play(ticket));
                }
                debug!("{} requesting play for class {}", id, class);
                self.authority.request_state(class, PolicyState::Play, ticket);
                PlayOutcome::Pending
            }
            _ => {
                let granted = slot.allowed;
                debug!("Passive class {} decided granted={} for {}", class, granted, id);
                PlayOutcome::Decided { granted }
            }
        }
    }

    /// Release play permission
    pub fn request_stop(&mut self, id: PolicySessionId) -> StopOutcome {
        let Some(class) = self.class_of(id) else {
            return StopOutcome::Released;
        };
        let Some(slot) = self.classes.get_mut(&class) else {
            return StopOutcome::Released;
        };

        match slot.mode {
            ClassMode::Disabled | ClassMode::Passive => StopOutcome::Released,
            ClassMode::Negotiated => {
                if slot.holder.is_some_and(|h| h != id) {
                    debug!("{} is not the holder of class {}", id, class);
                    return StopOutcome::Released;
                }
                slot.holder = Some(id);
                let ticket = self.issue_ticket();
                if let Some(entry) = self.sessions.get_mut(&id) {
                    entry.outstanding = Some(Outstanding::Stop(ticket));
                }
                debug!("{} requesting stop for class {}", id, class);
                self.authority.request_state(class, PolicyState::Stop, ticket);
                StopOutcome::Pending
            }
        }
    }

    /// Route authority traffic; returns the notice for the affected session
    pub fn handle(&mut self, event: PolicyEvent) -> Option<PolicyNotice> {
        match event {
            PolicyEvent::Reply {
                class,
                ticket,
                state,
            } => self.handle_reply(class, ticket, state),
            PolicyEvent::StateRequest { class, state } => {
                let holder = self.holder(class);
                match holder {
                    Some(session) => {
                        info!("Authority commands {} ({}) to {}", session, class, state);
                        Some(PolicyNotice::Command { session, state })
                    }
                    None => {
                        debug!("Command {} for class {} without holder", state, class);
                        None
                    }
                }
            }
            PolicyEvent::StateHint { class, allowed } => {
                if let Some(slot) = self.classes.get_mut(&class) {
                    debug!("Class {} hint allowed={}", class, allowed);
                    slot.allowed = allowed;
                }
                None
            }
        }
    }

    fn handle_reply(
        &mut self,
        class: PolicyClass,
        ticket: PolicyTicket,
        state: PolicyState,
    ) -> Option<PolicyNotice> {
        let (session, outstanding) = self.sessions.iter_mut().find_map(|(id, entry)| {
            let answers = match entry.outstanding {
                Some(Outstanding::Play(t)) | Some(Outstanding::Stop(t)) => t == ticket,
                None => false,
            };
            if answers {
                entry.outstanding.take().map(|o| (*id, o))
            } else {
                None
            }
        })?;

        match outstanding {
            Outstanding::Play(_) => {
                let granted = state == PolicyState::Play;
                info!("{} play reply for class {}: granted={}", session, class, granted);
                Some(PolicyNotice::PlayReply { session, granted })
            }
            Outstanding::Stop(_) => {
                if let Some(slot) = self.classes.get_mut(&class) {
                    if slot.holder == Some(session) {
                        slot.holder = None;
                    }
                }
                info!("{} released class {}", session, class);
                Some(PolicyNotice::StopReply { session })
            }
        }
    }

    fn issue_ticket(&mut self) -> PolicyTicket {
        let ticket = PolicyTicket(self.next_ticket);
        self.next_ticket += 1;
        ticket
    }
}
