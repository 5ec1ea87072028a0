//! Policy authority contract and the in-process authority
//!
//! The authority answers `request_state` asynchronously: replies re-enter the
//! daemon loop as `PolicyEvent::Reply` carrying the request's ticket.

use super::{PolicyEvent, PolicyTicket};
use crate::runtime::{DaemonEvent, EventSender};
use ntsv_common::{PolicyClass, PolicyState};
use std::collections::HashMap;
use tracing::debug;

/// System audio-policy authority
pub trait PolicyAuthority: Send {
    /// Ask for `state` on `class`; the answer must carry `ticket`
    fn request_state(&mut self, class: PolicyClass, state: PolicyState, ticket: PolicyTicket);
}

/// Authority answering every request itself on the next loop iteration
///
/// Play requests are granted for classes whose `auto_grant` is set and
/// denied otherwise. Stop requests are always acknowledged.
pub struct LocalAuthority {
    events: EventSender,
    auto_grant: HashMap<PolicyClass, bool>,
}

impl LocalAuthority {
    pub fn new(events: EventSender, auto_grant: HashMap<PolicyClass, bool>) -> Self {
        Self { events, auto_grant }
    }

    fn grants(&self, class: PolicyClass) -> bool {
        self.auto_grant.get(&class).copied().unwrap_or(true)
    }
}

impl PolicyAuthority for LocalAuthority {
    fn request_state(&mut self, class: PolicyClass, state: PolicyState, ticket: PolicyTicket) {
        let answer = match state {
            PolicyState::Play if self.grants(class) => PolicyState::Play,
            _ => PolicyState::Stop,
        };
        debug!(
            "Local authority: class {} requested {}, answering {}",
            class, state, answer
        );
        self.events.post(DaemonEvent::Policy(PolicyEvent::Reply {
            class,
            ticket,
            state: answer,
        }));
    }
}
