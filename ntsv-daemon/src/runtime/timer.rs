//! Deterministic timer queue for the daemon loop
//!
//! Timers are plain data: the loop sleeps until the earliest deadline and
//! dispatches whatever target is due. Cancellation is O(log n) and a
//! cancelled timer never fires.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;

/// Handle returned by [`TimerQueue::schedule`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

pub struct TimerQueue<T> {
    next_id: u64,
    entries: BTreeMap<(Instant, u64), T>,
    deadlines: HashMap<u64, Instant>,
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            entries: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }

    /// Schedule `target` to fire `after` from now
    pub fn schedule(&mut self, after: Duration, target: T) -> TimerId {
        self.schedule_at(Instant::now() + after, target)
    }

    pub fn schedule_at(&mut self, deadline: Instant, target: T) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert((deadline, id), target);
        self.deadlines.insert(id, deadline);
        TimerId(id)
    }

    /// Cancel a pending timer, returning its target if it had not fired
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        let deadline = self.deadlines.remove(&id.0)?;
        self.entries.remove(&(deadline, id.0))
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Remove and return the earliest timer due at or before `now`
    ///
    /// Timers sharing a deadline fire in scheduling order.
    pub fn pop_due(&mut self, now: Instant) -> Option<(TimerId, T)> {
        let key = *self.entries.keys().next()?;
        if key.0 > now {
            return None;
        }
        let target = self.entries.remove(&key)?;
        self.deadlines.remove(&key.1);
        Some((TimerId(key.1), target))
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.deadlines.contains_key(&id.0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
