//! Cancellable one-shot timers driven by the main loop

use std::time::{Duration, Instant};

/// Handle returned by [`Scheduler::schedule`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerId(pub u64);

/// What a timer is for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerKind {
    /// Automatic reconnect after backoff
    Reconnect,
    /// Connect after the manual reconnect settle delay
    ManualConnect,
    /// Send a ping while live
    Keepalive,
}

/// A timer that came due
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fired {
    pub kind: TimerKind,
    /// Channel generation the timer was armed for
    pub generation: u64,
}

pub trait Scheduler {
    fn schedule(&mut self, delay: Duration, kind: TimerKind, generation: u64) -> TimerId;

    /// Cancelling an unknown or already fired timer is a no-op
    fn cancel(&mut self, id: TimerId);
}

struct Entry {
    id: TimerId,
    due: Instant,
    fired: Fired,
}

/// Deadline list polled by the event loop
#[derive(Default)]
pub struct TimerQueue {
    next_id: u64,
    entries: Vec<Entry>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|e| e.due).min()
    }

    /// Remove and return every timer due at `now`, earliest first
    pub fn pop_due(&mut self, now: Instant) -> Vec<Fired> {
        let mut due: Vec<Entry> = Vec::new();
        let mut i = 0;
        while i < self.entries.len() {
            if self.entries[i].due <= now {
                due.push(self.entries.swap_remove(i));
            } else {
                i += 1;
            }
        }
        due.sort_by_key(|e| (e.due, e.id.0));
        due.into_iter().map(|e| e.fired).collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Scheduler for TimerQueue {
    fn schedule(&mut self, delay: Duration, kind: TimerKind, generation: u64) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.entries.push(Entry {
            id,
            due: Instant::now() + delay,
            fired: Fired { kind, generation },
        });
        id
    }

    fn cancel(&mut self, id: TimerId) {
        self.entries.retain(|e| e.id != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_due_in_deadline_order() {
        let mut queue = TimerQueue::new();
        queue.schedule(Duration::from_millis(20), TimerKind::Keepalive, 1);
        queue.schedule(Duration::ZERO, TimerKind::Reconnect, 1);
        queue.schedule(Duration::from_secs(60), TimerKind::ManualConnect, 2);

        let fired = queue.pop_due(Instant::now() + Duration::from_millis(50));
        let kinds: Vec<TimerKind> = fired.iter().map(|f| f.kind).collect();
        assert_eq!(kinds, vec![TimerKind::Reconnect, TimerKind::Keepalive]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut queue = TimerQueue::new();
        let id = queue.schedule(Duration::ZERO, TimerKind::Reconnect, 3);
        queue.cancel(id);
        queue.cancel(id);
        assert!(queue.is_empty());
        assert!(queue.pop_due(Instant::now() + Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn test_next_deadline() {
        let mut queue = TimerQueue::new();
        assert!(queue.next_deadline().is_none());
        let before = Instant::now();
        queue.schedule(Duration::from_secs(5), TimerKind::Keepalive, 0);
        queue.schedule(Duration::from_secs(1), TimerKind::Reconnect, 0);
        let deadline = queue.next_deadline().unwrap();
        assert!(deadline >= before + Duration::from_secs(1));
        assert!(deadline < before + Duration::from_secs(5));
    }
}
