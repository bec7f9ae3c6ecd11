//! Named-purpose timers for the capture state machine.
//!
//! The scheduler never sleeps by itself: callers pass the current instant in
//! and collect the timers that expired. Tests drive it with synthetic
//! instants, the async session drives it with `tokio::time`.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// What a timer is for. At most one timer per purpose is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerPurpose {
    ClickWindow,
    KeyAggregation,
    ScrollAggregation,
    MoveSettle,
    IdleWait,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    deadlines: HashMap<TimerPurpose, Instant>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the timer for `purpose` to fire `after` from `now`.
    pub fn arm(&mut self, purpose: TimerPurpose, now: Instant, after: Duration) {
        self.deadlines.insert(purpose, now + after);
    }

    /// Returns true if the timer was armed.
    pub fn cancel(&mut self, purpose: TimerPurpose) -> bool {
        self.deadlines.remove(&purpose).is_some()
    }

    pub fn cancel_all(&mut self) {
        self.deadlines.clear();
    }

    pub fn is_armed(&self, purpose: TimerPurpose) -> bool {
        self.deadlines.contains_key(&purpose)
    }

    pub fn deadline(&self, purpose: TimerPurpose) -> Option<Instant> {
        self.deadlines.get(&purpose).copied()
    }

    /// Earliest armed deadline, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Disarm and return every timer due at `now`, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<TimerPurpose> {
        let mut due: Vec<(Instant, TimerPurpose)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(purpose, deadline)| (*deadline, *purpose))
            .collect();
        due.sort();
        for (_, purpose) in &due {
            self.deadlines.remove(purpose);
        }
        due.into_iter().map(|(_, purpose)| purpose).collect()
    }

    /// Disarm and return the single earliest timer due at `now`, with the
    /// instant it was due.
    pub fn take_next_due(&mut self, now: Instant) -> Option<(TimerPurpose, Instant)> {
        let (purpose, deadline) = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .min_by_key(|(purpose, deadline)| (**deadline, **purpose))
            .map(|(purpose, deadline)| (*purpose, *deadline))?;
        self.deadlines.remove(&purpose);
        Some((purpose, deadline))
    }
}
