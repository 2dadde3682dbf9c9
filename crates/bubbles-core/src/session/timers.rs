//! Per-session timer bookkeeping
//!
//! Timers are scheduled outside the core; each one carries the generation it
//! was armed with. Re-arming or cancelling a kind bumps its generation, so a
//! timer that fires late is recognised as stale and ignored.

use core::fmt;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerKind {
    /// Backoff before the next connect attempt
    ConnectRetry,
    /// Bound on the presence exchange after a link comes up
    Handshake,
    /// Periodic presence re-send while active
    KeepAlive,
    /// Oldest reassembly buffer times out
    Reassembly,
    /// Exit grace deadline of an unlinked session
    Expiry,
}

impl TimerKind {
    pub const ALL: [TimerKind; 5] = [
        TimerKind::ConnectRetry,
        TimerKind::Handshake,
        TimerKind::KeepAlive,
        TimerKind::Reassembly,
        TimerKind::Expiry,
    ];

    fn slot(self) -> usize {
        match self {
            TimerKind::ConnectRetry => 0,
            TimerKind::Handshake => 1,
            TimerKind::KeepAlive => 2,
            TimerKind::Reassembly => 3,
            TimerKind::Expiry => 4,
        }
    }
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TimerSet {
    generations: [u64; 5],
    armed: [bool; 5],
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `kind`, invalidating any earlier timer of the same kind
    pub fn arm(&mut self, kind: TimerKind) -> u64 {
        let slot = kind.slot();
        self.generations[slot] += 1;
        self.armed[slot] = true;
        self.generations[slot]
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        let slot = kind.slot();
        if self.armed[slot] {
            self.generations[slot] += 1;
            self.armed[slot] = false;
        }
    }

    pub fn cancel_all(&mut self) {
        for kind in TimerKind::ALL {
            self.cancel(kind);
        }
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.armed[kind.slot()]
    }

    /// Consume a firing; true only for the latest armed generation
    pub fn fire(&mut self, kind: TimerKind, generation: u64) -> bool {
        let slot = kind.slot();
        if self.armed[slot] && self.generations[slot] == generation {
            self.armed[slot] = false;
            true
        } else {
            false
        }
    }
}
