//! Timer scheduling for the core logic task
//!
//! Each `(address, kind)` pair has at most one sleeping task. Re-arming a
//! pair aborts the previous sleep; a firing that still slips through carries
//! an old generation and the session ignores it.

use std::collections::HashMap;
use std::time::Duration;

use bubbles_core::{RadioAddress, TimerKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

/// A timer that ran out, on its way back to the core logic task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired {
    pub address: RadioAddress,
    pub timer: TimerKind,
    pub generation: u64,
}

pub type TimerReceiver = mpsc::Receiver<TimerFired>;

#[derive(Debug)]
pub struct TimerScheduler {
    fired: mpsc::Sender<TimerFired>,
    armed: HashMap<(RadioAddress, TimerKind), JoinHandle<()>>,
}

impl TimerScheduler {
    pub fn new(capacity: usize) -> (Self, TimerReceiver) {
        let (fired, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                fired,
                armed: HashMap::new(),
            },
            receiver,
        )
    }

    pub fn arm(&mut self, address: RadioAddress, timer: TimerKind, delay: Duration, generation: u64) {
        self.armed.retain(|_, handle| !handle.is_finished());

        let fired = self.fired.clone();
        let firing = TimerFired {
            address: address.clone(),
            timer,
            generation,
        };
        trace!(%address, %timer, generation, ?delay, "timer armed");
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = fired.send(firing).await;
        });
        if let Some(previous) = self.armed.insert((address, timer), handle) {
            previous.abort();
        }
    }

    pub fn disarm_all(&mut self) {
        for (_, handle) in self.armed.drain() {
            handle.abort();
        }
    }

    /// Timers still sleeping
    pub fn pending(&self) -> usize {
        self.armed.values().filter(|handle| !handle.is_finished()).count()
    }
}

impl Drop for TimerScheduler {
    fn drop(&mut self) {
        self.disarm_all();
    }
}
