//! Bounded outbound queue
//!
//! Holds payloads for a session until it is active. On overflow the oldest
//! entry is dropped. Only the newest location matters, so a queued location is
//! replaced rather than followed.

use std::collections::VecDeque;

use crate::payload::{Payload, PayloadKind};

#[derive(Debug, Clone)]
pub struct OutboundQueue {
    entries: VecDeque<Payload>,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Enqueue, returning the payload dropped to make room, if any
    pub fn push(&mut self, payload: Payload) -> Option<Payload> {
        if payload.kind() == PayloadKind::Location {
            if let Some(slot) = self
                .entries
                .iter_mut()
                .find(|queued| queued.kind() == PayloadKind::Location)
            {
                return Some(core::mem::replace(slot, payload));
            }
        }

        let dropped = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(payload);
        dropped
    }

    /// Put another queue's entries ahead of ours, still bounded
    pub fn prepend(&mut self, older: OutboundQueue) {
        let mut merged = OutboundQueue::new(self.capacity);
        for payload in older.entries.into_iter().chain(self.entries.drain(..)) {
            merged.push(payload);
        }
        *self = merged;
    }

    pub fn drain(&mut self) -> Vec<Payload> {
        self.entries.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
