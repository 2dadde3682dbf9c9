//! Test utilities for deterministic testing of the bubbles protocol
//!
//! A controllable clock plus helpers that build the radio events a peer would
//! produce, so orchestrator tests read as a script of what the radio saw.

#![allow(dead_code)]

use bubbles_core::{
    AppEvent, BubblesConfig, Effect, Orchestrator, Payload, PayloadFragmenter, PayloadKind,
    PeerIdentity, RadioAddress, RadioEvent, Reaction, TimeSource, TimerKind, Timestamp,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ----------------------------------------------------------------------------
// Mock Time Source
// ----------------------------------------------------------------------------

/// Mock time source for deterministic testing
#[derive(Debug, Clone)]
pub struct MockTimeSource {
    current_time: Arc<AtomicU64>,
}

impl MockTimeSource {
    /// Create a new mock time source starting at time 0
    pub fn new() -> Self {
        Self {
            current_time: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create a new mock time source starting at a specific time
    pub fn new_at(start_time: u64) -> Self {
        Self {
            current_time: Arc::new(AtomicU64::new(start_time)),
        }
    }

    /// Advance time by the specified number of milliseconds
    pub fn advance(&self, millis: u64) {
        self.current_time.fetch_add(millis, Ordering::SeqCst);
    }

    /// Set the time to a specific value
    pub fn set_time(&self, millis: u64) {
        self.current_time.store(millis, Ordering::SeqCst);
    }
}

impl Default for MockTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MockTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.current_time.load(Ordering::SeqCst))
    }
}

// ----------------------------------------------------------------------------
// Event Builders
// ----------------------------------------------------------------------------

pub fn identity(value: &str) -> PeerIdentity {
    PeerIdentity::new(value).unwrap()
}

pub fn address(value: &str) -> RadioAddress {
    RadioAddress::new(value)
}

/// Advertisement body announcing `who`
pub fn advertisement(who: &str) -> Vec<u8> {
    Payload::Presence {
        identity: identity(who),
        name: None,
    }
    .encode_body()
    .unwrap()
}

pub fn discovered(at: &str, who: Option<&str>, rssi: i16) -> RadioEvent {
    RadioEvent::Discovered {
        address: address(at),
        rssi,
        advertisement: who.map(advertisement),
    }
}

/// Attribute writes carrying `payload` from `at`
pub fn written(at: &str, payload: &Payload, config: &BubblesConfig) -> Vec<RadioEvent> {
    PayloadFragmenter::encode(payload, config.codec.max_chunk_size)
        .unwrap()
        .into_iter()
        .map(|chunk| RadioEvent::AttributeWritten {
            address: address(at),
            chunk,
        })
        .collect()
}

pub fn presence(who: &str, name: Option<&str>) -> Payload {
    Payload::Presence {
        identity: identity(who),
        name: name.map(str::to_string),
    }
}

pub fn presence_written(at: &str) -> RadioEvent {
    RadioEvent::WriteCompleted {
        address: address(at),
        kind: PayloadKind::Presence,
    }
}

// ----------------------------------------------------------------------------
// Orchestrator Helpers
// ----------------------------------------------------------------------------

/// A started orchestrator with test timers
pub fn started(local: &str) -> Orchestrator {
    let mut orchestrator = Orchestrator::new(BubblesConfig::testing(), identity(local), None);
    orchestrator.start().unwrap();
    orchestrator
}

/// Feed events in order, collecting every reaction
pub fn feed(orchestrator: &mut Orchestrator, events: Vec<RadioEvent>, now: Timestamp) -> Reaction {
    let mut total = Reaction::new();
    for event in events {
        let reaction = orchestrator.handle_event(event, now);
        total.effects.extend(reaction.effects);
        total.app_events.extend(reaction.app_events);
    }
    total
}

/// Inbound link from `who` at `at`, through to an active session
pub fn activate(orchestrator: &mut Orchestrator, at: &str, who: &str, now: Timestamp) -> Reaction {
    let config = orchestrator.config().clone();
    let mut events = vec![RadioEvent::Connected { address: address(at) }];
    events.extend(written(at, &presence(who, None), &config));
    events.push(presence_written(at));
    feed(orchestrator, events, now)
}

pub fn entered(reaction: &Reaction) -> Vec<String> {
    reaction
        .app_events
        .iter()
        .filter_map(|event| match event {
            AppEvent::PeerEntered { peer } => Some(peer.identity.to_string()),
            _ => None,
        })
        .collect()
}

pub fn exited(reaction: &Reaction) -> Vec<String> {
    reaction
        .app_events
        .iter()
        .filter_map(|event| match event {
            AppEvent::PeerExited { identity } => Some(identity.to_string()),
            _ => None,
        })
        .collect()
}

pub fn connects(reaction: &Reaction) -> Vec<String> {
    reaction
        .effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::Connect { address } => Some(address.to_string()),
            _ => None,
        })
        .collect()
}

pub fn writes_of(reaction: &Reaction, kind: PayloadKind) -> Vec<String> {
    reaction
        .effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::Write {
                address, kind: k, ..
            } if *k == kind => Some(address.to_string()),
            _ => None,
        })
        .collect()
}

/// Latest scheduled timer of `kind` for `at`
pub fn timer(reaction: &Reaction, at: &str, kind: TimerKind) -> Option<(u64, u64)> {
    reaction.effects.iter().rev().find_map(|effect| match effect {
        Effect::ScheduleTimer {
            address,
            timer,
            delay,
            generation,
        } if address.as_str() == at && *timer == kind => {
            Some((delay.as_millis() as u64, *generation))
        }
        _ => None,
    })
}
