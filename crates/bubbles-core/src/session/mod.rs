//! Per-address sessions
//!
//! [`PeerSession`] wraps the pure [`SessionState`] machine with everything one
//! radio address accumulates: timers, the outbound queue, reassembly buffers
//! and the proximity estimate. It turns transition effects into
//! [`SessionOutput`]s for the orchestrator to carry out.

pub mod queue;
pub mod state;
pub mod timers;

pub use queue::OutboundQueue;
pub use state::{
    Role, SessionEffect, SessionInput, SessionState, StateTransition, TransitionContext,
};
pub use timers::{TimerKind, TimerSet};

use core::time::Duration;

use tracing::{debug, trace};

use crate::config::BubblesConfig;
use crate::errors::{PayloadError, SessionError};
use crate::payload::{Chunk, Payload, Reassembler};
use crate::proximity::ProximityEstimator;
use crate::types::{PeerIdentity, RadioAddress, Timestamp};

/// Work the orchestrator performs on behalf of a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutput {
    Connect,
    Disconnect,
    SendPresence,
    Send(Payload),
    ArmTimer {
        timer: TimerKind,
        delay: Duration,
        generation: u64,
    },
    Activated,
    Deactivated,
    Exited,
}

/// Everything known about one radio address
#[derive(Debug)]
pub struct PeerSession {
    address: RadioAddress,
    identity: Option<PeerIdentity>,
    advertised_identity: Option<PeerIdentity>,
    state: SessionState,
    created_at: Timestamp,
    last_seen: Timestamp,
    /// Set when a link drops, cleared only when a new one comes up
    unlinked_since: Option<Timestamp>,
    timers: TimerSet,
    pending: OutboundQueue,
    /// Inbound payloads that arrived before this side went active
    held: Vec<Payload>,
    reassembler: Reassembler,
    proximity: ProximityEstimator,
}

impl PeerSession {
    pub fn new(address: RadioAddress, now: Timestamp, config: &BubblesConfig) -> Self {
        Self {
            address,
            identity: None,
            advertised_identity: None,
            state: SessionState::Discovered,
            created_at: now,
            last_seen: now,
            unlinked_since: None,
            timers: TimerSet::new(),
            pending: OutboundQueue::new(config.session.outbound_queue_capacity),
            held: Vec::new(),
            reassembler: Reassembler::new(
                config.codec.reassembly_timeout,
                config.codec.max_concurrent_reassemblies,
            ),
            proximity: ProximityEstimator::new(
                config.proximity.clone(),
                config.session.exit_grace_period,
            ),
        }
    }

    pub fn address(&self) -> &RadioAddress {
        &self.address
    }

    pub fn identity(&self) -> Option<&PeerIdentity> {
        self.identity.as_ref()
    }

    /// Identity advertised by the peer, not yet confirmed by a presence exchange
    pub fn advertised_identity(&self) -> Option<&PeerIdentity> {
        self.advertised_identity.as_ref()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.state.role()
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn last_seen(&self) -> Timestamp {
        self.last_seen
    }

    pub fn unlinked_since(&self) -> Option<Timestamp> {
        self.unlinked_since
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn proximity(&self) -> &ProximityEstimator {
        &self.proximity
    }

    pub fn distance(&self, now: Timestamp) -> Option<f64> {
        self.proximity.distance(now)
    }

    pub(crate) fn set_identity(&mut self, identity: PeerIdentity) {
        self.identity = Some(identity);
    }

    pub fn note_advertised(&mut self, identity: PeerIdentity) {
        self.advertised_identity = Some(identity);
    }

    /// Any radio activity from this address
    pub fn touch(&mut self, now: Timestamp) {
        self.last_seen = self.last_seen.max(now);
    }

    pub fn record_signal(&mut self, rssi: i16, now: Timestamp) {
        self.touch(now);
        self.proximity.record(rssi, now);
    }

    // ------------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------------

    /// Drive the state machine; on error the session is left untouched
    pub fn apply(
        &mut self,
        input: SessionInput,
        now: Timestamp,
        config: &BubblesConfig,
    ) -> Result<Vec<SessionOutput>, SessionError> {
        let ctx = TransitionContext {
            now,
            config,
            bound: self.identity.is_some(),
            unlinked_since: self.unlinked_since,
        };
        let from = self.state.name();
        let was_linked = self.state.is_linked();
        let transition = self.state.clone().transition(input.clone(), ctx)?;
        self.state = transition.new_state;
        if self.state.is_linked() {
            self.unlinked_since = None;
        } else if was_linked {
            self.unlinked_since = Some(now);
        }

        if from != self.state.name() {
            debug!(
                address = %self.address,
                identity = ?self.identity.as_ref().map(|i| i.as_str()),
                "{} -> {} ({})",
                from,
                self.state.name(),
                input
            );
        }

        let mut outputs = Vec::new();
        for effect in transition.effects {
            match effect {
                SessionEffect::Connect => outputs.push(SessionOutput::Connect),
                SessionEffect::Disconnect => outputs.push(SessionOutput::Disconnect),
                SessionEffect::SendPresence => outputs.push(SessionOutput::SendPresence),
                SessionEffect::FlushQueue => {
                    outputs.extend(self.pending.drain().into_iter().map(SessionOutput::Send))
                }
                SessionEffect::DiscardQueue => {
                    if !self.pending.is_empty() {
                        debug!(address = %self.address, dropped = self.pending.len(), "discarding outbound queue");
                    }
                    self.pending.clear();
                    self.held.clear();
                }
                SessionEffect::ResetReassembly => {
                    self.reassembler.clear();
                    self.timers.cancel(TimerKind::Reassembly);
                }
                SessionEffect::Arm { timer, delay } => {
                    let generation = self.timers.arm(timer);
                    outputs.push(SessionOutput::ArmTimer {
                        timer,
                        delay,
                        generation,
                    });
                }
                SessionEffect::Cancel(timer) => self.timers.cancel(timer),
                SessionEffect::ScheduleExpiry => outputs.push(self.schedule_expiry(now, config)),
                SessionEffect::Activated => outputs.push(SessionOutput::Activated),
                SessionEffect::Deactivated => outputs.push(SessionOutput::Deactivated),
            }
        }

        if self.state.is_exited() {
            self.timers.cancel_all();
            outputs.push(SessionOutput::Exited);
        }
        Ok(outputs)
    }

    /// When an unlinked session exits if nothing changes
    ///
    /// A bound peer is measured from the moment its link dropped: sightings
    /// and failed reconnects do not extend it. An unbound address lives as
    /// long as it keeps being seen.
    pub fn expiry_deadline(&self, config: &BubblesConfig) -> Timestamp {
        let grace = config.session.exit_grace_period;
        match (&self.state, self.unlinked_since) {
            (SessionState::Disconnected { since }, _) => *since + grace,
            (_, Some(since)) if self.identity.is_some() => since + grace,
            _ => self.last_seen + grace,
        }
    }

    /// Arm the exit timer when the session has no link and none is pending
    pub fn ensure_expiry(&mut self, now: Timestamp, config: &BubblesConfig) -> Option<SessionOutput> {
        let unlinked = !self.state.is_linked() && !self.state.is_exited();
        if unlinked && !self.timers.is_armed(TimerKind::Expiry) {
            Some(self.schedule_expiry(now, config))
        } else {
            None
        }
    }

    fn schedule_expiry(&mut self, now: Timestamp, config: &BubblesConfig) -> SessionOutput {
        let remaining = self.expiry_deadline(config).since(now);
        let generation = self.timers.arm(TimerKind::Expiry);
        SessionOutput::ArmTimer {
            timer: TimerKind::Expiry,
            delay: Duration::from_millis(remaining.max(1)),
            generation,
        }
    }

    /// React to a timer firing; stale generations are ignored
    pub fn on_timer(
        &mut self,
        timer: TimerKind,
        generation: u64,
        now: Timestamp,
        config: &BubblesConfig,
    ) -> Result<Vec<SessionOutput>, SessionError> {
        if !self.timers.fire(timer, generation) {
            trace!(address = %self.address, %timer, generation, "stale timer ignored");
            return Ok(Vec::new());
        }

        match timer {
            TimerKind::ConnectRetry => self.apply(SessionInput::RetryDue, now, config),
            TimerKind::Handshake => self.apply(SessionInput::HandshakeExpired, now, config),
            TimerKind::KeepAlive => {
                if !self.is_active() {
                    return Ok(Vec::new());
                }
                let generation = self.timers.arm(TimerKind::KeepAlive);
                Ok(vec![
                    SessionOutput::SendPresence,
                    SessionOutput::ArmTimer {
                        timer: TimerKind::KeepAlive,
                        delay: config.session.keepalive_interval,
                        generation,
                    },
                ])
            }
            TimerKind::Reassembly => {
                for expired in self.reassembler.expire(now) {
                    debug!(address = %self.address, "{}", expired);
                }
                Ok(self.reassembly_timer(now).into_iter().collect())
            }
            TimerKind::Expiry => {
                if self.state.is_linked() || self.state.is_exited() {
                    return Ok(Vec::new());
                }
                if now >= self.expiry_deadline(config) {
                    self.apply(SessionInput::GraceExpired, now, config)
                } else {
                    Ok(vec![self.schedule_expiry(now, config)])
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Payloads
    // ------------------------------------------------------------------------

    /// Feed one inbound attribute write through reassembly
    pub fn receive_chunk(
        &mut self,
        bytes: &[u8],
        now: Timestamp,
    ) -> Result<Option<Payload>, PayloadError> {
        self.touch(now);
        let chunk = Chunk::from_bytes(bytes)?;
        self.reassembler.accept(chunk, now)
    }

    /// Arm the reassembly timeout if buffers are pending and no timer is set
    pub fn reassembly_timer(&mut self, now: Timestamp) -> Option<SessionOutput> {
        if self.timers.is_armed(TimerKind::Reassembly) {
            return None;
        }
        let deadline = self.reassembler.next_deadline()?;
        let generation = self.timers.arm(TimerKind::Reassembly);
        Some(SessionOutput::ArmTimer {
            timer: TimerKind::Reassembly,
            delay: Duration::from_millis(deadline.since(now).max(1)),
            generation,
        })
    }

    /// Queue an outbound payload; returns it back when it can go out right away
    pub fn enqueue(&mut self, payload: Payload) -> Option<Payload> {
        if self.is_active() {
            return Some(payload);
        }
        if let Some(dropped) = self.pending.push(payload) {
            debug!(address = %self.address, kind = %dropped.kind(), "outbound queue full, dropped oldest");
        }
        None
    }

    /// Keep an inbound payload until this side is active
    pub fn hold(&mut self, payload: Payload, capacity: usize) {
        if self.held.len() >= capacity {
            self.held.remove(0);
        }
        self.held.push(payload);
    }

    pub fn take_held(&mut self) -> Vec<Payload> {
        core::mem::take(&mut self.held)
    }

    /// Take over the history of a retired session for the same identity
    pub fn absorb(&mut self, retired: &mut PeerSession) {
        let capacity = retired.pending.capacity();
        self.pending
            .prepend(core::mem::replace(&mut retired.pending, OutboundQueue::new(capacity)));
        self.proximity.absorb(retired.proximity.clone());
        self.last_seen = self.last_seen.max(retired.last_seen);
        self.created_at = self.created_at.min(retired.created_at);
        let mut held = core::mem::take(&mut retired.held);
        held.append(&mut self.held);
        self.held = held;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::PayloadFragmenter;

    fn config() -> BubblesConfig {
        BubblesConfig::default()
    }

    fn session() -> PeerSession {
        PeerSession::new(RadioAddress::new("aa:bb"), Timestamp::new(0), &config())
    }

    fn arm_of(outputs: &[SessionOutput], kind: TimerKind) -> Option<(Duration, u64)> {
        outputs.iter().find_map(|o| match o {
            SessionOutput::ArmTimer {
                timer,
                delay,
                generation,
            } if *timer == kind => Some((*delay, *generation)),
            _ => None,
        })
    }

    #[test]
    fn test_queue_flushes_on_activation() {
        let config = config();
        let mut session = session();
        assert!(session
            .enqueue(Payload::Message { text: "early".into() })
            .is_none());
        assert_eq!(session.pending_len(), 1);

        let now = Timestamp::new(100);
        session.apply(SessionInput::LinkUp, now, &config).unwrap();
        session.set_identity(PeerIdentity::new("bob").unwrap());
        session.apply(SessionInput::PresenceBound, now, &config).unwrap();
        let outputs = session
            .apply(SessionInput::PresenceWritten, now, &config)
            .unwrap();

        assert!(outputs.contains(&SessionOutput::Activated));
        assert!(outputs.contains(&SessionOutput::Send(Payload::Message {
            text: "early".into()
        })));
        assert_eq!(session.pending_len(), 0);
        assert!(session
            .enqueue(Payload::Message { text: "now".into() })
            .is_some());
    }

    #[test]
    fn test_stale_timer_after_state_change_is_ignored() {
        let config = config();
        let mut session = session();
        let now = Timestamp::new(0);

        let outputs = session.apply(SessionInput::LinkUp, now, &config).unwrap();
        let (delay, generation) = arm_of(&outputs, TimerKind::Handshake).unwrap();
        assert_eq!(delay, config.session.handshake_timeout);

        session.apply(SessionInput::LinkLost, now, &config).unwrap();
        let outputs = session
            .on_timer(TimerKind::Handshake, generation, now, &config)
            .unwrap();
        assert!(outputs.is_empty());
        assert_eq!(session.state(), &SessionState::Discovered);
    }

    #[test]
    fn test_expiry_waits_for_deadline() {
        let config = config();
        let mut session = session();
        let output = session.ensure_expiry(Timestamp::new(0), &config).unwrap();
        let SessionOutput::ArmTimer { generation, .. } = output else {
            panic!("expected timer");
        };

        // a sighting pushes the deadline out
        session.touch(Timestamp::new(20_000));
        let outputs = session
            .on_timer(TimerKind::Expiry, generation, Timestamp::new(30_000), &config)
            .unwrap();
        let (delay, generation) = arm_of(&outputs, TimerKind::Expiry).unwrap();
        assert_eq!(delay, Duration::from_secs(20));

        let outputs = session
            .on_timer(TimerKind::Expiry, generation, Timestamp::new(50_000), &config)
            .unwrap();
        assert_eq!(outputs.last(), Some(&SessionOutput::Exited));
        assert!(session.state().is_exited());
    }

    #[test]
    fn test_sightings_do_not_extend_bound_peer_grace() {
        let config = config();
        let grace = config.session.exit_grace_period;
        let mut session = session();
        session.apply(SessionInput::LinkUp, Timestamp::new(0), &config).unwrap();
        session.set_identity(PeerIdentity::new("bob").unwrap());

        let dropped = Timestamp::new(1_000);
        let outputs = session.apply(SessionInput::LinkLost, dropped, &config).unwrap();
        let (_, generation) = arm_of(&outputs, TimerKind::Expiry).unwrap();
        assert_eq!(session.unlinked_since(), Some(dropped));

        // still advertising, so a reconnect is under way
        let later = Timestamp::new(5_000);
        session.touch(later);
        session.apply(SessionInput::Pursue, later, &config).unwrap();
        assert_eq!(session.expiry_deadline(&config), dropped + grace);

        let outputs = session
            .on_timer(TimerKind::Expiry, generation, dropped + grace, &config)
            .unwrap();
        assert_eq!(outputs.first(), Some(&SessionOutput::Disconnect));
        assert_eq!(outputs.last(), Some(&SessionOutput::Exited));
    }

    #[test]
    fn test_new_link_clears_unlinked_mark() {
        let config = config();
        let mut session = session();
        session.apply(SessionInput::LinkUp, Timestamp::new(0), &config).unwrap();
        session.apply(SessionInput::LinkLost, Timestamp::new(10), &config).unwrap();
        assert_eq!(session.unlinked_since(), Some(Timestamp::new(10)));

        session.apply(SessionInput::LinkUp, Timestamp::new(20), &config).unwrap();
        assert_eq!(session.unlinked_since(), None);
    }

    #[test]
    fn test_reassembly_timer_discards_partial_payload() {
        let config = config();
        let mut session = session();
        let chunks = PayloadFragmenter::encode(
            &Payload::Message {
                text: "a message longer than one chunk".into(),
            },
            config.codec.max_chunk_size,
        )
        .unwrap();
        assert!(chunks.len() > 1);

        let now = Timestamp::new(1_000);
        assert_eq!(session.receive_chunk(&chunks[0], now), Ok(None));
        let output = session.reassembly_timer(now).unwrap();
        let SessionOutput::ArmTimer {
            delay, generation, ..
        } = output
        else {
            panic!("expected timer");
        };
        assert_eq!(delay, config.codec.reassembly_timeout);
        assert!(session.reassembly_timer(now).is_none());

        let later = now + config.codec.reassembly_timeout;
        let outputs = session
            .on_timer(TimerKind::Reassembly, generation, later, &config)
            .unwrap();
        assert!(outputs.is_empty());

        // the tail alone never completes
        for chunk in &chunks[1..] {
            assert_eq!(session.receive_chunk(chunk, later), Ok(None));
        }
    }

    #[test]
    fn test_absorb_migrates_history() {
        let config = config();
        let mut retired = session();
        retired.record_signal(-60, Timestamp::new(5_000));
        retired.enqueue(Payload::Message { text: "queued".into() });

        let mut current =
            PeerSession::new(RadioAddress::new("cc:dd"), Timestamp::new(6_000), &config);
        current.absorb(&mut retired);

        assert_eq!(current.pending_len(), 1);
        assert_eq!(current.created_at(), Timestamp::new(0));
        assert!(current.distance(Timestamp::new(6_000)).is_some());
    }
}
