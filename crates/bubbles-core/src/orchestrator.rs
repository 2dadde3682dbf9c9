//! Orchestrator
//!
//! The single owner of every session and every published [`Peer`]. It takes
//! commands, radio events and timer firings one at a time and answers each with
//! a [`Reaction`]: the effects the runtime must carry out and the events the
//! application must see. It performs no IO and never reads the clock.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::channel::{AppEvent, Effect, RadioEvent};
use crate::config::BubblesConfig;
use crate::errors::{PayloadError, Result};
use crate::payload::{Payload, PayloadFragmenter, PayloadKind};
use crate::peer::Peer;
use crate::registry::{BindOutcome, PeerRegistry};
use crate::session::{SessionInput, SessionOutput, SessionState, TimerKind};
use crate::types::{Coordinates, Location, PeerIdentity, RadioAddress, Timestamp};

// ----------------------------------------------------------------------------
// Reaction
// ----------------------------------------------------------------------------

/// Everything one input produced
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Reaction {
    pub effects: Vec<Effect>,
    pub app_events: Vec<AppEvent>,
}

impl Reaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty() && self.app_events.is_empty()
    }

    pub fn into_parts(self) -> (Vec<Effect>, Vec<AppEvent>) {
        (self.effects, self.app_events)
    }

    fn effect(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    fn event(&mut self, event: AppEvent) {
        self.app_events.push(event);
    }
}

// ----------------------------------------------------------------------------
// Peer Entries
// ----------------------------------------------------------------------------

/// A peer record; created on the first presence, announced on first activation
#[derive(Debug, Clone)]
struct PeerEntry {
    peer: Peer,
    announced: bool,
}

// ----------------------------------------------------------------------------
// Orchestrator
// ----------------------------------------------------------------------------

pub struct Orchestrator {
    config: BubblesConfig,
    local_identity: PeerIdentity,
    local_name: Option<String>,
    local_location: Option<Location>,
    chunk_size: usize,
    running: bool,
    registry: PeerRegistry,
    peers: BTreeMap<PeerIdentity, PeerEntry>,
}

impl Orchestrator {
    pub fn new(config: BubblesConfig, local_identity: PeerIdentity, local_name: Option<String>) -> Self {
        let chunk_size = config.codec.max_chunk_size;
        Self {
            config,
            local_identity,
            local_name,
            local_location: None,
            chunk_size,
            running: false,
            registry: PeerRegistry::new(),
            peers: BTreeMap::new(),
        }
    }

    /// Clamp the chunk size to what the radio accepts
    pub fn set_attribute_limit(&mut self, limit: Option<usize>) {
        self.chunk_size = match limit {
            Some(limit) => self.config.codec.max_chunk_size.min(limit),
            None => self.config.codec.max_chunk_size,
        };
    }

    pub fn config(&self) -> &BubblesConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn local_identity(&self) -> &PeerIdentity {
        &self.local_identity
    }

    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    pub fn local_location(&self) -> Option<&Location> {
        self.local_location.as_ref()
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    fn presence(&self) -> Payload {
        Payload::Presence {
            identity: self.local_identity.clone(),
            name: self.local_name.clone(),
        }
    }

    fn presence_body(&self) -> Result<Vec<u8>> {
        Ok(self.presence().encode_body()?)
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Begin advertising and scanning; a no-op while already running
    pub fn start(&mut self) -> Result<Reaction> {
        let mut reaction = Reaction::new();
        if self.running {
            debug!("communications already started");
            return Ok(reaction);
        }
        let presence = self.presence_body()?;
        self.running = true;
        info!(identity = %self.local_identity, "communications started");
        reaction.effect(Effect::Advertise { presence });
        reaction.effect(Effect::StartScan);
        reaction.event(AppEvent::CommunicationsStarted);
        Ok(reaction)
    }

    /// Force every session to exit and go quiet
    pub fn stop(&mut self, now: Timestamp) -> Reaction {
        let mut reaction = Reaction::new();
        if !self.running {
            return reaction;
        }
        for address in self.registry.addresses() {
            self.drive(&address, SessionInput::Stop, now, &mut reaction);
        }
        // Anything left never got announced
        self.peers.clear();
        self.registry = PeerRegistry::new();
        self.running = false;

        reaction.effect(Effect::StopScan);
        reaction.effect(Effect::StopAdvertising);
        reaction.event(AppEvent::CommunicationsStopped);
        info!("communications stopped");
        reaction
    }

    /// The radio refused to start; surfaced once and never retried
    pub fn radio_unavailable(&mut self, reason: impl Into<String>) -> Reaction {
        let reason = reason.into();
        warn!(%reason, "radio unavailable");
        self.running = false;
        let mut reaction = Reaction::new();
        reaction.event(AppEvent::RadioUnavailable { reason });
        reaction
    }

    // ------------------------------------------------------------------------
    // Application Requests
    // ------------------------------------------------------------------------

    /// Broadcast text to every bound session
    ///
    /// Active sessions are written to immediately, the rest buffer until they
    /// go active. With no sessions at all nothing happens.
    pub fn send_message(&mut self, text: impl Into<String>) -> Result<Reaction> {
        let payload = Payload::Message { text: text.into() };
        PayloadFragmenter::fragment(&payload, self.chunk_size)?;

        let mut reaction = Reaction::new();
        if !self.running {
            debug!("message dropped, communications not started");
            return Ok(reaction);
        }
        self.broadcast(payload, &mut reaction);
        Ok(reaction)
    }

    /// Publish a new local position and push it to every bound session
    pub fn update_location(&mut self, coordinates: Coordinates, now: Timestamp) -> Result<Reaction> {
        if !coordinates.is_valid() {
            return Err(PayloadError::MalformedPayload {
                reason: format!("coordinates out of range: {}", coordinates),
            }
            .into());
        }
        let location = Location::new(coordinates, now);
        self.local_location = Some(location);

        let mut reaction = Reaction::new();
        reaction.event(AppEvent::LocalLocationUpdated { location });
        if self.running {
            self.broadcast(Payload::Location(location), &mut reaction);
        }
        Ok(reaction)
    }

    /// Change the display name; re-advertises and re-sends presence
    pub fn update_status(&mut self, name: impl Into<String>) -> Result<Reaction> {
        let name = name.into();
        let name = name.trim();
        let name = (!name.is_empty()).then(|| name.to_string());
        let previous = std::mem::replace(&mut self.local_name, name);
        let presence = match self.presence_body() {
            Ok(presence) => presence,
            Err(e) => {
                self.local_name = previous;
                return Err(e);
            }
        };

        let mut reaction = Reaction::new();
        if !self.running {
            return Ok(reaction);
        }
        reaction.effect(Effect::Advertise { presence });
        let active: Vec<RadioAddress> = self
            .registry
            .sessions()
            .filter(|session| session.is_active())
            .map(|session| session.address().clone())
            .collect();
        for address in active {
            self.write(&address, self.presence(), &mut reaction);
        }
        Ok(reaction)
    }

    /// Ordered snapshot of every announced peer
    pub fn peers(&self, now: Timestamp) -> Vec<Peer> {
        self.peers
            .keys()
            .filter_map(|identity| self.snapshot(identity, now))
            .collect()
    }

    pub fn peer(&self, identity: &PeerIdentity, now: Timestamp) -> Option<Peer> {
        self.snapshot(identity, now)
    }

    fn snapshot(&self, identity: &PeerIdentity, now: Timestamp) -> Option<Peer> {
        let entry = self.peers.get(identity).filter(|entry| entry.announced)?;
        let mut peer = entry.peer.clone();
        if let Some(session) = self.registry.session_for(identity) {
            peer.distance = session.distance(now);
            peer.last_seen = peer.last_seen.max(session.last_seen());
            peer.reachable = session.is_active();
        } else {
            peer.distance = None;
            peer.reachable = false;
        }
        Some(peer)
    }

    fn broadcast(&mut self, payload: Payload, reaction: &mut Reaction) {
        let bound: Vec<RadioAddress> = self
            .registry
            .sessions()
            .filter(|session| session.identity().is_some() && !session.state().is_exited())
            .map(|session| session.address().clone())
            .collect();
        if bound.is_empty() {
            debug!(kind = %payload.kind(), "no sessions, nothing sent");
            return;
        }
        for address in bound {
            let ready = self
                .registry
                .get_mut(&address)
                .and_then(|session| session.enqueue(payload.clone()));
            if let Some(payload) = ready {
                self.write(&address, payload, reaction);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Radio Events
    // ------------------------------------------------------------------------

    pub fn handle_event(&mut self, event: RadioEvent, now: Timestamp) -> Reaction {
        let mut reaction = Reaction::new();
        if !self.running {
            debug!(address = %event.address(), "radio event while stopped, ignored");
            return reaction;
        }

        match event {
            RadioEvent::Discovered {
                address,
                rssi,
                advertisement,
            } => self.on_discovered(address, rssi, advertisement, now, &mut reaction),
            RadioEvent::Connected { address } => {
                if self.registry.resolve(&address, now, &self.config).is_some() {
                    self.touch(&address, now);
                    self.drive(&address, SessionInput::LinkUp, now, &mut reaction);
                }
            }
            RadioEvent::Disconnected { address } => {
                self.drive(&address, SessionInput::LinkLost, now, &mut reaction);
            }
            RadioEvent::AttributeWritten { address, chunk } => {
                self.on_attribute_written(address, &chunk, now, &mut reaction)
            }
            RadioEvent::SignalSample { address, rssi } => {
                if let Some(session) = self.registry.get_mut(&address) {
                    session.record_signal(rssi, now);
                }
            }
            RadioEvent::ConnectFailed { address, reason } => {
                debug!(%address, %reason, "connect failed");
                self.drive(&address, SessionInput::ConnectFailed, now, &mut reaction);
            }
            RadioEvent::WriteCompleted { address, kind } => {
                if kind == PayloadKind::Presence {
                    let negotiating = self
                        .registry
                        .get(&address)
                        .map_or(false, |s| matches!(s.state(), SessionState::RoleNegotiating { .. }));
                    if negotiating {
                        self.drive(&address, SessionInput::PresenceWritten, now, &mut reaction);
                    }
                }
            }
            RadioEvent::WriteFailed {
                address,
                kind,
                reason,
            } => {
                debug!(%address, %kind, %reason, "write failed");
                self.drive(&address, SessionInput::WriteFailed, now, &mut reaction);
            }
        }
        reaction
    }

    fn on_discovered(
        &mut self,
        address: RadioAddress,
        rssi: i16,
        advertisement: Option<Vec<u8>>,
        now: Timestamp,
        reaction: &mut Reaction,
    ) {
        let advertised = advertisement.and_then(|body| match Payload::decode_presence(&body) {
            Ok(Payload::Presence { identity, .. }) => Some(identity),
            Ok(_) => None,
            Err(e) => {
                debug!(%address, body = %hex::encode(&body), "unreadable advertisement: {}", e);
                None
            }
        });
        if advertised.as_ref() == Some(&self.local_identity) {
            return;
        }

        let local = &self.local_identity;
        let Some(session) = self.registry.resolve(&address, now, &self.config) else {
            return;
        };
        session.record_signal(rssi, now);
        if let Some(identity) = advertised {
            session.note_advertised(identity);
        }
        if !session.state().is_idle() {
            return;
        }

        // The lower identity initiates; without any identity to compare, we do
        let pursue = session
            .identity()
            .or(session.advertised_identity())
            .map_or(true, |remote| local.initiates_towards(remote));
        if pursue {
            self.drive(&address, SessionInput::Pursue, now, reaction);
        } else if let Some(output) = session.ensure_expiry(now, &self.config) {
            self.route(&address, vec![output], now, reaction);
        }
    }

    fn on_attribute_written(
        &mut self,
        address: RadioAddress,
        chunk: &[u8],
        now: Timestamp,
        reaction: &mut Reaction,
    ) {
        let Some(session) = self.registry.resolve(&address, now, &self.config) else {
            return;
        };
        let implicit_link = matches!(
            session.state(),
            SessionState::Discovered
                | SessionState::Disconnected { .. }
                | SessionState::Connecting { .. }
        );
        if implicit_link {
            debug!(%address, "write from unlinked address, treating as inbound link");
            self.drive(&address, SessionInput::LinkUp, now, reaction);
        }

        let Some(session) = self.registry.get_mut(&address) else {
            return;
        };
        let received = session.receive_chunk(chunk, now);
        let timer = session.reassembly_timer(now);
        if let Some(output) = timer {
            self.route(&address, vec![output], now, reaction);
        }

        match received {
            Ok(Some(payload)) => self.on_payload(&address, payload, now, reaction),
            Ok(None) => {}
            Err(e) => warn!(%address, "dropping malformed payload: {}", e),
        }
    }

    fn on_payload(
        &mut self,
        address: &RadioAddress,
        payload: Payload,
        now: Timestamp,
        reaction: &mut Reaction,
    ) {
        match payload {
            Payload::Presence { identity, name } => {
                self.on_presence(address, identity, name, now, reaction)
            }
            payload => {
                let Some(session) = self.registry.get_mut(address) else {
                    return;
                };
                if session.is_active() {
                    self.deliver(address, payload, now, reaction);
                } else {
                    session.hold(payload, self.config.session.outbound_queue_capacity);
                }
            }
        }
    }

    fn on_presence(
        &mut self,
        address: &RadioAddress,
        identity: PeerIdentity,
        name: Option<String>,
        now: Timestamp,
        reaction: &mut Reaction,
    ) {
        if identity == self.local_identity {
            warn!(%address, "peer presented our own identity, ignored");
            return;
        }

        let previous = self
            .registry
            .get(address)
            .and_then(|session| session.identity().cloned())
            .filter(|previous| previous != &identity);
        let outcome = match self
            .registry
            .bind(address, &identity, &self.local_identity, now, &self.config)
        {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(%address, "bind failed: {}", e);
                return;
            }
        };
        if let Some(previous) = previous {
            self.retire_identity(&previous, reaction);
        }
        match outcome {
            BindOutcome::Fresh | BindOutcome::Rebound => {}
            BindOutcome::Merged {
                retired,
                disconnect,
            } => {
                info!(%identity, %address, %retired, "peer moved to new address");
                if disconnect {
                    reaction.effect(Effect::Disconnect { address: retired });
                }
            }
            BindOutcome::Duplicate { disconnect } => {
                info!(%identity, %address, "duplicate link dropped");
                if disconnect {
                    reaction.effect(Effect::Disconnect {
                        address: address.clone(),
                    });
                }
                return;
            }
        }

        let entry = self
            .peers
            .entry(identity.clone())
            .or_insert_with(|| PeerEntry {
                peer: Peer::new(identity.clone(), now),
                announced: false,
            });
        entry.peer.last_seen = now;
        if entry.peer.update_name(name, now) && entry.announced {
            if let Some(peer) = self.snapshot(&identity, now) {
                reaction.event(AppEvent::PeerUpdatedStatus { peer });
            }
        }

        self.drive(address, SessionInput::PresenceBound, now, reaction);

        // An active link that switched identity never passes through
        // activation again
        let unannounced = self
            .peers
            .get(&identity)
            .map_or(false, |entry| !entry.announced);
        let active = self.registry.get(address).map_or(false, |s| s.is_active());
        if unannounced && active {
            self.on_activated(address, now, reaction);
        }
    }

    /// Drop the record of an identity no session serves any more
    fn retire_identity(&mut self, identity: &PeerIdentity, reaction: &mut Reaction) {
        // Another address may have taken over the identity
        if self.registry.address_for(identity).is_some() {
            return;
        }
        if let Some(entry) = self.peers.remove(identity) {
            if entry.announced {
                info!(%identity, "peer exited");
                reaction.event(AppEvent::PeerExited {
                    identity: identity.clone(),
                });
            }
        }
    }

    /// Hand a decoded location or message to the application
    fn deliver(&mut self, address: &RadioAddress, payload: Payload, now: Timestamp, reaction: &mut Reaction) {
        let Some(identity) = self
            .registry
            .get(address)
            .and_then(|session| session.identity().cloned())
        else {
            return;
        };
        let Some(entry) = self.peers.get_mut(&identity) else {
            return;
        };
        entry.peer.last_seen = now;

        match payload {
            Payload::Location(location) => {
                if entry.peer.update_location(location, now) {
                    if let Some(peer) = self.snapshot(&identity, now) {
                        reaction.event(AppEvent::PeerUpdatedLocation { peer });
                    }
                } else {
                    debug!(%identity, "out-of-date location ignored");
                }
            }
            Payload::Message { text } => {
                entry.peer.last_updated = now;
                reaction.event(AppEvent::PeerUpdatedMessage { identity, text });
            }
            Payload::Presence { .. } => {}
        }
    }

    // ------------------------------------------------------------------------
    // Timers and Maintenance
    // ------------------------------------------------------------------------

    pub fn handle_timer(
        &mut self,
        address: &RadioAddress,
        timer: TimerKind,
        generation: u64,
        now: Timestamp,
    ) -> Reaction {
        let mut reaction = Reaction::new();
        let Some(session) = self.registry.get_mut(address) else {
            return reaction;
        };
        match session.on_timer(timer, generation, now, &self.config) {
            Ok(outputs) => self.route(address, outputs, now, &mut reaction),
            Err(e) => debug!(%address, %timer, "timer ignored: {}", e),
        }
        reaction
    }

    /// Periodic housekeeping: forget old tombstones, make sure every idle
    /// session is on its way to expiring
    pub fn maintenance(&mut self, now: Timestamp) -> Reaction {
        let mut reaction = Reaction::new();
        self.registry.sweep_retired(now);
        let mut pending = Vec::new();
        for session in self.registry.sessions_mut() {
            if let Some(output) = session.ensure_expiry(now, &self.config) {
                pending.push((session.address().clone(), output));
            }
        }
        for (address, output) in pending {
            self.route(&address, vec![output], now, &mut reaction);
        }
        reaction
    }

    // ------------------------------------------------------------------------
    // Session Plumbing
    // ------------------------------------------------------------------------

    fn drive(&mut self, address: &RadioAddress, input: SessionInput, now: Timestamp, reaction: &mut Reaction) {
        let Some(session) = self.registry.get_mut(address) else {
            return;
        };
        match session.apply(input, now, &self.config) {
            Ok(outputs) => self.route(address, outputs, now, reaction),
            Err(e) => debug!(%address, "{}", e),
        }
    }

    fn touch(&mut self, address: &RadioAddress, now: Timestamp) {
        if let Some(session) = self.registry.get_mut(address) {
            session.touch(now);
        }
    }

    fn route(
        &mut self,
        address: &RadioAddress,
        outputs: Vec<SessionOutput>,
        now: Timestamp,
        reaction: &mut Reaction,
    ) {
        for output in outputs {
            match output {
                SessionOutput::Connect => reaction.effect(Effect::Connect {
                    address: address.clone(),
                }),
                SessionOutput::Disconnect => reaction.effect(Effect::Disconnect {
                    address: address.clone(),
                }),
                SessionOutput::SendPresence => self.write(address, self.presence(), reaction),
                SessionOutput::Send(payload) => self.write(address, payload, reaction),
                SessionOutput::ArmTimer {
                    timer,
                    delay,
                    generation,
                } => reaction.effect(Effect::ScheduleTimer {
                    address: address.clone(),
                    timer,
                    delay,
                    generation,
                }),
                SessionOutput::Activated => self.on_activated(address, now, reaction),
                SessionOutput::Deactivated => self.on_deactivated(address, now),
                SessionOutput::Exited => self.on_exited(address, reaction),
            }
        }
    }

    fn write(&self, address: &RadioAddress, payload: Payload, reaction: &mut Reaction) {
        match PayloadFragmenter::encode(&payload, self.chunk_size) {
            Ok(chunks) => reaction.effect(Effect::Write {
                address: address.clone(),
                kind: payload.kind(),
                chunks,
            }),
            Err(e) => warn!(%address, kind = %payload.kind(), "cannot encode payload: {}", e),
        }
    }

    fn on_activated(&mut self, address: &RadioAddress, now: Timestamp, reaction: &mut Reaction) {
        let Some(identity) = self
            .registry
            .get(address)
            .and_then(|session| session.identity().cloned())
        else {
            return;
        };

        let first = match self.peers.get_mut(&identity) {
            Some(entry) => {
                entry.peer.last_seen = now;
                !std::mem::replace(&mut entry.announced, true)
            }
            None => return,
        };
        if first {
            info!(%identity, %address, "peer entered");
            if let Some(peer) = self.snapshot(&identity, now) {
                reaction.event(AppEvent::PeerEntered { peer });
            }
        } else {
            debug!(%identity, %address, "peer reachable again");
        }

        if let Some(location) = self.local_location {
            let ready = self
                .registry
                .get_mut(address)
                .and_then(|session| session.enqueue(Payload::Location(location)));
            if let Some(payload) = ready {
                self.write(address, payload, reaction);
            }
        }

        let held = self
            .registry
            .get_mut(address)
            .map(|session| session.take_held())
            .unwrap_or_default();
        for payload in held {
            self.deliver(address, payload, now, reaction);
        }
    }

    fn on_deactivated(&mut self, address: &RadioAddress, now: Timestamp) {
        let identity = self
            .registry
            .get(address)
            .and_then(|session| session.identity().cloned());
        if let Some(entry) = identity.and_then(|identity| self.peers.get_mut(&identity)) {
            entry.peer.reachable = false;
            entry.peer.last_seen = entry.peer.last_seen.max(now);
            debug!(identity = %entry.peer.identity, "peer unreachable");
        }
    }

    fn on_exited(&mut self, address: &RadioAddress, reaction: &mut Reaction) {
        let Some(session) = self.registry.remove(address) else {
            return;
        };
        if let Some(identity) = session.identity() {
            self.retire_identity(identity, reaction);
        }
    }
}
