//! Peer registry
//!
//! Sessions are keyed by radio address because that is all the radio gives
//! us; the identity index is filled in once a presence payload binds a session.
//! Two addresses can turn out to belong to the same identity (address rotation,
//! or both sides connecting at once). Binding resolves that immediately, so an
//! identity never has more than one session.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::config::BubblesConfig;
use crate::errors::SessionError;
use crate::session::{PeerSession, Role, SessionInput, SessionOutput};
use crate::types::{PeerIdentity, RadioAddress, Timestamp};

/// How a bind request was resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// First session for this identity
    Fresh,
    /// The session was already bound to this identity
    Rebound,
    /// This session replaced an older one at `retired`
    Merged {
        retired: RadioAddress,
        disconnect: bool,
    },
    /// The identity already has a better session; this one was dropped
    Duplicate { disconnect: bool },
}

#[derive(Debug, Default)]
pub struct PeerRegistry {
    sessions: HashMap<RadioAddress, PeerSession>,
    identities: HashMap<PeerIdentity, RadioAddress>,
    /// Addresses whose events are ignored until the given time
    retired: HashMap<RadioAddress, Timestamp>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the session for `address`, creating it if needed
    ///
    /// Returns `None` while the address is retired after a merge.
    pub fn resolve(
        &mut self,
        address: &RadioAddress,
        now: Timestamp,
        config: &BubblesConfig,
    ) -> Option<&mut PeerSession> {
        if self.is_retired(address, now) {
            return None;
        }
        if !self.sessions.contains_key(address) {
            debug!(%address, "new session");
            self.sessions
                .insert(address.clone(), PeerSession::new(address.clone(), now, config));
        }
        self.sessions.get_mut(address)
    }

    pub fn is_retired(&mut self, address: &RadioAddress, now: Timestamp) -> bool {
        match self.retired.get(address) {
            Some(until) if now < *until => true,
            Some(_) => {
                self.retired.remove(address);
                false
            }
            None => false,
        }
    }

    pub fn get(&self, address: &RadioAddress) -> Option<&PeerSession> {
        self.sessions.get(address)
    }

    pub fn get_mut(&mut self, address: &RadioAddress) -> Option<&mut PeerSession> {
        self.sessions.get_mut(address)
    }

    /// The address currently serving `identity`
    pub fn address_for(&self, identity: &PeerIdentity) -> Option<&RadioAddress> {
        self.identities.get(identity)
    }

    pub fn session_for(&self, identity: &PeerIdentity) -> Option<&PeerSession> {
        self.identities
            .get(identity)
            .and_then(|address| self.sessions.get(address))
    }

    /// Attach `identity` to the session at `address`, resolving duplicates
    ///
    /// When both sessions hold a link, the one whose role agrees with the
    /// identity ordering survives, so both ends keep the same physical link.
    /// Otherwise the newer session wins. The survivor takes over the loser's
    /// queue and signal history.
    pub fn bind(
        &mut self,
        address: &RadioAddress,
        identity: &PeerIdentity,
        local: &PeerIdentity,
        now: Timestamp,
        config: &BubblesConfig,
    ) -> Result<BindOutcome, SessionError> {
        let session = self
            .sessions
            .get_mut(address)
            .ok_or_else(|| SessionError::SessionNotFound {
                address: address.to_string(),
            })?;

        if let Some(previous) = session.identity().cloned() {
            if &previous == identity {
                return Ok(BindOutcome::Rebound);
            }
            warn!(%address, from = %previous, to = %identity, "peer changed identity");
            if self.identities.get(&previous) == Some(address) {
                self.identities.remove(&previous);
            }
        }

        let existing = match self.identities.get(identity) {
            Some(other) if other != address && self.sessions.contains_key(other) => {
                other.clone()
            }
            _ => {
                self.attach(address, identity);
                return Ok(BindOutcome::Fresh);
            }
        };

        let keep_new = match (self.sessions.get(&existing), self.sessions.get(address)) {
            (Some(old), Some(new)) => Self::prefer_new(old, new, identity, local),
            _ => true,
        };

        if keep_new {
            let Some(mut old) = self.sessions.remove(&existing) else {
                return Ok(BindOutcome::Fresh);
            };
            if let Some(new) = self.sessions.get_mut(address) {
                new.absorb(&mut old);
            }
            self.attach(address, identity);
            let disconnect = Self::stop(old, now, config);
            self.retired
                .insert(existing.clone(), now + config.session.exit_grace_period);
            debug!(%identity, kept = %address, retired = %existing, "merged sessions");
            Ok(BindOutcome::Merged {
                retired: existing,
                disconnect,
            })
        } else {
            let Some(mut new) = self.sessions.remove(address) else {
                return Ok(BindOutcome::Rebound);
            };
            if let Some(old) = self.sessions.get_mut(&existing) {
                old.absorb(&mut new);
            }
            let disconnect = Self::stop(new, now, config);
            self.retired
                .insert(address.clone(), now + config.session.exit_grace_period);
            debug!(%identity, kept = %existing, retired = %address, "dropped duplicate session");
            Ok(BindOutcome::Duplicate { disconnect })
        }
    }

    fn attach(&mut self, address: &RadioAddress, identity: &PeerIdentity) {
        if let Some(session) = self.sessions.get_mut(address) {
            session.set_identity(identity.clone());
        }
        self.identities.insert(identity.clone(), address.clone());
    }

    fn prefer_new(
        old: &PeerSession,
        new: &PeerSession,
        identity: &PeerIdentity,
        local: &PeerIdentity,
    ) -> bool {
        match (old.state().is_linked(), new.state().is_linked()) {
            (false, _) => true,
            (true, false) => false,
            (true, true) => {
                let expected = if local.initiates_towards(identity) {
                    Role::Initiator
                } else {
                    Role::Responder
                };
                let old_matches = old.role() == Some(expected);
                let new_matches = new.role() == Some(expected);
                !(old_matches && !new_matches)
            }
        }
    }

    /// Stop a session that lost a merge; true if its link must be closed
    fn stop(mut session: PeerSession, now: Timestamp, config: &BubblesConfig) -> bool {
        session
            .apply(SessionInput::Stop, now, config)
            .map(|outputs| outputs.contains(&SessionOutput::Disconnect))
            .unwrap_or(false)
    }

    /// Drop a session; the identity index is cleared only if it points here
    pub fn remove(&mut self, address: &RadioAddress) -> Option<PeerSession> {
        let session = self.sessions.remove(address)?;
        if let Some(identity) = session.identity() {
            if self.identities.get(identity) == Some(address) {
                self.identities.remove(identity);
            }
        }
        Some(session)
    }

    /// Forget tombstones that have run out
    pub fn sweep_retired(&mut self, now: Timestamp) {
        self.retired.retain(|_, until| now < *until);
    }

    pub fn addresses(&self) -> Vec<RadioAddress> {
        self.sessions.keys().cloned().collect()
    }

    pub fn sessions(&self) -> impl Iterator<Item = &PeerSession> {
        self.sessions.values()
    }

    pub fn sessions_mut(&mut self) -> impl Iterator<Item = &mut PeerSession> {
        self.sessions.values_mut()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Active sessions bound to `identity`
    pub fn active_count(&self, identity: &PeerIdentity) -> usize {
        self.sessions
            .values()
            .filter(|s| s.is_active() && s.identity() == Some(identity))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;

    fn id(value: &str) -> PeerIdentity {
        PeerIdentity::new(value).unwrap()
    }

    fn addr(value: &str) -> RadioAddress {
        RadioAddress::new(value)
    }

    /// Bring a session at `address` up with the given role, unbound
    fn linked(
        registry: &mut PeerRegistry,
        address: &RadioAddress,
        role: Role,
        now: Timestamp,
        config: &BubblesConfig,
    ) {
        let session = registry.resolve(address, now, config).unwrap();
        if role == Role::Initiator {
            session.apply(SessionInput::Pursue, now, config).unwrap();
        }
        session.apply(SessionInput::LinkUp, now, config).unwrap();
        assert_eq!(session.role(), Some(role));
    }

    #[test]
    fn test_fresh_and_unchanged_binding() {
        let config = BubblesConfig::default();
        let mut registry = PeerRegistry::new();
        let now = Timestamp::new(0);
        linked(&mut registry, &addr("a1"), Role::Responder, now, &config);

        let outcome = registry
            .bind(&addr("a1"), &id("bob"), &id("alice"), now, &config)
            .unwrap();
        assert_eq!(outcome, BindOutcome::Fresh);
        assert_eq!(registry.address_for(&id("bob")), Some(&addr("a1")));

        let outcome = registry
            .bind(&addr("a1"), &id("bob"), &id("alice"), now, &config)
            .unwrap();
        assert_eq!(outcome, BindOutcome::Rebound);
    }

    #[test]
    fn test_bind_unknown_address_fails() {
        let config = BubblesConfig::default();
        let mut registry = PeerRegistry::new();
        let result = registry.bind(&addr("nope"), &id("bob"), &id("alice"), Timestamp::new(0), &config);
        assert!(matches!(result, Err(SessionError::SessionNotFound { .. })));
    }

    #[test]
    fn test_rotated_address_merges_into_new_session() {
        let config = BubblesConfig::default();
        let mut registry = PeerRegistry::new();
        let t0 = Timestamp::new(0);

        // old address went quiet without a link
        let old = registry.resolve(&addr("old"), t0, &config).unwrap();
        old.record_signal(-70, t0);
        old.set_identity(id("bob"));
        registry.identities.insert(id("bob"), addr("old"));

        let t1 = Timestamp::new(1_000);
        linked(&mut registry, &addr("new"), Role::Responder, t1, &config);
        let outcome = registry
            .bind(&addr("new"), &id("bob"), &id("alice"), t1, &config)
            .unwrap();

        assert_eq!(
            outcome,
            BindOutcome::Merged {
                retired: addr("old"),
                disconnect: false
            }
        );
        assert!(registry.get(&addr("old")).is_none());
        assert_eq!(registry.address_for(&id("bob")), Some(&addr("new")));
        assert!(registry.session_for(&id("bob")).unwrap().proximity().smoothed_rssi().is_some());

        // retired address stays ignored for the grace period
        assert!(registry.resolve(&addr("old"), t1, &config).is_none());
        let later = t1 + config.session.exit_grace_period;
        assert!(registry.resolve(&addr("old"), later, &config).is_some());
    }

    #[test]
    fn test_simultaneous_links_keep_tie_break_role() {
        let config = BubblesConfig::default();
        let now = Timestamp::new(0);

        // alice < bob, so alice's surviving link is the one she initiated
        let mut registry = PeerRegistry::new();
        linked(&mut registry, &addr("out"), Role::Initiator, now, &config);
        linked(&mut registry, &addr("in"), Role::Responder, now, &config);
        registry
            .bind(&addr("out"), &id("bob"), &id("alice"), now, &config)
            .unwrap();
        let outcome = registry
            .bind(&addr("in"), &id("bob"), &id("alice"), now, &config)
            .unwrap();
        assert_eq!(outcome, BindOutcome::Duplicate { disconnect: true });
        assert_eq!(registry.address_for(&id("bob")), Some(&addr("out")));
        assert!(registry.get(&addr("in")).is_none());

        // from bob's side the inbound link is the keeper
        let mut registry = PeerRegistry::new();
        linked(&mut registry, &addr("out"), Role::Initiator, now, &config);
        linked(&mut registry, &addr("in"), Role::Responder, now, &config);
        registry
            .bind(&addr("out"), &id("alice"), &id("bob"), now, &config)
            .unwrap();
        let outcome = registry
            .bind(&addr("in"), &id("alice"), &id("bob"), now, &config)
            .unwrap();
        assert_eq!(
            outcome,
            BindOutcome::Merged {
                retired: addr("out"),
                disconnect: true
            }
        );
        assert_eq!(registry.address_for(&id("alice")), Some(&addr("in")));
    }

    #[test]
    fn test_remove_clears_index_only_for_owner() {
        let config = BubblesConfig::default();
        let mut registry = PeerRegistry::new();
        let now = Timestamp::new(0);
        linked(&mut registry, &addr("a1"), Role::Responder, now, &config);
        registry
            .bind(&addr("a1"), &id("bob"), &id("alice"), now, &config)
            .unwrap();

        let removed = registry.remove(&addr("a1")).unwrap();
        assert_eq!(removed.identity(), Some(&id("bob")));
        assert!(registry.address_for(&id("bob")).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_identity_change_on_same_address() {
        let config = BubblesConfig::default();
        let mut registry = PeerRegistry::new();
        let now = Timestamp::new(0);
        linked(&mut registry, &addr("a1"), Role::Responder, now, &config);
        registry
            .bind(&addr("a1"), &id("bob"), &id("alice"), now, &config)
            .unwrap();
        registry
            .bind(&addr("a1"), &id("carol"), &id("alice"), now, &config)
            .unwrap();

        assert!(registry.address_for(&id("bob")).is_none());
        assert_eq!(registry.address_for(&id("carol")), Some(&addr("a1")));
        assert!(matches!(
            registry.get(&addr("a1")).unwrap().state(),
            SessionState::RoleNegotiating { .. }
        ));
    }
}
