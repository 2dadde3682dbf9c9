//! Application-facing peer view

use serde::{Deserialize, Serialize};

use crate::types::{Location, PeerIdentity, Timestamp};

/// What the application knows about one nearby peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    pub identity: PeerIdentity,
    /// Display name from the peer's presence, if it sent one
    pub name: Option<String>,
    pub location: Option<Location>,
    /// Estimated distance in meters
    pub distance: Option<f64>,
    /// Last time anything about this peer changed
    pub last_updated: Timestamp,
    /// Last radio activity from any of the peer's addresses
    pub last_seen: Timestamp,
    /// A session with this peer is currently active
    pub reachable: bool,
}

impl Peer {
    pub fn new(identity: PeerIdentity, now: Timestamp) -> Self {
        Self {
            identity,
            name: None,
            location: None,
            distance: None,
            last_updated: now,
            last_seen: now,
            reachable: false,
        }
    }

    /// Name to show, falling back to the identity
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.identity.as_str())
    }

    /// Record a location newer than what we hold; a re-sent one is ignored
    pub fn update_location(&mut self, location: Location, now: Timestamp) -> bool {
        if let Some(current) = &self.location {
            if location.timestamp <= current.timestamp {
                return false;
            }
        }
        self.location = Some(location);
        self.last_updated = now;
        true
    }

    /// Returns true when the name actually changed
    pub fn update_name(&mut self, name: Option<String>, now: Timestamp) -> bool {
        if name.is_none() || self.name == name {
            return false;
        }
        self.name = name;
        self.last_updated = now;
        true
    }
}
