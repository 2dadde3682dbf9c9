//! Rendering of events and peer lists for the terminal

use bubbles_core::{AppEvent, Peer};
use serde::Serialize;

/// Where user-facing lines go; logs go to stderr separately
#[derive(Debug, Clone, Copy, Default)]
pub struct Output {
    json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn event(&self, event: &AppEvent) {
        if self.json {
            self.emit_json(event);
        } else {
            println!("{}", describe_event(event));
        }
    }

    pub fn peers(&self, peers: &[Peer]) {
        if self.json {
            self.emit_json(&peers);
            return;
        }
        if peers.is_empty() {
            println!("nobody nearby yet");
            return;
        }
        for peer in peers {
            println!("  {}", describe_peer(peer));
        }
    }

    /// Status text; silent in JSON mode so the stream stays parseable
    pub fn note(&self, text: &str) {
        if !self.json {
            println!("{}", text);
        }
    }

    fn emit_json<T: Serialize + ?Sized>(&self, value: &T) {
        match serde_json::to_string(value) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!("cannot encode output as JSON: {}", e),
        }
    }
}

pub fn describe_event(event: &AppEvent) -> String {
    match event {
        AppEvent::PeerEntered { peer } => format!("+ {} is nearby", describe_peer(peer)),
        AppEvent::PeerExited { identity } => format!("- {} left", identity),
        AppEvent::PeerUpdatedLocation { peer } => match &peer.location {
            Some(location) => format!("@ {} is at {}", peer.display_name(), location.coordinates),
            None => format!("@ {} moved", peer.display_name()),
        },
        AppEvent::PeerUpdatedMessage { identity, text } => format!("<{}> {}", identity, text),
        AppEvent::PeerUpdatedStatus { peer } => {
            format!("~ {} is now called {}", peer.identity, peer.display_name())
        }
        AppEvent::LocalLocationUpdated { location } => {
            format!("@ you are at {}", location.coordinates)
        }
        AppEvent::RadioUnavailable { reason } => format!("! radio unavailable: {}", reason),
        AppEvent::CommunicationsStarted => "* listening for people nearby".to_string(),
        AppEvent::CommunicationsStopped => "* radio paused".to_string(),
    }
}

pub fn describe_peer(peer: &Peer) -> String {
    let mut line = peer.display_name().to_string();
    if peer.name.is_some() {
        line.push_str(&format!(" ({})", peer.identity));
    }
    match peer.distance {
        Some(meters) => line.push_str(&format!(", ~{:.1} m", meters)),
        None => line.push_str(", distance unknown"),
    }
    if let Some(geohash) = peer
        .location
        .as_ref()
        .and_then(|location| location.coordinates.geohash(7))
    {
        line.push_str(&format!(", at {}", geohash));
    }
    if !peer.reachable {
        line.push_str(", out of reach");
    }
    line
}
