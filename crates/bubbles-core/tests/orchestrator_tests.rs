//! Orchestrator scenarios driven with scripted radio events

use bubbles_core::{
    AppEvent, BubblesError, Coordinates, Effect, Orchestrator, Payload, PayloadError, PayloadKind,
    RadioAddress, RadioEvent, Reaction, SessionState, TimerKind, Timestamp,
};

mod test_utils;
use test_utils::*;

#[test]
fn test_start_is_idempotent() {
    let mut orchestrator = Orchestrator::new(Default::default(), identity("alice"), None);
    let reaction = orchestrator.start().unwrap();
    assert!(matches!(reaction.effects[0], Effect::Advertise { .. }));
    assert_eq!(reaction.effects[1], Effect::StartScan);
    assert_eq!(reaction.app_events, vec![AppEvent::CommunicationsStarted]);

    assert!(orchestrator.start().unwrap().is_empty());
    assert!(orchestrator.is_running());
}

#[test]
fn test_lower_identity_initiates() {
    let now = Timestamp::new(0);

    let mut alice = started("alice");
    let reaction = alice.handle_event(discovered("bob-addr", Some("bob"), -60), now);
    assert_eq!(connects(&reaction), vec!["bob-addr"]);

    let mut bob = started("bob");
    let reaction = bob.handle_event(discovered("alice-addr", Some("alice"), -60), now);
    assert!(connects(&reaction).is_empty());
    assert!(timer(&reaction, "alice-addr", TimerKind::Expiry).is_some());

    // repeated sightings never make bob connect
    let reaction = bob.handle_event(discovered("alice-addr", Some("alice"), -58), now + 100u64);
    assert!(connects(&reaction).is_empty());
}

#[test]
fn test_bare_advertisement_is_pursued() {
    let mut bob = started("bob");
    let reaction = bob.handle_event(discovered("x", None, -70), Timestamp::new(0));
    assert_eq!(connects(&reaction), vec!["x"]);
}

#[test]
fn test_own_advertisement_ignored() {
    let mut alice = started("alice");
    let reaction = alice.handle_event(discovered("echo", Some("alice"), -40), Timestamp::new(0));
    assert!(reaction.is_empty());
    assert!(alice.registry().is_empty());
}

#[test]
fn test_events_ignored_before_start() {
    let mut alice = Orchestrator::new(Default::default(), identity("alice"), None);
    let reaction = alice.handle_event(discovered("b", Some("bob"), -60), Timestamp::new(0));
    assert!(reaction.is_empty());
    assert!(alice.registry().is_empty());
}

#[test]
fn test_handshake_publishes_peer_entered() {
    let mut alice = started("alice");
    let config = alice.config().clone();
    let now = Timestamp::new(1_000);

    let mut events = vec![
        discovered("b", Some("bob"), -59),
        RadioEvent::Connected { address: address("b") },
    ];
    events.extend(written("b", &presence("bob", Some("Bob")), &config));
    let reaction = feed(&mut alice, events, now);
    assert_eq!(writes_of(&reaction, PayloadKind::Presence), vec!["b"]);
    // not active until our own presence is written
    assert!(entered(&reaction).is_empty());

    let reaction = alice.handle_event(presence_written("b"), now);
    assert_eq!(entered(&reaction), vec!["bob"]);

    let peers = alice.peers(now);
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].display_name(), "Bob");
    assert!(peers[0].reachable);
    assert!((peers[0].distance.unwrap() - 1.0).abs() < 1e-9);
}

#[test]
fn test_payloads_before_activation_are_held() {
    let mut alice = started("alice");
    let config = alice.config().clone();
    let now = Timestamp::new(0);

    let mut events = vec![RadioEvent::Connected { address: address("b") }];
    events.extend(written("b", &presence("bob", None), &config));
    events.extend(written("b", &Payload::Message { text: "early bird".into() }, &config));
    let reaction = feed(&mut alice, events, now);
    assert!(reaction.app_events.is_empty());

    let reaction = alice.handle_event(presence_written("b"), now);
    assert!(matches!(reaction.app_events[0], AppEvent::PeerEntered { .. }));
    assert_eq!(
        reaction.app_events[1],
        AppEvent::PeerUpdatedMessage {
            identity: identity("bob"),
            text: "early bird".into()
        }
    );
}

#[test]
fn test_send_message_without_sessions_is_noop() {
    let mut alice = started("alice");
    let reaction = alice.send_message("hi").unwrap();
    assert!(reaction.is_empty());

    // unbound sessions do not count
    alice.handle_event(discovered("b", None, -60), Timestamp::new(0));
    let reaction = alice.send_message("hi").unwrap();
    assert!(reaction.is_empty());
}

#[test]
fn test_send_message_to_active_peers() {
    let mut alice = started("alice");
    let now = Timestamp::new(0);
    activate(&mut alice, "b", "bob", now);
    activate(&mut alice, "c", "carol", now);

    let reaction = alice.send_message("hello both").unwrap();
    let mut targets = writes_of(&reaction, PayloadKind::Message);
    targets.sort();
    assert_eq!(targets, vec!["b", "c"]);
}

#[test]
fn test_oversized_message_rejected() {
    let mut alice = started("alice");
    let text = "x".repeat(20 * 255);
    let result = alice.send_message(text);
    assert!(matches!(
        result,
        Err(BubblesError::Payload(PayloadError::PayloadTooLarge { .. }))
    ));
}

#[test]
fn test_reconnect_within_grace_is_invisible() {
    let mut alice = started("alice");
    let config = alice.config().clone();
    let t0 = Timestamp::new(0);
    activate(&mut alice, "b", "bob", t0);
    feed(
        &mut alice,
        written(
            "b",
            &Payload::Location(bubbles_core::Location::new(
                Coordinates::new(47.6, -122.3),
                t0,
            )),
            &config,
        ),
        t0,
    );

    let t1 = Timestamp::new(100);
    let reaction = alice.handle_event(RadioEvent::Disconnected { address: address("b") }, t1);
    assert!(reaction.app_events.is_empty());
    let peer = &alice.peers(t1)[0];
    assert!(!peer.reachable);
    assert!(peer.location.is_some());

    let t2 = Timestamp::new(300);
    let reaction = activate(&mut alice, "b", "bob", t2);
    assert!(entered(&reaction).is_empty());
    assert!(exited(&reaction).is_empty());
    let peer = &alice.peers(t2)[0];
    assert!(peer.reachable);
    assert!(peer.location.is_some());
}

#[test]
fn test_grace_expiry_publishes_peer_exited() {
    let mut alice = started("alice");
    let grace = alice.config().session.exit_grace_period.as_millis() as u64;
    activate(&mut alice, "b", "bob", Timestamp::new(0));

    let t1 = Timestamp::new(1_000);
    let reaction = alice.handle_event(RadioEvent::Disconnected { address: address("b") }, t1);
    let (delay, generation) = timer(&reaction, "b", TimerKind::Expiry).unwrap();
    assert_eq!(delay, grace);

    let reaction = alice.handle_timer(&address("b"), TimerKind::Expiry, generation, t1 + grace);
    assert_eq!(exited(&reaction), vec!["bob"]);
    assert!(alice.peers(t1 + grace).is_empty());
    assert!(alice.registry().is_empty());
}

#[test]
fn test_stale_timer_is_ignored() {
    let mut alice = started("alice");
    let reaction = activate(&mut alice, "b", "bob", Timestamp::new(0));
    let (_, generation) = timer(&reaction, "b", TimerKind::Handshake).unwrap();

    let reaction = alice.handle_timer(&address("b"), TimerKind::Handshake, generation, Timestamp::new(5_000));
    assert!(reaction.is_empty());
    assert_eq!(alice.peers(Timestamp::new(5_000)).len(), 1);
}

#[test]
fn test_handshake_timeout_disconnects() {
    let mut alice = started("alice");
    let now = Timestamp::new(0);
    let reaction = alice.handle_event(RadioEvent::Connected { address: address("b") }, now);
    let (_, generation) = timer(&reaction, "b", TimerKind::Handshake).unwrap();

    let reaction = alice.handle_timer(&address("b"), TimerKind::Handshake, generation, Timestamp::new(300));
    assert!(reaction
        .effects
        .contains(&Effect::Disconnect { address: address("b") }));
    assert!(reaction.app_events.is_empty());
}

#[test]
fn test_stop_exits_everything() {
    let mut alice = started("alice");
    activate(&mut alice, "b", "bob", Timestamp::new(0));
    alice.handle_event(discovered("c", Some("carol"), -80), Timestamp::new(0));

    let reaction = alice.stop(Timestamp::new(10));
    assert!(reaction
        .effects
        .contains(&Effect::Disconnect { address: address("b") }));
    assert!(reaction
        .effects
        .contains(&Effect::Disconnect { address: address("c") }));
    assert_eq!(exited(&reaction), vec!["bob"]);
    assert!(reaction.effects.contains(&Effect::StopScan));
    assert!(reaction.effects.contains(&Effect::StopAdvertising));
    assert_eq!(
        reaction.app_events.last(),
        Some(&AppEvent::CommunicationsStopped)
    );
    assert!(alice.peers(Timestamp::new(10)).is_empty());

    // a second stop does nothing
    assert!(alice.stop(Timestamp::new(20)).is_empty());
}

#[test]
fn test_malformed_payload_keeps_session() {
    let mut alice = started("alice");
    let now = Timestamp::new(0);
    activate(&mut alice, "b", "bob", now);

    let reaction = alice.handle_event(
        RadioEvent::AttributeWritten {
            address: address("b"),
            chunk: vec![0x03, 0, 1, 0xff],
        },
        now,
    );
    assert!(reaction.is_empty());
    let reaction = alice.handle_event(
        RadioEvent::AttributeWritten {
            address: address("b"),
            chunk: vec![0x09, 0, 1],
        },
        now,
    );
    assert!(reaction.is_empty());
    assert!(alice.peers(now)[0].reachable);
}

#[test]
fn test_location_update_and_location_on_join() {
    let mut alice = started("alice");
    let now = Timestamp::new(0);
    activate(&mut alice, "b", "bob", now);

    let reaction = alice
        .update_location(Coordinates::new(47.6062, -122.3321), now)
        .unwrap();
    assert!(matches!(
        reaction.app_events[0],
        AppEvent::LocalLocationUpdated { .. }
    ));
    assert_eq!(writes_of(&reaction, PayloadKind::Location), vec!["b"]);

    let reaction = activate(&mut alice, "c", "carol", now);
    assert_eq!(writes_of(&reaction, PayloadKind::Location), vec!["c"]);

    assert!(alice
        .update_location(Coordinates::new(95.0, 0.0), now)
        .is_err());
}

#[test]
fn test_status_updates() {
    let mut alice = started("alice");
    let config = alice.config().clone();
    let now = Timestamp::new(0);
    activate(&mut alice, "b", "bob", now);

    let reaction = alice.update_status("Alice").unwrap();
    assert!(matches!(reaction.effects[0], Effect::Advertise { .. }));
    assert_eq!(writes_of(&reaction, PayloadKind::Presence), vec!["b"]);
    assert_eq!(alice.local_name(), Some("Alice"));

    // the remote renames itself
    let reaction = feed(&mut alice, written("b", &presence("bob", Some("Bobby")), &config), now);
    match &reaction.app_events[..] {
        [AppEvent::PeerUpdatedStatus { peer }] => assert_eq!(peer.display_name(), "Bobby"),
        other => panic!("unexpected events {:?}", other),
    }
}

#[test]
fn test_rotated_address_keeps_peer() {
    let mut alice = started("alice");
    let t0 = Timestamp::new(0);
    activate(&mut alice, "old", "bob", t0);
    alice.handle_event(RadioEvent::Disconnected { address: address("old") }, Timestamp::new(50));

    let reaction = activate(&mut alice, "new", "bob", Timestamp::new(100));
    assert!(entered(&reaction).is_empty());
    assert!(exited(&reaction).is_empty());
    assert_eq!(alice.registry().address_for(&identity("bob")), Some(&address("new")));
    assert!(alice.registry().get(&address("old")).is_none());

    // sightings of the retired address are ignored for a while
    let reaction = alice.handle_event(discovered("old", Some("bob"), -50), Timestamp::new(150));
    assert!(reaction.is_empty());
    assert_eq!(alice.peers(Timestamp::new(150)).len(), 1);
}

#[test]
fn test_radio_unavailable_is_reported() {
    let mut alice = Orchestrator::new(Default::default(), identity("alice"), None);
    let reaction = alice.radio_unavailable("adapter powered off");
    assert_eq!(
        reaction.app_events,
        vec![AppEvent::RadioUnavailable {
            reason: "adapter powered off".into()
        }]
    );
    assert!(!alice.is_running());
}

#[test]
fn test_keepalive_resends_presence() {
    let mut alice = started("alice");
    let reaction = activate(&mut alice, "b", "bob", Timestamp::new(0));
    let (delay, generation) = timer(&reaction, "b", TimerKind::KeepAlive).unwrap();
    assert_eq!(delay, alice.config().session.keepalive_interval.as_millis() as u64);

    let reaction = alice.handle_timer(&address("b"), TimerKind::KeepAlive, generation, Timestamp::new(delay));
    assert_eq!(writes_of(&reaction, PayloadKind::Presence), vec!["b"]);
    assert!(timer(&reaction, "b", TimerKind::KeepAlive).is_some());
}

#[test]
fn test_write_failure_drops_link_but_keeps_peer() {
    let mut alice = started("alice");
    let grace = alice.config().session.exit_grace_period.as_millis() as u64;
    activate(&mut alice, "b", "bob", Timestamp::new(0));

    let t1 = Timestamp::new(100);
    let reaction = alice.handle_event(
        RadioEvent::WriteFailed {
            address: address("b"),
            kind: PayloadKind::Message,
            reason: "attribute write rejected".into(),
        },
        t1,
    );
    assert!(reaction
        .effects
        .contains(&Effect::Disconnect { address: address("b") }));
    assert!(reaction.app_events.is_empty());
    assert_eq!(
        timer(&reaction, "b", TimerKind::Expiry).map(|(delay, _)| delay),
        Some(grace)
    );

    let session = alice.registry().get(&address("b")).unwrap();
    assert_eq!(session.state(), &SessionState::Disconnected { since: t1 });
    let peers = alice.peers(t1);
    assert_eq!(peers.len(), 1);
    assert!(!peers[0].reachable);
}

#[test]
fn test_exhausted_reconnect_returns_to_disconnected() {
    let mut alice = started("alice");
    let grace = alice.config().session.exit_grace_period.as_millis() as u64;
    let max_attempts = alice.config().backoff.max_attempts;
    activate(&mut alice, "b", "bob", Timestamp::new(0));
    let dropped_at = Timestamp::new(100);
    alice.handle_event(RadioEvent::Disconnected { address: address("b") }, dropped_at);

    let mut now = Timestamp::new(200);
    let reaction = alice.handle_event(discovered("b", Some("bob"), -60), now);
    assert_eq!(connects(&reaction), vec!["b"]);

    for _ in 1..max_attempts {
        let reaction = alice.handle_event(connect_failed("b"), now);
        let (delay, generation) = timer(&reaction, "b", TimerKind::ConnectRetry).unwrap();
        now = now + delay;
        let reaction = alice.handle_timer(&address("b"), TimerKind::ConnectRetry, generation, now);
        assert_eq!(connects(&reaction), vec!["b"]);
    }

    let reaction = alice.handle_event(connect_failed("b"), now);
    let session = alice.registry().get(&address("b")).unwrap();
    assert_eq!(session.state(), &SessionState::Disconnected { since: dropped_at });
    // the deadline still counts from the original drop
    let (delay, _) = timer(&reaction, "b", TimerKind::Expiry).unwrap();
    assert_eq!(now + delay, dropped_at + grace);
    assert!(exited(&reaction).is_empty());
}

#[test]
fn test_peer_refusing_every_connect_exits_after_grace() {
    let mut alice = started("alice");
    let grace = alice.config().session.exit_grace_period.as_millis() as u64;
    activate(&mut alice, "b", "bob", Timestamp::new(0));

    let dropped_at = Timestamp::new(100);
    let mut scheduler = Scheduler::default();
    let reaction = alice.handle_event(RadioEvent::Disconnected { address: address("b") }, dropped_at);
    scheduler.absorb(&mut alice, reaction, dropped_at);

    // bob keeps advertising but never accepts a link
    let mut exited_at = None;
    let mut now = dropped_at;
    while now < Timestamp::new(20_000) && exited_at.is_none() {
        now = now + 10u64;
        let mut reaction = scheduler.fire_due(&mut alice, now);
        if now.as_millis() % 100 == 0 {
            let sighting = alice.handle_event(discovered("b", Some("bob"), -60), now);
            scheduler.absorb(&mut alice, sighting.clone(), now);
            reaction.app_events.extend(sighting.app_events);
        }
        if exited(&reaction) == vec!["bob"] {
            exited_at = Some(now);
        }
    }

    let exited_at = exited_at.expect("bob should exit");
    assert!(exited_at.as_millis() <= dropped_at.as_millis() + grace + 100);
    assert!(alice.peers(now).is_empty());
    assert!(alice.registry().session_for(&identity("bob")).is_none());
}

#[test]
fn test_address_presenting_new_identity_replaces_peer() {
    let mut alice = started("alice");
    let config = alice.config().clone();
    let now = Timestamp::new(0);
    activate(&mut alice, "a1", "bob", now);

    // the device restarted with a freshly generated identity
    let reaction = feed(&mut alice, written("a1", &presence("carol", None), &config), now);
    assert_eq!(exited(&reaction), vec!["bob"]);
    assert_eq!(entered(&reaction), vec!["carol"]);
    let identities: Vec<String> = alice
        .peers(now)
        .iter()
        .map(|peer| peer.identity.to_string())
        .collect();
    assert_eq!(identities, vec!["carol"]);

    let t1 = Timestamp::new(100);
    let reaction = alice.handle_event(RadioEvent::Disconnected { address: address("a1") }, t1);
    let (delay, generation) = timer(&reaction, "a1", TimerKind::Expiry).unwrap();
    let reaction = alice.handle_timer(&address("a1"), TimerKind::Expiry, generation, t1 + delay);
    assert_eq!(exited(&reaction), vec!["carol"]);
    assert!(alice.peers(t1 + delay).is_empty());
}

// ----------------------------------------------------------------------------
// Radio stand-in for multi-step scenarios
// ----------------------------------------------------------------------------

fn connect_failed(at: &str) -> RadioEvent {
    RadioEvent::ConnectFailed {
        address: address(at),
        reason: "connection refused".into(),
    }
}

/// Keeps scheduled timers and answers every connect with a failure
#[derive(Default)]
struct Scheduler {
    timers: Vec<(Timestamp, RadioAddress, TimerKind, u64)>,
}

impl Scheduler {
    fn absorb(&mut self, orchestrator: &mut Orchestrator, reaction: Reaction, now: Timestamp) {
        for effect in reaction.effects {
            match effect {
                Effect::ScheduleTimer {
                    address,
                    timer,
                    delay,
                    generation,
                } => self
                    .timers
                    .push((now + delay.as_millis() as u64, address, timer, generation)),
                Effect::Connect { address } => {
                    let refused = orchestrator.handle_event(connect_failed(address.as_str()), now);
                    self.absorb(orchestrator, refused, now);
                }
                _ => {}
            }
        }
    }

    /// Fire every timer due by `now`, returning what they produced
    fn fire_due(&mut self, orchestrator: &mut Orchestrator, now: Timestamp) -> Reaction {
        let mut total = Reaction::new();
        loop {
            let Some(index) = self.timers.iter().position(|(due, ..)| *due <= now) else {
                return total;
            };
            let (_, address, timer, generation) = self.timers.remove(index);
            let reaction = orchestrator.handle_timer(&address, timer, generation, now);
            total.app_events.extend(reaction.app_events.iter().cloned());
            self.absorb(orchestrator, reaction, now);
        }
    }
}
