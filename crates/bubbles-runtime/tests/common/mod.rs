//! Shared helpers for runtime integration tests

#![allow(dead_code)]

use std::time::Duration;

use bubbles_core::channel::AppEventReceiver;
use bubbles_harness::{RadioMesh, SimulatedRadio};
use bubbles_runtime::{AppEvent, BubblesConfig, BubblesContext, PeerIdentity};
use tokio::sync::broadcast::error::RecvError;

pub const PATIENCE: Duration = Duration::from_secs(5);

pub fn identity(name: &str) -> PeerIdentity {
    PeerIdentity::new(name).expect("valid identity")
}

/// One simulated device: the runtime handle, its radio and an event feed
/// subscribed before anything happened
pub struct Device {
    pub context: BubblesContext,
    pub radio: SimulatedRadio,
    pub events: AppEventReceiver,
}

pub fn device(mesh: &RadioMesh, name: &str) -> Device {
    let radio = mesh.radio(format!("{}-radio", name));
    let context = BubblesContext::builder(identity(name))
        .with_name(name.to_uppercase())
        .with_config(BubblesConfig::testing())
        .spawn(radio.clone())
        .expect("runtime spawns");
    let events = context.subscribe();
    Device {
        context,
        radio,
        events,
    }
}

/// Wait for the first event matching `wanted`, returning it and everything
/// skipped on the way
pub async fn wait_for<F>(events: &mut AppEventReceiver, wanted: F) -> (AppEvent, Vec<AppEvent>)
where
    F: Fn(&AppEvent) -> bool,
{
    let mut skipped = Vec::new();
    let outcome = tokio::time::timeout(PATIENCE, async {
        loop {
            match events.recv().await {
                Ok(event) if wanted(&event) => return event,
                Ok(event) => skipped.push(event),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("app event channel closed"),
            }
        }
    })
    .await;
    match outcome {
        Ok(event) => (event, skipped),
        Err(_) => panic!("timed out waiting for event; saw {:?}", skipped),
    }
}

/// Everything already queued, without waiting
pub fn drain(events: &mut AppEventReceiver) -> Vec<AppEvent> {
    let mut seen = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => seen.push(event),
            Err(tokio::sync::broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return seen,
        }
    }
}

pub fn entered(who: &str) -> impl Fn(&AppEvent) -> bool + '_ {
    move |event| matches!(event, AppEvent::PeerEntered { peer } if peer.identity.as_str() == who)
}

pub fn exited(who: &str) -> impl Fn(&AppEvent) -> bool + '_ {
    move |event| matches!(event, AppEvent::PeerExited { identity } if identity.as_str() == who)
}

/// Start both devices and wait until each has met the other
pub async fn meet(a: &mut Device, a_name: &str, b: &mut Device, b_name: &str) {
    a.context.start_communications().await.expect("start");
    b.context.start_communications().await.expect("start");
    wait_for(&mut a.events, entered(b_name)).await;
    wait_for(&mut b.events, entered(a_name)).await;
}
