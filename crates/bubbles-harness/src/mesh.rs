//! Shared in-memory radio medium
//!
//! The mesh holds every simulated node's advertising and scanning state and
//! the set of open links. Operations compute the events other nodes should
//! observe while holding the lock, then deliver them after releasing it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use bubbles_core::channel::{EventSender, RadioEvent};
use bubbles_core::{RadioAddress, TransportError};
use tracing::trace;

use crate::radio::SimulatedRadio;

/// Signal strength reported when no pair-specific value was set
pub const DEFAULT_RSSI: i16 = -60;

/// Failures to inject into one node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Faults {
    /// `start` fails as if the radio were missing or off
    pub unavailable: bool,
    /// Number of upcoming outbound connects that fail
    pub failing_connects: u32,
    /// Number of upcoming attribute writes that fail
    pub failing_writes: u32,
}

#[derive(Debug, Default)]
struct Node {
    events: Option<EventSender>,
    advertisement: Option<Vec<u8>>,
    scanning: bool,
    faults: Faults,
}

#[derive(Debug, Default)]
struct MeshState {
    nodes: HashMap<RadioAddress, Node>,
    links: HashSet<(RadioAddress, RadioAddress)>,
    rssi: HashMap<(RadioAddress, RadioAddress), i16>,
    jitter: i16,
}

pub(crate) type Delivery = (EventSender, RadioEvent);

fn pair(a: &RadioAddress, b: &RadioAddress) -> (RadioAddress, RadioAddress) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

impl MeshState {
    fn sender(&self, address: &RadioAddress) -> Option<EventSender> {
        self.nodes.get(address).and_then(|node| node.events.clone())
    }

    /// What `observer` sees when `advertiser` advertises
    fn sighting(&self, observer: &RadioAddress, advertiser: &RadioAddress) -> Option<Delivery> {
        let sender = self.sender(observer)?;
        let advertisement = self.nodes.get(advertiser)?.advertisement.clone()?;
        let base = self
            .rssi
            .get(&pair(observer, advertiser))
            .copied()
            .unwrap_or(DEFAULT_RSSI);
        let noise = if self.jitter > 0 {
            fastrand::i16(-self.jitter..=self.jitter)
        } else {
            0
        };
        Some((
            sender,
            RadioEvent::Discovered {
                address: advertiser.clone(),
                rssi: (base + noise).min(-1),
                advertisement: Some(advertisement),
            },
        ))
    }

    fn scanners(&self, except: &RadioAddress) -> Vec<RadioAddress> {
        self.nodes
            .iter()
            .filter(|(address, node)| *address != except && node.scanning)
            .map(|(address, _)| address.clone())
            .collect()
    }

    fn advertisers(&self, except: &RadioAddress) -> Vec<RadioAddress> {
        self.nodes
            .iter()
            .filter(|(address, node)| *address != except && node.advertisement.is_some())
            .map(|(address, _)| address.clone())
            .collect()
    }

    fn peers_of(&self, address: &RadioAddress) -> Vec<RadioAddress> {
        self.links
            .iter()
            .filter_map(|(a, b)| {
                if a == address {
                    Some(b.clone())
                } else if b == address {
                    Some(a.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    /// Tear down one link and tell the far side
    fn unlink(&mut self, from: &RadioAddress, to: &RadioAddress) -> Option<Delivery> {
        if !self.links.remove(&pair(from, to)) {
            return None;
        }
        self.sender(to).map(|sender| {
            (
                sender,
                RadioEvent::Disconnected {
                    address: from.clone(),
                },
            )
        })
    }
}

pub(crate) async fn deliver(deliveries: Vec<Delivery>) {
    for (sender, event) in deliveries {
        trace!(?event, "mesh delivery");
        // A receiver that went away just misses the event, like a real radio
        let _ = sender.send(event).await;
    }
}

// ----------------------------------------------------------------------------
// Radio Mesh
// ----------------------------------------------------------------------------

/// The shared air every simulated radio transmits into
#[derive(Debug, Clone, Default)]
pub struct RadioMesh {
    state: Arc<Mutex<MeshState>>,
}

impl RadioMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add up to `db` of random noise to every sighting
    pub fn with_jitter(self, db: i16) -> Self {
        self.lock().jitter = db.abs();
        self
    }

    fn lock(&self) -> MutexGuard<'_, MeshState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Join a new node at `address`
    pub fn radio(&self, address: impl Into<String>) -> SimulatedRadio {
        let address = RadioAddress::new(address);
        self.lock().nodes.entry(address.clone()).or_default();
        SimulatedRadio::new(address, self.clone())
    }

    pub fn set_faults(&self, address: &RadioAddress, faults: Faults) {
        self.lock().nodes.entry(address.clone()).or_default().faults = faults;
    }

    /// Signal strength between two nodes, in both directions
    pub fn set_rssi(&self, a: &RadioAddress, b: &RadioAddress, rssi: i16) {
        self.lock().rssi.insert(pair(a, b), rssi);
    }

    pub fn is_linked(&self, a: &RadioAddress, b: &RadioAddress) -> bool {
        self.lock().links.contains(&pair(a, b))
    }

    pub fn link_count(&self) -> usize {
        self.lock().links.len()
    }

    /// Every scanning node sees every other advertising node once
    pub async fn beacon(&self) {
        let deliveries = {
            let state = self.lock();
            let mut deliveries = Vec::new();
            for (observer, node) in &state.nodes {
                if !node.scanning {
                    continue;
                }
                for advertiser in state.advertisers(observer) {
                    deliveries.extend(state.sighting(observer, &advertiser));
                }
            }
            deliveries
        };
        deliver(deliveries).await;
    }

    /// Break a link as if the peers moved out of range; both sides notice
    pub async fn drop_link(&self, a: &RadioAddress, b: &RadioAddress) {
        let deliveries = {
            let mut state = self.lock();
            let mut deliveries: Vec<Delivery> = state.unlink(a, b).into_iter().collect();
            if !deliveries.is_empty() {
                if let Some(sender) = state.sender(a) {
                    deliveries.push((
                        sender,
                        RadioEvent::Disconnected { address: b.clone() },
                    ));
                }
            }
            deliveries
        };
        deliver(deliveries).await;
    }

    /// The node stops advertising and loses every link without a goodbye
    pub async fn go_silent(&self, address: &RadioAddress) {
        let deliveries = {
            let mut state = self.lock();
            if let Some(node) = state.nodes.get_mut(address) {
                node.advertisement = None;
            }
            let mut deliveries = Vec::new();
            for peer in state.peers_of(address) {
                deliveries.extend(state.unlink(address, &peer));
            }
            deliveries
        };
        deliver(deliveries).await;
    }

    // ------------------------------------------------------------------------
    // Node Operations
    // ------------------------------------------------------------------------

    pub(crate) fn attach(&self, address: &RadioAddress, events: EventSender) -> Result<(), TransportError> {
        let mut state = self.lock();
        let node = state.nodes.entry(address.clone()).or_default();
        if node.faults.unavailable {
            return Err(TransportError::TransportUnavailable {
                reason: "simulated radio is powered off".into(),
            });
        }
        node.events = Some(events);
        Ok(())
    }

    pub(crate) fn detach(&self, address: &RadioAddress) -> Vec<Delivery> {
        let mut state = self.lock();
        let mut deliveries = Vec::new();
        for peer in state.peers_of(address) {
            deliveries.extend(state.unlink(address, &peer));
        }
        if let Some(node) = state.nodes.get_mut(address) {
            node.events = None;
            node.advertisement = None;
            node.scanning = false;
        }
        deliveries
    }

    pub(crate) fn set_advertising(&self, address: &RadioAddress, advertisement: Option<Vec<u8>>) -> Vec<Delivery> {
        let mut state = self.lock();
        let announce = advertisement.is_some();
        if let Some(node) = state.nodes.get_mut(address) {
            node.advertisement = advertisement;
        }
        if !announce {
            return Vec::new();
        }
        state
            .scanners(address)
            .iter()
            .filter_map(|observer| state.sighting(observer, address))
            .collect()
    }

    pub(crate) fn set_scanning(&self, address: &RadioAddress, scanning: bool) -> Vec<Delivery> {
        let mut state = self.lock();
        if let Some(node) = state.nodes.get_mut(address) {
            node.scanning = scanning;
        }
        if !scanning {
            return Vec::new();
        }
        state
            .advertisers(address)
            .iter()
            .filter_map(|advertiser| state.sighting(address, advertiser))
            .collect()
    }

    pub(crate) fn open_link(&self, from: &RadioAddress, to: &RadioAddress) -> Result<Vec<Delivery>, TransportError> {
        let mut state = self.lock();
        let failure = |reason: &str| TransportError::ConnectFailure {
            address: to.to_string(),
            reason: reason.into(),
        };

        if let Some(node) = state.nodes.get_mut(from) {
            if node.faults.failing_connects > 0 {
                node.faults.failing_connects -= 1;
                return Err(failure("injected connect failure"));
            }
        }
        if state.links.contains(&pair(from, to)) {
            return Ok(Vec::new());
        }
        let reachable = state
            .nodes
            .get(to)
            .map_or(false, |node| node.events.is_some() && node.advertisement.is_some());
        if !reachable {
            return Err(failure("peer is not advertising"));
        }

        state.links.insert(pair(from, to));
        Ok(state
            .sender(to)
            .map(|sender| {
                (
                    sender,
                    RadioEvent::Connected {
                        address: from.clone(),
                    },
                )
            })
            .into_iter()
            .collect())
    }

    pub(crate) fn close_link(&self, from: &RadioAddress, to: &RadioAddress) -> Vec<Delivery> {
        self.lock().unlink(from, to).into_iter().collect()
    }

    pub(crate) fn carry_write(
        &self,
        from: &RadioAddress,
        to: &RadioAddress,
        chunk: &[u8],
    ) -> Result<Vec<Delivery>, TransportError> {
        let mut state = self.lock();
        if !state.links.contains(&pair(from, to)) {
            return Err(TransportError::NotConnected {
                address: to.to_string(),
            });
        }
        if let Some(node) = state.nodes.get_mut(from) {
            if node.faults.failing_writes > 0 {
                node.faults.failing_writes -= 1;
                return Err(TransportError::WriteFailure {
                    address: to.to_string(),
                    reason: "injected write failure".into(),
                });
            }
        }
        Ok(state
            .sender(to)
            .map(|sender| {
                (
                    sender,
                    RadioEvent::AttributeWritten {
                        address: from.clone(),
                        chunk: chunk.to_vec(),
                    },
                )
            })
            .into_iter()
            .collect())
    }

    pub(crate) fn links_of(&self, address: &RadioAddress) -> Vec<RadioAddress> {
        self.lock().peers_of(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bubbles_core::RadioTransport;
    use tokio::sync::mpsc;

    async fn next(receiver: &mut mpsc::Receiver<RadioEvent>) -> RadioEvent {
        tokio::time::timeout(std::time::Duration::from_secs(1), receiver.recv())
            .await
            .expect("event in time")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_scan_sees_advertisers() {
        let mesh = RadioMesh::new();
        let a = mesh.radio("a");
        let b = mesh.radio("b");
        let (a_tx, mut a_rx) = mpsc::channel(16);
        let (b_tx, _b_rx) = mpsc::channel(16);
        a.start(a_tx).await.unwrap();
        b.start(b_tx).await.unwrap();

        b.advertise(b"bob").await.unwrap();
        a.start_scan().await.unwrap();

        match next(&mut a_rx).await {
            RadioEvent::Discovered {
                address,
                rssi,
                advertisement,
            } => {
                assert_eq!(address.as_str(), "b");
                assert_eq!(rssi, DEFAULT_RSSI);
                assert_eq!(advertisement.as_deref(), Some(&b"bob"[..]));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_link_write_and_drop() {
        let mesh = RadioMesh::new();
        let a = mesh.radio("a");
        let b = mesh.radio("b");
        let (a_tx, mut a_rx) = mpsc::channel(16);
        let (b_tx, mut b_rx) = mpsc::channel(16);
        a.start(a_tx).await.unwrap();
        b.start(b_tx).await.unwrap();
        b.advertise(b"bob").await.unwrap();

        a.connect(b.address()).await.unwrap();
        assert_eq!(
            next(&mut b_rx).await,
            RadioEvent::Connected { address: a.address().clone() }
        );

        a.write_attribute(b.address(), &[1, 0, 1]).await.unwrap();
        assert_eq!(
            next(&mut b_rx).await,
            RadioEvent::AttributeWritten {
                address: a.address().clone(),
                chunk: vec![1, 0, 1]
            }
        );

        mesh.drop_link(a.address(), b.address()).await;
        assert_eq!(
            next(&mut b_rx).await,
            RadioEvent::Disconnected { address: a.address().clone() }
        );
        assert_eq!(
            next(&mut a_rx).await,
            RadioEvent::Disconnected { address: b.address().clone() }
        );
        assert!(a.write_attribute(b.address(), &[1, 0, 1]).await.is_err());
        // closing again is fine
        a.disconnect(b.address()).await.unwrap();
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let mesh = RadioMesh::new();
        let a = mesh.radio("a");
        let b = mesh.radio("b");
        mesh.set_faults(
            b.address(),
            Faults {
                unavailable: true,
                ..Faults::default()
            },
        );
        let (b_tx, _b_rx) = mpsc::channel(16);
        assert!(matches!(
            b.start(b_tx).await,
            Err(TransportError::TransportUnavailable { .. })
        ));

        mesh.set_faults(
            a.address(),
            Faults {
                failing_connects: 1,
                ..Faults::default()
            },
        );
        let (a_tx, _a_rx) = mpsc::channel(16);
        a.start(a_tx).await.unwrap();
        assert!(a.connect(b.address()).await.is_err());
        // b never came up, so the second attempt fails for a different reason
        assert!(matches!(
            a.connect(b.address()).await,
            Err(TransportError::ConnectFailure { .. })
        ));
    }
}
