//! Simulated radio transport backed by a [`RadioMesh`]

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bubbles_core::channel::EventSender;
use bubbles_core::{RadioAddress, RadioCapabilities, RadioTransport, TransportResult};
use smallvec::SmallVec;
use tracing::debug;

use crate::mesh::{deliver, RadioMesh};

/// One call the runtime made on a [`SimulatedRadio`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCall {
    Start,
    Shutdown,
    Advertise(Vec<u8>),
    StopAdvertising,
    StartScan,
    StopScan,
    Connect(RadioAddress),
    Disconnect(RadioAddress),
    Write { to: RadioAddress, chunk: Vec<u8> },
}

/// A node on the mesh that records every call made on it
#[derive(Debug, Clone)]
pub struct SimulatedRadio {
    address: RadioAddress,
    mesh: RadioMesh,
    calls: Arc<Mutex<Vec<RadioCall>>>,
    attribute_limit: Option<usize>,
}

impl SimulatedRadio {
    pub(crate) fn new(address: RadioAddress, mesh: RadioMesh) -> Self {
        Self {
            address,
            mesh,
            calls: Arc::new(Mutex::new(Vec::new())),
            attribute_limit: None,
        }
    }

    /// Report a maximum attribute size through [`RadioTransport::capabilities`]
    pub fn with_attribute_limit(mut self, limit: usize) -> Self {
        self.attribute_limit = Some(limit);
        self
    }

    pub fn address(&self) -> &RadioAddress {
        &self.address
    }

    pub fn mesh(&self) -> &RadioMesh {
        &self.mesh
    }

    fn log(&self) -> MutexGuard<'_, Vec<RadioCall>> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: RadioCall) {
        debug!(radio = %self.address, ?call, "simulated radio call");
        self.log().push(call);
    }

    pub fn calls(&self) -> Vec<RadioCall> {
        self.log().clone()
    }

    pub fn clear_calls(&self) {
        self.log().clear();
    }

    /// Outbound connect attempts, in order
    pub fn connect_attempts(&self) -> Vec<RadioAddress> {
        self.log()
            .iter()
            .filter_map(|call| match call {
                RadioCall::Connect(address) => Some(address.clone()),
                _ => None,
            })
            .collect()
    }

    /// Chunks written to `address`, in order
    pub fn writes_to(&self, address: &RadioAddress) -> Vec<Vec<u8>> {
        self.log()
            .iter()
            .filter_map(|call| match call {
                RadioCall::Write { to, chunk } if to == address => Some(chunk.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl RadioTransport for SimulatedRadio {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn start(&self, events: EventSender) -> TransportResult<()> {
        self.record(RadioCall::Start);
        self.mesh.attach(&self.address, events)
    }

    async fn shutdown(&self) -> TransportResult<()> {
        self.record(RadioCall::Shutdown);
        deliver(self.mesh.detach(&self.address)).await;
        Ok(())
    }

    async fn advertise(&self, presence: &[u8]) -> TransportResult<()> {
        self.record(RadioCall::Advertise(presence.to_vec()));
        deliver(self.mesh.set_advertising(&self.address, Some(presence.to_vec()))).await;
        Ok(())
    }

    async fn stop_advertising(&self) -> TransportResult<()> {
        self.record(RadioCall::StopAdvertising);
        deliver(self.mesh.set_advertising(&self.address, None)).await;
        Ok(())
    }

    async fn start_scan(&self) -> TransportResult<()> {
        self.record(RadioCall::StartScan);
        deliver(self.mesh.set_scanning(&self.address, true)).await;
        Ok(())
    }

    async fn stop_scan(&self) -> TransportResult<()> {
        self.record(RadioCall::StopScan);
        deliver(self.mesh.set_scanning(&self.address, false)).await;
        Ok(())
    }

    async fn connect(&self, address: &RadioAddress) -> TransportResult<()> {
        self.record(RadioCall::Connect(address.clone()));
        let deliveries = self.mesh.open_link(&self.address, address)?;
        deliver(deliveries).await;
        Ok(())
    }

    async fn disconnect(&self, address: &RadioAddress) -> TransportResult<()> {
        self.record(RadioCall::Disconnect(address.clone()));
        deliver(self.mesh.close_link(&self.address, address)).await;
        Ok(())
    }

    async fn write_attribute(&self, address: &RadioAddress, chunk: &[u8]) -> TransportResult<()> {
        self.record(RadioCall::Write {
            to: address.clone(),
            chunk: chunk.to_vec(),
        });
        let deliveries = self.mesh.carry_write(&self.address, address, chunk)?;
        deliver(deliveries).await;
        Ok(())
    }

    fn connected(&self) -> SmallVec<[RadioAddress; 8]> {
        self.mesh.links_of(&self.address).into_iter().collect()
    }

    fn capabilities(&self) -> RadioCapabilities {
        RadioCapabilities {
            max_attribute_size: self.attribute_limit,
            ..RadioCapabilities::default()
        }
    }
}
