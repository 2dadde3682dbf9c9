//! BLE implementation of [`RadioTransport`]
//!
//! Outbound links are GATT client connections made by the [`BleCentral`];
//! inbound links are centrals subscribed to our own GATT service. Writes go
//! to whichever kind of link the address has.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bubbles_core::channel::EventSender;
use bubbles_core::{RadioAddress, RadioCapabilities, RadioTransport, TransportResult};
use smallvec::SmallVec;
use tracing::{debug, info, warn};

use crate::advertising::{BleAdvertiser, PlatformAdvertiser, PERIPHERAL_SUPPORTED};
use crate::central::BleCentral;
use crate::config::BleTransportConfig;
use crate::error::BleTransportError;
use crate::protocol::advertisement_data;

// ----------------------------------------------------------------------------
// BLE Transport
// ----------------------------------------------------------------------------

pub struct BleTransport {
    config: BleTransportConfig,
    central: Mutex<Option<Arc<BleCentral>>>,
    advertiser: PlatformAdvertiser,
}

impl BleTransport {
    pub fn new() -> Self {
        Self::with_config(BleTransportConfig::default())
    }

    pub fn with_config(config: BleTransportConfig) -> Self {
        Self {
            config,
            central: Mutex::new(None),
            advertiser: PlatformAdvertiser::new(),
        }
    }

    pub fn config(&self) -> &BleTransportConfig {
        &self.config
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<BleCentral>>> {
        self.central
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn central(&self) -> Result<Arc<BleCentral>, BleTransportError> {
        self.slot().clone().ok_or(BleTransportError::NotStarted)
    }
}

impl Default for BleTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RadioTransport for BleTransport {
    fn name(&self) -> &'static str {
        "ble"
    }

    async fn start(&self, events: EventSender) -> TransportResult<()> {
        if self.slot().is_some() {
            return Ok(());
        }

        let central = BleCentral::open(self.config.clone(), events.clone()).await?;
        *self.slot() = Some(Arc::new(central));

        // Without the peripheral role this device still finds and reaches
        // peers that advertise
        if let Err(e) = self.advertiser.start(&self.config, events).await {
            warn!("peripheral role unavailable, continuing as central only: {}", e);
        }
        info!("BLE transport started");
        Ok(())
    }

    async fn shutdown(&self) -> TransportResult<()> {
        self.advertiser.shutdown().await;
        let central = self.slot().take();
        if let Some(central) = central {
            central.shutdown().await;
        }
        info!("BLE transport stopped");
        Ok(())
    }

    async fn advertise(&self, presence: &[u8]) -> TransportResult<()> {
        let data = advertisement_data(presence);
        debug!(data = %hex::encode(&data), "updating advertisement");
        self.advertiser
            .start_advertising(data, &self.config)
            .await
            .map_err(Into::into)
    }

    async fn stop_advertising(&self) -> TransportResult<()> {
        self.advertiser.stop_advertising().await.map_err(Into::into)
    }

    async fn start_scan(&self) -> TransportResult<()> {
        self.central()?.start_scan().await.map_err(Into::into)
    }

    async fn stop_scan(&self) -> TransportResult<()> {
        self.central()?.stop_scan().await.map_err(Into::into)
    }

    async fn connect(&self, address: &RadioAddress) -> TransportResult<()> {
        self.central()?.connect(address).await.map_err(Into::into)
    }

    async fn disconnect(&self, address: &RadioAddress) -> TransportResult<()> {
        if let Ok(central) = self.central() {
            central.disconnect(address).await;
        }
        self.advertiser.release(address).await;
        Ok(())
    }

    async fn write_attribute(&self, address: &RadioAddress, chunk: &[u8]) -> TransportResult<()> {
        let central = self.central()?;
        if central.has_link(address) {
            central.write(address, chunk).await.map_err(Into::into)
        } else {
            self.advertiser
                .notify(address, chunk)
                .await
                .map_err(Into::into)
        }
    }

    fn connected(&self) -> SmallVec<[RadioAddress; 8]> {
        let mut connected: SmallVec<[RadioAddress; 8]> = self
            .slot()
            .as_ref()
            .map(|central| central.linked().into_iter().collect())
            .unwrap_or_default();
        for address in self.advertiser.subscribers() {
            if !connected.contains(&address) {
                connected.push(address);
            }
        }
        connected
    }

    fn capabilities(&self) -> RadioCapabilities {
        RadioCapabilities {
            max_attribute_size: Some(self.config.max_attribute_size),
            advertises_presence: PERIPHERAL_SUPPORTED,
            accepts_connections: PERIPHERAL_SUPPORTED,
        }
    }
}
