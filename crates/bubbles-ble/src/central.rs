//! Central role using btleplug: scanning, outbound links and writes

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bubbles_core::channel::EventSender;
use bubbles_core::{RadioAddress, RadioEvent};
use futures::stream::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BleTransportConfig;
use crate::error::BleTransportError;
use crate::protocol::{
    parse_advertisement, BUBBLES_INBOUND_CHARACTERISTIC_UUID,
    BUBBLES_OUTBOUND_CHARACTERISTIC_UUID,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Address the rest of the stack knows a peripheral by.
///
/// BlueZ reports the same device address in both roles. Other platforms hide
/// it, so their opaque peripheral id stands in.
fn radio_address(peripheral: &Peripheral) -> RadioAddress {
    #[cfg(target_os = "linux")]
    {
        RadioAddress::new(peripheral.address().to_string())
    }
    #[cfg(not(target_os = "linux"))]
    {
        RadioAddress::new(format!("{:?}", peripheral.id()))
    }
}

// ----------------------------------------------------------------------------
// Central
// ----------------------------------------------------------------------------

struct CentralLink {
    peripheral: Peripheral,
    inbound: Characteristic,
    notifications: JoinHandle<()>,
}

type Seen = Arc<Mutex<HashMap<RadioAddress, Peripheral>>>;
type Links = Arc<Mutex<HashMap<RadioAddress, CentralLink>>>;

/// One BLE adapter in the central role
pub struct BleCentral {
    adapter: Adapter,
    config: BleTransportConfig,
    events: EventSender,
    /// Bubbles devices the scanner has reported
    seen: Seen,
    links: Links,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl BleCentral {
    /// Claim the configured adapter and start forwarding its events
    pub async fn open(
        config: BleTransportConfig,
        events: EventSender,
    ) -> Result<Self, BleTransportError> {
        let manager = Manager::new()
            .await
            .map_err(|e| BleTransportError::AdapterNotAvailable(format!("BLE manager: {}", e)))?;
        let adapters = manager
            .adapters()
            .await
            .map_err(|e| BleTransportError::AdapterNotAvailable(format!("BLE adapters: {}", e)))?;
        let adapter = adapters
            .into_iter()
            .nth(config.adapter_index)
            .ok_or_else(|| {
                BleTransportError::AdapterNotAvailable(format!(
                    "no BLE adapter at index {}",
                    config.adapter_index
                ))
            })?;

        let stream = adapter
            .events()
            .await
            .map_err(|e| BleTransportError::EventStreamFailed(e.to_string()))?;

        let central = Self {
            adapter,
            config,
            events,
            seen: Arc::new(Mutex::new(HashMap::new())),
            links: Arc::new(Mutex::new(HashMap::new())),
            pump: Mutex::new(None),
        };
        let pump = EventPump {
            adapter: central.adapter.clone(),
            company_id: central.config.company_id,
            seen: central.seen.clone(),
            links: central.links.clone(),
            events: central.events.clone(),
        };
        *lock(&central.pump) = Some(tokio::spawn(pump.run(stream)));
        info!("BLE adapter initialized");
        Ok(central)
    }

    pub async fn start_scan(&self) -> Result<(), BleTransportError> {
        // Manufacturer data, not a service UUID, marks bubbles devices
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| BleTransportError::EventStreamFailed(format!("start scan: {}", e)))?;
        info!("BLE scanning started");
        Ok(())
    }

    pub async fn stop_scan(&self) -> Result<(), BleTransportError> {
        self.adapter
            .stop_scan()
            .await
            .map_err(|e| BleTransportError::EventStreamFailed(format!("stop scan: {}", e)))?;
        info!("BLE scanning stopped");
        Ok(())
    }

    pub fn has_link(&self, address: &RadioAddress) -> bool {
        lock(&self.links).contains_key(address)
    }

    pub fn linked(&self) -> Vec<RadioAddress> {
        lock(&self.links).keys().cloned().collect()
    }

    /// Connect, find the bubbles characteristics and subscribe to the
    /// remote's outbound notifications
    pub async fn connect(&self, address: &RadioAddress) -> Result<(), BleTransportError> {
        let peripheral = lock(&self.seen).get(address).cloned().ok_or_else(|| {
            BleTransportError::PeerNotDiscovered {
                address: address.to_string(),
            }
        })?;

        if !peripheral.is_connected().await.unwrap_or(false) {
            peripheral
                .connect()
                .await
                .map_err(|e| BleTransportError::ConnectionFailed {
                    address: address.to_string(),
                    reason: e.to_string(),
                })?;
        }

        match self.prepare_link(address, &peripheral).await {
            Ok(link) => {
                if let Some(stale) = lock(&self.links).insert(address.clone(), link) {
                    stale.notifications.abort();
                }
                info!(%address, "BLE link up");
                Ok(())
            }
            Err(e) => {
                if let Err(disconnect) = peripheral.disconnect().await {
                    debug!(%address, "disconnect after failed setup: {}", disconnect);
                }
                Err(e)
            }
        }
    }

    async fn prepare_link(
        &self,
        address: &RadioAddress,
        peripheral: &Peripheral,
    ) -> Result<CentralLink, BleTransportError> {
        let discovery_failed = |reason: String| BleTransportError::ServiceDiscoveryFailed {
            address: address.to_string(),
            reason,
        };
        timeout(
            self.config.service_discovery_timeout,
            peripheral.discover_services(),
        )
        .await
        .map_err(|_| discovery_failed("timed out".to_string()))?
        .map_err(|e| discovery_failed(e.to_string()))?;

        let characteristics = peripheral.characteristics();
        let find = |uuid: Uuid| {
            characteristics
                .iter()
                .find(|characteristic| characteristic.uuid == uuid)
                .cloned()
                .ok_or_else(|| BleTransportError::CharacteristicNotFound {
                    characteristic: uuid.to_string(),
                })
        };
        let inbound = find(BUBBLES_INBOUND_CHARACTERISTIC_UUID)?;
        let outbound = find(BUBBLES_OUTBOUND_CHARACTERISTIC_UUID)?;

        // Take the stream before subscribing so the first chunk is not missed
        let mut notifications = peripheral
            .notifications()
            .await
            .map_err(|e| BleTransportError::SubscriptionFailed(e.to_string()))?;
        peripheral
            .subscribe(&outbound)
            .await
            .map_err(|e| BleTransportError::SubscriptionFailed(e.to_string()))?;

        let events = self.events.clone();
        let from = address.clone();
        let notifications = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != BUBBLES_OUTBOUND_CHARACTERISTIC_UUID {
                    continue;
                }
                let event = RadioEvent::AttributeWritten {
                    address: from.clone(),
                    chunk: notification.value,
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
            debug!(address = %from, "notification stream ended");
        });

        Ok(CentralLink {
            peripheral: peripheral.clone(),
            inbound,
            notifications,
        })
    }

    /// Write one chunk into the remote's inbound characteristic
    pub async fn write(&self, address: &RadioAddress, chunk: &[u8]) -> Result<(), BleTransportError> {
        if chunk.len() > self.config.max_attribute_size {
            return Err(BleTransportError::ValueTooLarge {
                size: chunk.len(),
                max_size: self.config.max_attribute_size,
            });
        }

        let (peripheral, inbound) = {
            let links = lock(&self.links);
            let link = links
                .get(address)
                .ok_or_else(|| BleTransportError::PeerNotConnected {
                    address: address.to_string(),
                })?;
            (link.peripheral.clone(), link.inbound.clone())
        };

        let write_type = if self.config.write_with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        peripheral
            .write(&inbound, chunk, write_type)
            .await
            .map_err(|e| BleTransportError::WriteFailed {
                address: address.to_string(),
                reason: e.to_string(),
            })
    }

    /// Tear down an outbound link; a link already gone is not an error
    pub async fn disconnect(&self, address: &RadioAddress) {
        let Some(link) = lock(&self.links).remove(address) else {
            return;
        };
        link.notifications.abort();
        if let Err(e) = link.peripheral.disconnect().await {
            debug!(%address, "disconnect failed: {}", e);
        }
        info!(%address, "BLE link closed");
    }

    pub async fn shutdown(&self) {
        if let Err(e) = self.adapter.stop_scan().await {
            debug!("stop scan during shutdown: {}", e);
        }
        for address in self.linked() {
            self.disconnect(&address).await;
        }
        if let Some(pump) = lock(&self.pump).take() {
            pump.abort();
        }
        lock(&self.seen).clear();
    }
}

// ----------------------------------------------------------------------------
// Adapter Event Pump
// ----------------------------------------------------------------------------

type CentralEvents = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;

/// Turns adapter events into radio events
struct EventPump {
    adapter: Adapter,
    company_id: u16,
    seen: Seen,
    links: Links,
    events: EventSender,
}

impl EventPump {
    async fn run(self, mut stream: CentralEvents) {
        while let Some(event) = stream.next().await {
            let delivered = match event {
                CentralEvent::DeviceDiscovered(id)
                | CentralEvent::DeviceUpdated(id)
                | CentralEvent::ManufacturerDataAdvertisement { id, .. } => {
                    self.sighting(&id).await
                }
                CentralEvent::DeviceDisconnected(id) => self.lost(&id).await,
                _ => true,
            };
            if !delivered {
                debug!("event channel closed, stopping BLE event pump");
                return;
            }
        }
        warn!("BLE adapter event stream ended");
    }

    /// Returns `false` once nobody is listening
    async fn sighting(&self, id: &PeripheralId) -> bool {
        let peripheral = match self.adapter.peripheral(id).await {
            Ok(peripheral) => peripheral,
            Err(e) => {
                debug!("sighted peripheral vanished: {}", e);
                return true;
            }
        };
        let properties = match peripheral.properties().await {
            Ok(Some(properties)) => properties,
            _ => return true,
        };
        let Some(advertisement) =
            parse_advertisement(&properties.manufacturer_data, self.company_id)
        else {
            return true;
        };

        let address = radio_address(&peripheral);
        lock(&self.seen).insert(address.clone(), peripheral);
        let linked = lock(&self.links).contains_key(&address);

        let event = match (linked, properties.rssi) {
            (true, Some(rssi)) => RadioEvent::SignalSample { address, rssi },
            (true, None) => return true,
            // Unknown strength reads as 0, which the estimator discards
            (false, rssi) => {
                if let Some(body) = &advertisement {
                    debug!(%address, advertisement = %hex::encode(body), "bubbles device sighted");
                }
                RadioEvent::Discovered {
                    address,
                    rssi: rssi.unwrap_or(0),
                    advertisement,
                }
            }
        };
        self.events.send(event).await.is_ok()
    }

    async fn lost(&self, id: &PeripheralId) -> bool {
        let Ok(peripheral) = self.adapter.peripheral(id).await else {
            return true;
        };
        let address = radio_address(&peripheral);
        let link = lock(&self.links).remove(&address);
        let known = lock(&self.seen).contains_key(&address);
        if let Some(link) = &link {
            link.notifications.abort();
        }
        if link.is_none() && !known {
            return true;
        }
        info!(%address, "BLE link lost");
        self.events
            .send(RadioEvent::Disconnected { address })
            .await
            .is_ok()
    }
}
