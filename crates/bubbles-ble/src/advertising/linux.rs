//! Linux peripheral role using bluer (BlueZ)

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bluer::adv::{Advertisement, AdvertisementHandle, Type as AdvertisementType};
use bluer::gatt::local::{
    characteristic_control, Application, ApplicationHandle, Characteristic,
    CharacteristicControl, CharacteristicControlEvent, CharacteristicControlHandle,
    CharacteristicNotify,
    CharacteristicNotifyMethod, CharacteristicWrite, CharacteristicWriteMethod, Service,
};
use bluer::gatt::CharacteristicWriter;
use bubbles_core::channel::EventSender;
use bubbles_core::{RadioAddress, RadioEvent};
use futures::{FutureExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BleTransportConfig;
use crate::error::BleTransportError;
use crate::protocol::{
    BUBBLES_INBOUND_CHARACTERISTIC_UUID, BUBBLES_OUTBOUND_CHARACTERISTIC_UUID,
    BUBBLES_SERVICE_UUID,
};

use super::BleAdvertiser;

type Subscribers = Arc<Mutex<HashMap<RadioAddress, CharacteristicWriter>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ----------------------------------------------------------------------------
// Linux Implementation
// ----------------------------------------------------------------------------

#[derive(Default)]
struct Peripheral {
    session: Option<bluer::Session>,
    adapter: Option<bluer::Adapter>,
    application: Option<ApplicationHandle>,
    advertisement: Option<AdvertisementHandle>,
    subscriptions: Option<JoinHandle<()>>,
}

pub struct LinuxAdvertiser {
    state: tokio::sync::Mutex<Peripheral>,
    subscribers: Subscribers,
}

impl LinuxAdvertiser {
    pub fn new() -> Self {
        Self {
            state: tokio::sync::Mutex::new(Peripheral::default()),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for LinuxAdvertiser {
    fn default() -> Self {
        Self::new()
    }
}

impl Peripheral {
    async fn initialize(&mut self, config: &BleTransportConfig) -> Result<(), BleTransportError> {
        if self.adapter.is_some() {
            return Ok(());
        }

        let session = bluer::Session::new().await.map_err(|e| {
            BleTransportError::AdapterNotAvailable(format!("BlueZ session: {}", e))
        })?;
        let names = session
            .adapter_names()
            .await
            .map_err(|e| BleTransportError::AdapterNotAvailable(e.to_string()))?;
        let name = names.get(config.adapter_index).ok_or_else(|| {
            BleTransportError::AdapterNotAvailable(format!(
                "no BLE adapter at index {}",
                config.adapter_index
            ))
        })?;
        let adapter = session
            .adapter(name)
            .map_err(|e| BleTransportError::AdapterNotAvailable(e.to_string()))?;

        if !adapter.is_powered().await.unwrap_or(false) {
            adapter.set_powered(true).await.map_err(|e| {
                BleTransportError::AdapterNotAvailable(format!("failed to power on adapter: {}", e))
            })?;
        }

        info!(adapter = %name, "BlueZ adapter initialized for peripheral role");
        self.session = Some(session);
        self.adapter = Some(adapter);
        Ok(())
    }

    fn adapter(&self) -> Result<&bluer::Adapter, BleTransportError> {
        self.adapter.as_ref().ok_or(BleTransportError::NotStarted)
    }
}

/// GATT application with the write-only inbound and notify-only outbound
/// characteristics
fn application(events: EventSender, control_handle: CharacteristicControlHandle) -> Application {
    let inbound_write = CharacteristicWriteMethod::Fun(Box::new(move |value, request| {
        let events = events.clone();
        async move {
            let address = RadioAddress::new(request.device_address.to_string());
            let event = RadioEvent::AttributeWritten {
                address,
                chunk: value,
            };
            if events.send(event).await.is_err() {
                debug!("event channel closed, dropping inbound write");
            }
            Ok(())
        }
        .boxed()
    }));

    Application {
        services: vec![Service {
            uuid: BUBBLES_SERVICE_UUID,
            primary: true,
            characteristics: vec![
                Characteristic {
                    uuid: BUBBLES_INBOUND_CHARACTERISTIC_UUID,
                    write: Some(CharacteristicWrite {
                        write: true,
                        write_without_response: true,
                        method: inbound_write,
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                Characteristic {
                    uuid: BUBBLES_OUTBOUND_CHARACTERISTIC_UUID,
                    notify: Some(CharacteristicNotify {
                        notify: true,
                        method: CharacteristicNotifyMethod::Io,
                        ..Default::default()
                    }),
                    control_handle,
                    ..Default::default()
                },
            ],
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// A central subscribing to the outbound characteristic is the inbound link
async fn accept_subscribers(
    control: CharacteristicControl,
    subscribers: Subscribers,
    events: EventSender,
) {
    futures::pin_mut!(control);
    while let Some(event) = control.next().await {
        let CharacteristicControlEvent::Notify(writer) = event else {
            continue;
        };
        let address = RadioAddress::new(writer.device_address().to_string());
        info!(%address, mtu = writer.mtu(), "central subscribed");
        lock(&subscribers).insert(address.clone(), writer);
        if events.send(RadioEvent::Connected { address }).await.is_err() {
            break;
        }
    }
    debug!("subscription stream ended");
}

#[async_trait]
impl BleAdvertiser for LinuxAdvertiser {
    async fn start(
        &self,
        config: &BleTransportConfig,
        events: EventSender,
    ) -> Result<(), BleTransportError> {
        let mut state = self.state.lock().await;
        state.initialize(config).await?;
        if state.application.is_some() {
            return Ok(());
        }

        let (control, control_handle) = characteristic_control();
        let handle = state
            .adapter()?
            .serve_gatt_application(application(events.clone(), control_handle))
            .await
            .map_err(|e| {
                BleTransportError::AdvertisingFailed(format!("failed to register GATT service: {}", e))
            })?;
        state.application = Some(handle);
        state.subscriptions = Some(tokio::spawn(accept_subscribers(
            control,
            self.subscribers.clone(),
            events,
        )));
        info!("GATT service registered");
        Ok(())
    }

    async fn start_advertising(
        &self,
        data: Vec<u8>,
        config: &BleTransportConfig,
    ) -> Result<(), BleTransportError> {
        let mut state = self.state.lock().await;
        // Dropping the old handle withdraws it
        state.advertisement = None;

        let mut manufacturer_data = BTreeMap::new();
        manufacturer_data.insert(config.company_id, data);
        let advertisement = Advertisement {
            advertisement_type: AdvertisementType::Peripheral,
            manufacturer_data,
            local_name: Some(config.local_name.clone()),
            discoverable: Some(true),
            ..Default::default()
        };

        let handle = state
            .adapter()?
            .advertise(advertisement)
            .await
            .map_err(|e| BleTransportError::AdvertisingFailed(e.to_string()))?;
        state.advertisement = Some(handle);
        debug!(name = %config.local_name, "advertisement registered");
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), BleTransportError> {
        if self.state.lock().await.advertisement.take().is_some() {
            info!("stopped BLE advertising");
        }
        Ok(())
    }

    fn is_advertising(&self) -> bool {
        self.state
            .try_lock()
            .map(|state| state.advertisement.is_some())
            .unwrap_or(true)
    }

    async fn notify(&self, address: &RadioAddress, chunk: &[u8]) -> Result<(), BleTransportError> {
        // The runtime never writes to one address concurrently
        let mut writer = lock(&self.subscribers).remove(address).ok_or_else(|| {
            BleTransportError::PeerNotConnected {
                address: address.to_string(),
            }
        })?;

        match writer.write_all(chunk).await {
            Ok(()) => {
                lock(&self.subscribers).entry(address.clone()).or_insert(writer);
                Ok(())
            }
            Err(e) => {
                warn!(%address, "notification failed, dropping subscriber: {}", e);
                Err(BleTransportError::WriteFailed {
                    address: address.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    fn subscribers(&self) -> Vec<RadioAddress> {
        lock(&self.subscribers).keys().cloned().collect()
    }

    async fn release(&self, address: &RadioAddress) {
        if lock(&self.subscribers).remove(address).is_none() {
            return;
        }
        let state = self.state.lock().await;
        let (Ok(adapter), Ok(device_address)) =
            (state.adapter(), address.as_str().parse::<bluer::Address>())
        else {
            return;
        };
        if let Ok(device) = adapter.device(device_address) {
            if let Err(e) = device.disconnect().await {
                debug!(%address, "disconnect of subscribed central failed: {}", e);
            }
        }
    }

    async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.advertisement = None;
        state.application = None;
        if let Some(task) = state.subscriptions.take() {
            task.abort();
        }
        lock(&self.subscribers).clear();
        state.adapter = None;
        state.session = None;
        info!("peripheral role released");
    }
}
