//! Peripheral role: advertising and the GATT service remote centrals use
//!
//! Remote centrals write chunks into the inbound characteristic and subscribe
//! to the outbound one; chunks for them leave as notifications.

pub mod fallback;
#[cfg(target_os = "linux")]
pub mod linux;

use async_trait::async_trait;
use bubbles_core::channel::EventSender;
use bubbles_core::RadioAddress;

use crate::config::BleTransportConfig;
use crate::error::BleTransportError;

/// Whether this platform can accept inbound links
pub const PERIPHERAL_SUPPORTED: bool = cfg!(target_os = "linux");

// ----------------------------------------------------------------------------
// Cross-platform Advertising Trait
// ----------------------------------------------------------------------------

#[async_trait]
pub trait BleAdvertiser: Send + Sync {
    /// Register the GATT service. Inbound writes raise `AttributeWritten`
    /// and new subscriptions raise `Connected` on `events`.
    async fn start(
        &self,
        config: &BleTransportConfig,
        events: EventSender,
    ) -> Result<(), BleTransportError>;

    /// Replace the current advertisement with one carrying `data`
    async fn start_advertising(
        &self,
        data: Vec<u8>,
        config: &BleTransportConfig,
    ) -> Result<(), BleTransportError>;

    async fn stop_advertising(&self) -> Result<(), BleTransportError>;

    fn is_advertising(&self) -> bool;

    /// Notify one chunk to a subscribed central
    async fn notify(&self, address: &RadioAddress, chunk: &[u8]) -> Result<(), BleTransportError>;

    /// Centrals currently subscribed to the outbound characteristic
    fn subscribers(&self) -> Vec<RadioAddress>;

    /// Drop the link a central opened to us
    async fn release(&self, address: &RadioAddress);

    async fn shutdown(&self);
}

// ----------------------------------------------------------------------------
// Platform Detection and Factory
// ----------------------------------------------------------------------------

pub enum PlatformAdvertiser {
    #[cfg(target_os = "linux")]
    Linux(linux::LinuxAdvertiser),
    #[allow(dead_code)]
    Fallback(fallback::FallbackAdvertiser),
}

impl PlatformAdvertiser {
    /// Create the appropriate advertiser for the current platform
    pub fn new() -> Self {
        #[cfg(target_os = "linux")]
        {
            Self::Linux(linux::LinuxAdvertiser::new())
        }
        #[cfg(not(target_os = "linux"))]
        {
            Self::Fallback(fallback::FallbackAdvertiser::new())
        }
    }

    fn inner(&self) -> &dyn BleAdvertiser {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(advertiser) => advertiser,
            Self::Fallback(advertiser) => advertiser,
        }
    }
}

impl Default for PlatformAdvertiser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BleAdvertiser for PlatformAdvertiser {
    async fn start(
        &self,
        config: &BleTransportConfig,
        events: EventSender,
    ) -> Result<(), BleTransportError> {
        self.inner().start(config, events).await
    }

    async fn start_advertising(
        &self,
        data: Vec<u8>,
        config: &BleTransportConfig,
    ) -> Result<(), BleTransportError> {
        self.inner().start_advertising(data, config).await
    }

    async fn stop_advertising(&self) -> Result<(), BleTransportError> {
        self.inner().stop_advertising().await
    }

    fn is_advertising(&self) -> bool {
        self.inner().is_advertising()
    }

    async fn notify(&self, address: &RadioAddress, chunk: &[u8]) -> Result<(), BleTransportError> {
        self.inner().notify(address, chunk).await
    }

    fn subscribers(&self) -> Vec<RadioAddress> {
        self.inner().subscribers()
    }

    async fn release(&self, address: &RadioAddress) {
        self.inner().release(address).await
    }

    async fn shutdown(&self) {
        self.inner().shutdown().await
    }
}
