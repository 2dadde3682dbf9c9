//! Fallback advertiser for platforms without peripheral support

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bubbles_core::channel::EventSender;
use bubbles_core::RadioAddress;
use tracing::warn;

use crate::config::BleTransportConfig;
use crate::error::BleTransportError;

use super::BleAdvertiser;

// ----------------------------------------------------------------------------
// Fallback Implementation
// ----------------------------------------------------------------------------

/// Scans and connects out, but is never seen and never accepts a link
pub struct FallbackAdvertiser {
    warned: AtomicBool,
}

impl FallbackAdvertiser {
    pub fn new() -> Self {
        Self {
            warned: AtomicBool::new(false),
        }
    }
}

impl Default for FallbackAdvertiser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BleAdvertiser for FallbackAdvertiser {
    async fn start(
        &self,
        _config: &BleTransportConfig,
        _events: EventSender,
    ) -> Result<(), BleTransportError> {
        Ok(())
    }

    async fn start_advertising(
        &self,
        _data: Vec<u8>,
        config: &BleTransportConfig,
    ) -> Result<(), BleTransportError> {
        if !self.warned.swap(true, Ordering::Relaxed) {
            warn!(
                "BLE advertising not supported on this platform. '{}' will not be discoverable \
                 and can only reach peers that advertise themselves.",
                config.local_name
            );
        }
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), BleTransportError> {
        Ok(())
    }

    fn is_advertising(&self) -> bool {
        false
    }

    async fn notify(&self, address: &RadioAddress, _chunk: &[u8]) -> Result<(), BleTransportError> {
        Err(BleTransportError::PeerNotConnected {
            address: address.to_string(),
        })
    }

    fn subscribers(&self) -> Vec<RadioAddress> {
        Vec::new()
    }

    async fn release(&self, _address: &RadioAddress) {}

    async fn shutdown(&self) {}
}
