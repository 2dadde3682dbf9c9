//! Error types for the BLE transport

use bubbles_core::TransportError;
use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors specific to the BLE transport
#[derive(Error, Debug)]
pub enum BleTransportError {
    #[error("BLE adapter not available: {0}")]
    AdapterNotAvailable(String),

    #[error("Transport has not been started")]
    NotStarted,

    #[error("Device {address} has not been seen by the scanner")]
    PeerNotDiscovered { address: String },

    #[error("No link to {address}")]
    PeerNotConnected { address: String },

    #[error("Failed to connect to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Failed to discover services on {address}: {reason}")]
    ServiceDiscoveryFailed { address: String, reason: String },

    #[error("Characteristic not found: {characteristic}")]
    CharacteristicNotFound { characteristic: String },

    #[error("Failed to subscribe to notifications: {0}")]
    SubscriptionFailed(String),

    #[error("Failed to write to {address}: {reason}")]
    WriteFailed { address: String, reason: String },

    #[error("Failed to get BLE events: {0}")]
    EventStreamFailed(String),

    #[error("Advertising failed: {0}")]
    AdvertisingFailed(String),

    #[error("Attribute value too large: {size} bytes (max: {max_size})")]
    ValueTooLarge { size: usize, max_size: usize },
}

impl From<BleTransportError> for TransportError {
    fn from(err: BleTransportError) -> Self {
        match err {
            BleTransportError::AdapterNotAvailable(reason) => {
                TransportError::TransportUnavailable { reason }
            }
            BleTransportError::PeerNotDiscovered { address } => TransportError::ConnectFailure {
                address,
                reason: "not discovered".to_string(),
            },
            BleTransportError::PeerNotConnected { address } => {
                TransportError::NotConnected { address }
            }
            BleTransportError::ConnectionFailed { address, reason }
            | BleTransportError::ServiceDiscoveryFailed { address, reason } => {
                TransportError::ConnectFailure { address, reason }
            }
            BleTransportError::WriteFailed { address, reason } => {
                TransportError::WriteFailure { address, reason }
            }
            other => TransportError::Platform {
                reason: other.to_string(),
            },
        }
    }
}
