//! Bluetooth Low Energy radio transport for Bubbles
//!
//! Implements [`RadioTransport`] from `bubbles-core` over BLE. Each device
//! plays both roles at once:
//!
//! - [`central`] scans for bubbles advertisements, opens outbound links and
//!   writes chunks into the remote's inbound characteristic (btleplug)
//! - [`advertising`] advertises the presence body and serves the GATT
//!   service remote centrals write into and subscribe to (bluer on Linux)
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bubbles_ble::{BleTransport, BleTransportConfig};
//! use bubbles_runtime::ContextBuilder;
//! use bubbles_core::PeerIdentity;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = BleTransport::with_config(
//!     BleTransportConfig::new().with_local_name("bubbles-ana"),
//! );
//! let context = ContextBuilder::new(PeerIdentity::new("ana")?)
//!     .with_name("Ana")
//!     .spawn(transport)?;
//! context.start_communications().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Support
//!
//! - **Linux**: both roles, via BlueZ
//! - **Other platforms**: central role only; the device finds and reaches
//!   advertising peers but is not discoverable itself
//!
//! [`RadioTransport`]: bubbles_core::RadioTransport

pub mod advertising;
pub mod central;
mod config;
mod error;
pub mod protocol;
mod transport;

pub use advertising::{BleAdvertiser, PlatformAdvertiser};
pub use central::BleCentral;
pub use config::BleTransportConfig;
pub use error::BleTransportError;
pub use protocol::{
    BUBBLES_INBOUND_CHARACTERISTIC_UUID, BUBBLES_OUTBOUND_CHARACTERISTIC_UUID,
    BUBBLES_SERVICE_UUID,
};
pub use transport::BleTransport;
