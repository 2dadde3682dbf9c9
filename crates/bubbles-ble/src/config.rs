//! BLE transport configuration

use std::time::Duration;

use bubbles_core::config::duration_ms;
use serde::{Deserialize, Serialize};

use crate::protocol::{DEFAULT_COMPANY_ID, MIN_ATTRIBUTE_SIZE};

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for the BLE transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleTransportConfig {
    /// Index into the host's adapter list
    pub adapter_index: usize,
    /// Local name placed in advertisements
    pub local_name: String,
    /// Manufacturer data key carrying the presence body
    pub company_id: u16,
    /// Largest attribute value written in one operation
    pub max_attribute_size: usize,
    /// Acknowledged writes surface failures; unacknowledged writes are faster
    pub write_with_response: bool,
    /// Bound on GATT service discovery after a link comes up
    #[serde(with = "duration_ms")]
    pub service_discovery_timeout: Duration,
}

impl Default for BleTransportConfig {
    fn default() -> Self {
        Self {
            adapter_index: 0,
            local_name: "bubbles".to_string(),
            company_id: DEFAULT_COMPANY_ID,
            max_attribute_size: MIN_ATTRIBUTE_SIZE,
            write_with_response: true,
            service_discovery_timeout: Duration::from_secs(5),
        }
    }
}

impl BleTransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adapter_index(mut self, index: usize) -> Self {
        self.adapter_index = index;
        self
    }

    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = name.into();
        self
    }

    pub fn with_company_id(mut self, company_id: u16) -> Self {
        self.company_id = company_id;
        self
    }

    /// Raise the attribute size for stacks known to negotiate a larger MTU
    pub fn with_max_attribute_size(mut self, size: usize) -> Self {
        self.max_attribute_size = size.max(MIN_ATTRIBUTE_SIZE);
        self
    }

    pub fn with_write_with_response(mut self, enabled: bool) -> Self {
        self.write_with_response = enabled;
        self
    }

    pub fn with_service_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.service_discovery_timeout = timeout;
        self
    }
}
