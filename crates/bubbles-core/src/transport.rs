//! Radio transport abstraction
//!
//! The protocol core never touches a radio. The runtime drives an
//! implementation of [`RadioTransport`] from the effects the core emits, and
//! the transport reports what it observes as [`RadioEvent`]s on the sender
//! handed to [`RadioTransport::start`].
//!
//! [`RadioEvent`]: crate::channel::RadioEvent

use async_trait::async_trait;
use smallvec::SmallVec;

use crate::channel::EventSender;
use crate::errors::TransportError;
use crate::types::RadioAddress;

pub type TransportResult<T> = core::result::Result<T, TransportError>;

// ----------------------------------------------------------------------------
// Radio Transport Trait
// ----------------------------------------------------------------------------

/// Platform radio stack as seen by the runtime
///
/// Calls for one address are never issued concurrently by the runtime, but
/// calls for different addresses may be.
#[async_trait]
pub trait RadioTransport: Send + Sync + 'static {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Power up the radio; events flow into `events` until [`shutdown`].
    /// Fails with [`TransportError::TransportUnavailable`] when the radio is
    /// missing, off or not permitted.
    ///
    /// [`shutdown`]: RadioTransport::shutdown
    async fn start(&self, events: EventSender) -> TransportResult<()>;

    /// Release the radio
    async fn shutdown(&self) -> TransportResult<()>;

    /// Advertise the protocol service, carrying `presence` where the platform allows
    async fn advertise(&self, presence: &[u8]) -> TransportResult<()>;

    async fn stop_advertising(&self) -> TransportResult<()>;

    async fn start_scan(&self) -> TransportResult<()>;

    async fn stop_scan(&self) -> TransportResult<()>;

    /// Open a link; the runtime bounds this with its connect timeout.
    ///
    /// The runtime reports `Connected` itself once this returns `Ok`.
    /// Transports only raise `Connected` for links the remote side opened.
    async fn connect(&self, address: &RadioAddress) -> TransportResult<()>;

    /// Close a link; closing one that is already gone is not an error
    async fn disconnect(&self, address: &RadioAddress) -> TransportResult<()>;

    /// Write one chunk to the peer's protocol attribute
    async fn write_attribute(&self, address: &RadioAddress, chunk: &[u8]) -> TransportResult<()>;

    /// Addresses with an open link
    fn connected(&self) -> SmallVec<[RadioAddress; 8]> {
        SmallVec::new()
    }

    fn capabilities(&self) -> RadioCapabilities {
        RadioCapabilities::default()
    }
}

// ----------------------------------------------------------------------------
// Radio Capabilities
// ----------------------------------------------------------------------------

/// What a transport can and cannot do on this platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioCapabilities {
    /// Largest attribute write the platform accepts, if it is known
    pub max_attribute_size: Option<usize>,
    /// Whether advertisements can carry the presence body
    pub advertises_presence: bool,
    /// Whether this side can accept inbound links
    pub accepts_connections: bool,
}

impl Default for RadioCapabilities {
    fn default() -> Self {
        Self {
            max_attribute_size: None,
            advertises_presence: true,
            accepts_connections: true,
        }
    }
}

impl RadioCapabilities {
    /// Chunk size to use given the configured size and the platform limit
    pub fn effective_chunk_size(&self, configured: usize) -> usize {
        match self.max_attribute_size {
            Some(limit) => configured.min(limit),
            None => configured,
        }
    }
}
