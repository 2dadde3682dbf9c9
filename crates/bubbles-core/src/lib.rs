//! Bubbles Core Protocol Implementation
//!
//! Sans-IO core of a short-range radio "who is near me" protocol: peer
//! discovery, per-address session state machines, identity binding and
//! deduplication, payload fragmentation and proximity estimation. The
//! [`Orchestrator`] ties these together; a runtime feeds it events and carries
//! out the effects it returns.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod channel;
pub mod config;
pub mod errors;
pub mod orchestrator;
pub mod payload;
pub mod peer;
pub mod proximity;
pub mod registry;
pub mod session;
pub mod transport;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use channel::{AppEvent, ChannelConfig, Command, CommandRequest, Effect, RadioEvent};
pub use config::{
    BackoffConfig, BubblesConfig, CodecConfig, ProximityConfig, RadioConfig, SessionConfig,
};
pub use errors::{BubblesError, ConfigError, PayloadError, Result, SessionError, TransportError};
pub use orchestrator::{Orchestrator, Reaction};
pub use payload::{Chunk, Payload, PayloadFragmenter, PayloadKind, Reassembler};
pub use peer::Peer;
pub use proximity::ProximityEstimator;
pub use registry::{BindOutcome, PeerRegistry};
pub use session::{PeerSession, Role, SessionInput, SessionOutput, SessionState, TimerKind};
pub use transport::{RadioCapabilities, RadioTransport, TransportResult};
pub use types::{
    Coordinates, Location, PeerIdentity, RadioAddress, SystemTimeSource, TimeSource, Timestamp,
};
