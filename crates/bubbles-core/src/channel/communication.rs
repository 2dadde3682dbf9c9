//! Channel Message Types
//!
//! Every message that crosses a task boundary. The core logic task is the
//! only consumer of commands and radio events and the only producer of
//! effects and application events.

use core::fmt;
use core::time::Duration;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::errors::Result;
use crate::payload::PayloadKind;
use crate::peer::Peer;
use crate::session::TimerKind;
use crate::types::{Coordinates, Location, PeerIdentity, RadioAddress};

// ----------------------------------------------------------------------------
// Command: Application → Core Logic
// ----------------------------------------------------------------------------

/// Requests from the application to the core logic task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Begin advertising and scanning
    StartCommunications,
    /// Tear down every session and go quiet
    StopCommunications,
    /// Broadcast text to every active peer
    SendMessage { text: String },
    /// Publish a new local position
    UpdateLocation { coordinates: Coordinates },
    /// Change the advertised display name
    UpdateStatus { name: String },
    /// Stop the core logic task
    Shutdown,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::StartCommunications => f.write_str("StartCommunications"),
            Command::StopCommunications => f.write_str("StopCommunications"),
            Command::SendMessage { text } => write!(f, "SendMessage({} bytes)", text.len()),
            Command::UpdateLocation { coordinates } => write!(f, "UpdateLocation({})", coordinates),
            Command::UpdateStatus { name } => write!(f, "UpdateStatus({})", name),
            Command::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// A command on its way to the core logic task, with somewhere to report
/// whether it was accepted
#[derive(Debug)]
pub struct CommandRequest {
    pub command: Command,
    pub reply: Option<oneshot::Sender<Result<()>>>,
}

impl CommandRequest {
    /// A command nobody waits on
    pub fn fire_and_forget(command: Command) -> Self {
        Self {
            command,
            reply: None,
        }
    }

    pub fn with_reply(command: Command) -> (Self, oneshot::Receiver<Result<()>>) {
        let (reply, receiver) = oneshot::channel();
        (
            Self {
                command,
                reply: Some(reply),
            },
            receiver,
        )
    }

    /// Report the outcome; a requester that stopped waiting is not an error
    pub fn respond(self, outcome: Result<()>) {
        if let Some(reply) = self.reply {
            let _ = reply.send(outcome);
        }
    }
}

// ----------------------------------------------------------------------------
// RadioEvent: Radio → Core Logic
// ----------------------------------------------------------------------------

/// Observations reported by the radio transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RadioEvent {
    /// An advertisement was seen
    Discovered {
        address: RadioAddress,
        rssi: i16,
        /// Presence body carried in the advertisement, if any
        advertisement: Option<Vec<u8>>,
    },
    /// A link to `address` is up, whichever side opened it
    Connected { address: RadioAddress },
    /// The link to `address` went down
    Disconnected { address: RadioAddress },
    /// The remote side wrote one chunk to our attribute
    AttributeWritten { address: RadioAddress, chunk: Vec<u8> },
    /// Signal strength reading on an open link
    SignalSample { address: RadioAddress, rssi: i16 },
    /// An outbound connect did not complete
    ConnectFailed { address: RadioAddress, reason: String },
    /// Every chunk of one payload was written
    WriteCompleted { address: RadioAddress, kind: PayloadKind },
    /// Writing a payload failed after retries
    WriteFailed {
        address: RadioAddress,
        kind: PayloadKind,
        reason: String,
    },
}

impl RadioEvent {
    pub fn address(&self) -> &RadioAddress {
        match self {
            RadioEvent::Discovered { address, .. }
            | RadioEvent::Connected { address }
            | RadioEvent::Disconnected { address }
            | RadioEvent::AttributeWritten { address, .. }
            | RadioEvent::SignalSample { address, .. }
            | RadioEvent::ConnectFailed { address, .. }
            | RadioEvent::WriteCompleted { address, .. }
            | RadioEvent::WriteFailed { address, .. } => address,
        }
    }
}

// ----------------------------------------------------------------------------
// Effect: Core Logic → Radio
// ----------------------------------------------------------------------------

/// Side effects the core logic asks the runtime to perform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Effect {
    /// Advertise with the given presence body
    Advertise { presence: Vec<u8> },
    StopAdvertising,
    StartScan,
    StopScan,
    Connect { address: RadioAddress },
    Disconnect { address: RadioAddress },
    /// Write the chunks of one payload, in order
    Write {
        address: RadioAddress,
        kind: PayloadKind,
        chunks: Vec<Vec<u8>>,
    },
    /// Deliver a timer firing back to the core after `delay`
    ScheduleTimer {
        address: RadioAddress,
        timer: TimerKind,
        delay: Duration,
        generation: u64,
    },
}

// ----------------------------------------------------------------------------
// AppEvent: Core Logic → Application
// ----------------------------------------------------------------------------

/// Changes the application is told about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AppEvent {
    PeerEntered { peer: Peer },
    PeerExited { identity: PeerIdentity },
    PeerUpdatedLocation { peer: Peer },
    PeerUpdatedMessage { identity: PeerIdentity, text: String },
    PeerUpdatedStatus { peer: Peer },
    LocalLocationUpdated { location: Location },
    /// The radio could not be started; nothing is retried
    RadioUnavailable { reason: String },
    CommunicationsStarted,
    CommunicationsStopped,
}

impl AppEvent {
    /// Identity the event is about, when it concerns a single peer
    pub fn identity(&self) -> Option<&PeerIdentity> {
        match self {
            AppEvent::PeerEntered { peer }
            | AppEvent::PeerUpdatedLocation { peer }
            | AppEvent::PeerUpdatedStatus { peer } => Some(&peer.identity),
            AppEvent::PeerExited { identity } | AppEvent::PeerUpdatedMessage { identity, .. } => {
                Some(identity)
            }
            _ => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
