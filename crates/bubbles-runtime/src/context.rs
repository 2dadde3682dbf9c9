//! Application-facing handle to a running bubbles runtime

use bubbles_core::channel::{AppEventReceiver, AppEventSender, CommandSender};
use bubbles_core::{
    BubblesError, Command, CommandRequest, Coordinates, Peer, PeerIdentity, Result,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::builder::ContextBuilder;

// ----------------------------------------------------------------------------
// Bubbles Context
// ----------------------------------------------------------------------------

/// Owned entry point to the protocol: lifecycle, requests and subscriptions.
///
/// Dropping the context without [`shutdown`](Self::shutdown) still winds the
/// runtime down once the tasks notice the command channel closing.
pub struct BubblesContext {
    identity: PeerIdentity,
    command_sender: CommandSender,
    app_events: AppEventSender,
    peers: watch::Receiver<Vec<Peer>>,
    core_handle: Option<JoinHandle<Result<()>>>,
    radio_handle: Option<JoinHandle<()>>,
}

impl BubblesContext {
    pub fn builder(identity: PeerIdentity) -> ContextBuilder {
        ContextBuilder::new(identity)
    }

    pub(crate) fn new(
        identity: PeerIdentity,
        command_sender: CommandSender,
        app_events: AppEventSender,
        peers: watch::Receiver<Vec<Peer>>,
        core_handle: JoinHandle<Result<()>>,
        radio_handle: JoinHandle<()>,
    ) -> Self {
        Self {
            identity,
            command_sender,
            app_events,
            peers,
            core_handle: Some(core_handle),
            radio_handle: Some(radio_handle),
        }
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    pub fn is_running(&self) -> bool {
        self.core_handle
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Power the radio and begin advertising and scanning. Idempotent.
    ///
    /// A radio that cannot start does not fail this call; subscribers see
    /// `AppEvent::RadioUnavailable` instead.
    pub async fn start_communications(&self) -> Result<()> {
        self.request(Command::StartCommunications).await
    }

    /// Force every peer to exit and stop advertising and scanning
    pub async fn stop_communications(&self) -> Result<()> {
        self.request(Command::StopCommunications).await
    }

    /// Stop communications and wait for the runtime tasks to finish
    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some(core_handle) = self.core_handle.take() {
            if let Err(e) = self.request(Command::Shutdown).await {
                warn!("shutdown request not delivered: {}", e);
            }
            match core_handle.await {
                Ok(outcome) => outcome?,
                Err(e) => return Err(BubblesError::channel_error(format!("core logic task panicked: {}", e))),
            }
        }
        if let Some(radio_handle) = self.radio_handle.take() {
            radio_handle
                .await
                .map_err(|e| BubblesError::channel_error(format!("radio task panicked: {}", e)))?;
        }
        info!(identity = %self.identity, "bubbles runtime shut down");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    /// Broadcast text to every peer in range; with nobody around this does
    /// nothing and succeeds
    pub async fn send_message(&self, text: impl Into<String>) -> Result<()> {
        self.request(Command::SendMessage { text: text.into() }).await
    }

    pub async fn update_location(&self, coordinates: Coordinates) -> Result<()> {
        self.request(Command::UpdateLocation { coordinates }).await
    }

    /// Change the advertised display name
    pub async fn update_status(&self, name: impl Into<String>) -> Result<()> {
        self.request(Command::UpdateStatus { name: name.into() }).await
    }

    async fn request(&self, command: Command) -> Result<()> {
        let (request, reply) = CommandRequest::with_reply(command);
        self.command_sender
            .send(request)
            .await
            .map_err(|_| BubblesError::channel_error("core logic task is not running"))?;
        reply
            .await
            .map_err(|_| BubblesError::channel_error("core logic task dropped the request"))?
    }

    // ------------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------------

    /// Copy of the current peer list, ordered by identity
    pub fn peers(&self) -> Vec<Peer> {
        self.peers.borrow().clone()
    }

    /// Discrete peer and lifecycle events from now on
    pub fn subscribe(&self) -> AppEventReceiver {
        self.app_events.subscribe()
    }

    /// The peer list, replaced wholesale whenever it changes
    pub fn subscribe_peers(&self) -> watch::Receiver<Vec<Peer>> {
        self.peers.clone()
    }
}

impl std::fmt::Debug for BubblesContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BubblesContext")
            .field("identity", &self.identity)
            .field("running", &self.is_running())
            .finish()
    }
}
