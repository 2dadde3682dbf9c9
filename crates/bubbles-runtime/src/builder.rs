//! Context Builder API
//!
//! Wires a transport to a fresh core logic task and radio task and hands
//! back the [`BubblesContext`] that drives them.

use std::sync::Arc;

use bubbles_core::channel::{
    create_app_event_channel, create_command_channel, create_effect_channel, create_event_channel,
};
use bubbles_core::{BubblesConfig, Orchestrator, PeerIdentity, RadioTransport, Result, TimeSource};
use tokio::sync::watch;
use tracing::info;

use crate::context::BubblesContext;
use crate::logic::{CoreLogicTask, TokioTimeSource};
use crate::radio::RadioTask;

// ----------------------------------------------------------------------------
// Context Builder
// ----------------------------------------------------------------------------

pub struct ContextBuilder {
    identity: PeerIdentity,
    name: Option<String>,
    config: BubblesConfig,
    clock: Option<Arc<dyn TimeSource>>,
}

impl ContextBuilder {
    pub fn new(identity: PeerIdentity) -> Self {
        Self {
            identity,
            name: None,
            config: BubblesConfig::default(),
            clock: None,
        }
    }

    /// Display name advertised alongside the identity
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.name = (!name.trim().is_empty()).then_some(name);
        self
    }

    pub fn with_config(mut self, config: BubblesConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the tokio-driven clock
    pub fn with_time_source(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Spawn the runtime tasks on the current tokio runtime.
    ///
    /// The radio stays off until [`BubblesContext::start_communications`].
    pub fn spawn<T: RadioTransport>(self, transport: T) -> Result<BubblesContext> {
        self.config.validate()?;

        let channels = self.config.channels.clone();
        let (command_sender, command_receiver) = create_command_channel(&channels);
        let (event_sender, event_receiver) = create_event_channel(&channels);
        let (effect_sender, effect_receiver) = create_effect_channel(&channels);
        let (app_event_sender, _) = create_app_event_channel(&channels);
        let (peers_sender, peers_receiver) = watch::channel(Vec::new());

        let transport: Arc<dyn RadioTransport> = Arc::new(transport);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(TokioTimeSource::new()));

        let radio_task = RadioTask::new(
            Arc::clone(&transport),
            effect_receiver,
            event_sender.clone(),
            self.config.radio.clone(),
        );
        let orchestrator = Orchestrator::new(self.config, self.identity.clone(), self.name);
        let core_task = CoreLogicTask::new(
            orchestrator,
            Arc::clone(&transport),
            clock,
            command_receiver,
            event_receiver,
            event_sender,
            effect_sender,
            app_event_sender.clone(),
            peers_sender,
        );

        let radio_handle = tokio::spawn(radio_task.run());
        let core_handle = tokio::spawn(core_task.run());
        info!(identity = %self.identity, transport = transport.name(), "bubbles runtime spawned");

        Ok(BubblesContext::new(
            self.identity,
            command_sender,
            app_event_sender,
            peers_receiver,
            core_handle,
            radio_handle,
        ))
    }
}
