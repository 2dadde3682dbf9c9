//! Core Logic Task Implementation
//!
//! Owns the sans-IO [`Orchestrator`] and is the only place it is touched.
//! Commands, radio events and timer firings are processed one at a time;
//! the resulting effects go to the radio task and the application events to
//! every subscriber.

use std::sync::Arc;
use std::time::Duration;

use bubbles_core::channel::{
    AppEventSender, CommandReceiver, EffectSender, EventReceiver, EventSender,
};
use bubbles_core::{
    AppEvent, BubblesError, Command, CommandRequest, Effect, Orchestrator, Peer, RadioTransport,
    Reaction, Result, TimeSource, TransportError,
};
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::timers::{TimerFired, TimerReceiver, TimerScheduler};

// ----------------------------------------------------------------------------
// Core Logic Task
// ----------------------------------------------------------------------------

/// The task that owns every session and decides what the radio does next
pub struct CoreLogicTask {
    orchestrator: Orchestrator,
    transport: Arc<dyn RadioTransport>,
    clock: Arc<dyn TimeSource>,
    command_receiver: CommandReceiver,
    event_receiver: EventReceiver,
    /// Handed to the transport when the radio is powered up
    event_sender: EventSender,
    effect_sender: EffectSender,
    app_event_sender: AppEventSender,
    peers: watch::Sender<Vec<Peer>>,
    timers: TimerScheduler,
    timer_receiver: TimerReceiver,
    maintenance_interval: Duration,
    radio_started: bool,
    running: bool,
}

impl CoreLogicTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orchestrator: Orchestrator,
        transport: Arc<dyn RadioTransport>,
        clock: Arc<dyn TimeSource>,
        command_receiver: CommandReceiver,
        event_receiver: EventReceiver,
        event_sender: EventSender,
        effect_sender: EffectSender,
        app_event_sender: AppEventSender,
        peers: watch::Sender<Vec<Peer>>,
    ) -> Self {
        let config = orchestrator.config();
        let (timers, timer_receiver) = TimerScheduler::new(config.channels.event_buffer_size);
        let maintenance_interval = config.maintenance_interval;
        Self {
            orchestrator,
            transport,
            clock,
            command_receiver,
            event_receiver,
            event_sender,
            effect_sender,
            app_event_sender,
            peers,
            timers,
            timer_receiver,
            maintenance_interval,
            radio_started: false,
            running: true,
        }
    }

    /// Run until a `Shutdown` command arrives or every command sender is gone
    pub async fn run(mut self) -> Result<()> {
        info!(identity = %self.orchestrator.local_identity(), "core logic task starting");
        let mut maintenance = tokio::time::interval(self.maintenance_interval);
        maintenance.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while self.running {
            tokio::select! {
                request = self.command_receiver.recv() => {
                    match request {
                        Some(request) => self.process_request(request).await?,
                        None => {
                            info!("command channel closed, shutting down");
                            self.shut_down().await?;
                        }
                    }
                }

                Some(event) = self.event_receiver.recv() => {
                    let now = self.clock.now();
                    let reaction = self.orchestrator.handle_event(event, now);
                    self.dispatch(reaction).await?;
                }

                Some(fired) = self.timer_receiver.recv() => {
                    let TimerFired { address, timer, generation } = fired;
                    let now = self.clock.now();
                    let reaction = self.orchestrator.handle_timer(&address, timer, generation, now);
                    self.dispatch(reaction).await?;
                }

                _ = maintenance.tick() => {
                    let now = self.clock.now();
                    let reaction = self.orchestrator.maintenance(now);
                    self.dispatch(reaction).await?;
                    // distances drift even when nothing is announced
                    self.publish_peers();
                }
            }
        }

        info!("core logic task stopped");
        Ok(())
    }

    async fn process_request(&mut self, request: CommandRequest) -> Result<()> {
        debug!(command = %request.command, "command received");
        let outcome = self.process_command(request.command.clone()).await;
        match outcome {
            Ok(reaction) => {
                request.respond(Ok(()));
                self.dispatch(reaction).await
            }
            // Losing a channel means the runtime is coming apart
            Err(e @ BubblesError::Channel { .. }) => {
                error!("unrecoverable error, shutting down core logic task: {}", e);
                request.respond(Err(BubblesError::channel_error("core logic task failed")));
                self.running = false;
                Err(e)
            }
            Err(e) => {
                debug!("command rejected: {}", e);
                request.respond(Err(e));
                Ok(())
            }
        }
    }

    async fn process_command(&mut self, command: Command) -> Result<Reaction> {
        let now = self.clock.now();
        match command {
            Command::StartCommunications => self.start_communications().await,
            Command::StopCommunications => {
                let reaction = self.orchestrator.stop(now);
                self.timers.disarm_all();
                Ok(reaction)
            }
            Command::SendMessage { text } => self.orchestrator.send_message(text),
            Command::UpdateLocation { coordinates } => {
                self.orchestrator.update_location(coordinates, now)
            }
            Command::UpdateStatus { name } => self.orchestrator.update_status(name),
            Command::Shutdown => {
                self.shut_down().await?;
                Ok(Reaction::new())
            }
        }
    }

    /// Power the radio on first use, then begin advertising and scanning.
    /// A radio that will not start is reported to the application, not
    /// returned as an error.
    async fn start_communications(&mut self) -> Result<Reaction> {
        if !self.radio_started {
            match self.transport.start(self.event_sender.clone()).await {
                Ok(()) => {
                    self.radio_started = true;
                    let capabilities = self.transport.capabilities();
                    self.orchestrator
                        .set_attribute_limit(capabilities.max_attribute_size);
                    info!(transport = self.transport.name(), "radio started");
                }
                Err(TransportError::TransportUnavailable { reason }) => {
                    return Ok(self.orchestrator.radio_unavailable(reason));
                }
                Err(e) => return Ok(self.orchestrator.radio_unavailable(e.to_string())),
            }
        }
        self.orchestrator.start()
    }

    async fn shut_down(&mut self) -> Result<()> {
        let now = self.clock.now();
        let reaction = self.orchestrator.stop(now);
        self.timers.disarm_all();
        self.dispatch(reaction).await?;
        self.running = false;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------------

    async fn dispatch(&mut self, reaction: Reaction) -> Result<()> {
        if reaction.is_empty() {
            return Ok(());
        }
        let (effects, app_events) = reaction.into_parts();

        for effect in effects {
            match effect {
                Effect::ScheduleTimer {
                    address,
                    timer,
                    delay,
                    generation,
                } => self.timers.arm(address, timer, delay, generation),
                effect => self
                    .effect_sender
                    .send(effect)
                    .await
                    .map_err(|_| BubblesError::channel_error("effect channel closed"))?,
            }
        }

        let changed = !app_events.is_empty();
        for app_event in app_events {
            self.publish(app_event);
        }
        if changed {
            self.publish_peers();
        }
        Ok(())
    }

    fn publish(&self, app_event: AppEvent) {
        debug!(?app_event, "app event");
        // No subscribers is fine
        let _ = self.app_event_sender.send(app_event);
    }

    fn publish_peers(&self) {
        let snapshot = self.orchestrator.peers(self.clock.now());
        self.peers.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

impl std::fmt::Debug for CoreLogicTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreLogicTask")
            .field("identity", self.orchestrator.local_identity())
            .field("transport", &self.transport.name())
            .field("radio_started", &self.radio_started)
            .field("running", &self.running)
            .finish()
    }
}

