//! Interactive bubbles application on top of a [`BubblesContext`]

use std::time::Duration;

use bubbles_core::{AppEvent, RadioTransport};
use bubbles_runtime::{BubblesContext, ContextBuilder};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::config::CliConfig;
use crate::error::Result;
use crate::output::Output;
use crate::repl::{self, ReplCommand, HELP};

/// Whether the prompt keeps going after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct BubblesApp {
    context: BubblesContext,
    output: Output,
}

impl BubblesApp {
    /// Spawn the runtime over `transport` using the configured identity
    pub fn launch<T: RadioTransport>(
        config: &CliConfig,
        transport: T,
        output: Output,
    ) -> Result<Self> {
        let identity = config.identity()?;
        let mut builder = ContextBuilder::new(identity).with_config(config.protocol.clone());
        if let Some(name) = &config.name {
            builder = builder.with_name(name.clone());
        }
        let context = builder.spawn(transport)?;
        info!(identity = %context.identity(), "bubbles started");
        Ok(Self { context, output })
    }

    pub fn context(&self) -> &BubblesContext {
        &self.context
    }

    /// Carry out one prompt command
    pub async fn execute(&self, command: ReplCommand) -> Result<Flow> {
        match command {
            ReplCommand::Message(text) => self.context.send_message(text).await?,
            ReplCommand::Peers => self.output.peers(&self.context.peers()),
            ReplCommand::Location(coordinates) => {
                self.context.update_location(coordinates).await?
            }
            ReplCommand::Name(name) => self.context.update_status(name).await?,
            ReplCommand::Start => self.context.start_communications().await?,
            ReplCommand::Stop => self.context.stop_communications().await?,
            ReplCommand::Help => self.output.note(HELP),
            ReplCommand::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    /// Read commands from stdin and print events until `/quit`, end of
    /// input or Ctrl-C
    pub async fn run_repl(mut self) -> Result<()> {
        let mut events = self.context.subscribe();
        self.context.start_communications().await?;
        self.output.note(&format!(
            "you are {}. Type /help for commands.",
            self.context.identity()
        ));

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        debug!("stdin closed");
                        break;
                    };
                    let command = match repl::parse(&line) {
                        Ok(Some(command)) => command,
                        Ok(None) => continue,
                        Err(e) => {
                            self.output.note(&e.to_string());
                            continue;
                        }
                    };
                    match self.execute(command).await {
                        Ok(Flow::Quit) => break,
                        Ok(Flow::Continue) => {}
                        Err(e) => self.output.note(&format!("! {}", e)),
                    }
                }

                event = events.recv() => {
                    if !self.forward(event) {
                        break;
                    }
                }

                _ = tokio::signal::ctrl_c() => break,
            }
        }

        self.shutdown().await
    }

    /// Listen for `duration`, then print who was found. With `watch`, every
    /// event is printed as it happens.
    pub async fn survey(mut self, duration: Duration, watch: bool) -> Result<()> {
        let mut events = self.context.subscribe();
        self.context.start_communications().await?;
        self.output
            .note(&format!("listening for {}s...", duration.as_secs()));

        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                _ = tokio::signal::ctrl_c() => break,
                event = events.recv() => {
                    let keep_going = match event {
                        Ok(event) if watch => self.forward(Ok(event)),
                        Ok(AppEvent::RadioUnavailable { reason }) => {
                            self.output.note(&format!("! radio unavailable: {}", reason));
                            false
                        }
                        Ok(_) => true,
                        Err(e) => self.forward(Err(e)),
                    };
                    if !keep_going {
                        break;
                    }
                }
            }
        }

        self.output.peers(&self.context.peers());
        self.shutdown().await
    }

    /// Print one received event; `false` once the runtime is gone
    fn forward(&self, event: std::result::Result<AppEvent, RecvError>) -> bool {
        match event {
            Ok(event) => {
                self.output.event(&event);
                true
            }
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "terminal fell behind, events dropped");
                true
            }
            Err(RecvError::Closed) => false,
        }
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.context.shutdown().await?;
        info!("bubbles stopped");
        Ok(())
    }
}
