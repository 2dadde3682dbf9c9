//! Channel Utilities
//!
//! Channel aliases and constructors. Commands, radio events and effects are
//! bounded point-to-point queues; application events fan out over a
//! broadcast channel so any number of subscribers can watch.

use core::fmt;

use tokio::sync::{broadcast, mpsc};

use crate::channel::communication::{AppEvent, CommandRequest, Effect, RadioEvent};
use crate::config::ChannelConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    ChannelFull,
    ChannelClosed,
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::ChannelFull => write!(f, "Channel buffer is full"),
            ChannelError::ChannelClosed => write!(f, "Channel is closed"),
        }
    }
}

impl std::error::Error for ChannelError {}

pub type CommandSender = mpsc::Sender<CommandRequest>;
pub type CommandReceiver = mpsc::Receiver<CommandRequest>;
pub type EventSender = mpsc::Sender<RadioEvent>;
pub type EventReceiver = mpsc::Receiver<RadioEvent>;
pub type EffectSender = mpsc::Sender<Effect>;
pub type EffectReceiver = mpsc::Receiver<Effect>;
pub type AppEventSender = broadcast::Sender<AppEvent>;
pub type AppEventReceiver = broadcast::Receiver<AppEvent>;

// ----------------------------------------------------------------------------
// Channel Creation Utilities
// ----------------------------------------------------------------------------

/// Create bounded command channel (application → core logic)
pub fn create_command_channel(config: &ChannelConfig) -> (CommandSender, CommandReceiver) {
    mpsc::channel(config.command_buffer_size)
}

/// Create bounded event channel (radio → core logic)
pub fn create_event_channel(config: &ChannelConfig) -> (EventSender, EventReceiver) {
    mpsc::channel(config.event_buffer_size)
}

/// Create bounded effect channel (core logic → radio)
pub fn create_effect_channel(config: &ChannelConfig) -> (EffectSender, EffectReceiver) {
    mpsc::channel(config.effect_buffer_size)
}

/// Create broadcast app event channel (core logic → application)
///
/// Further receivers come from `sender.subscribe()`. Slow subscribers lose
/// the oldest events rather than stalling the core.
pub fn create_app_event_channel(config: &ChannelConfig) -> (AppEventSender, AppEventReceiver) {
    broadcast::channel(config.app_event_buffer_size)
}

// ----------------------------------------------------------------------------
// Non-blocking Send
// ----------------------------------------------------------------------------

/// Send without awaiting, for callers that must never block
pub trait NonBlockingSend<T> {
    fn try_send_non_blocking(&self, message: T) -> Result<(), ChannelError>;
}

impl<T> NonBlockingSend<T> for mpsc::Sender<T> {
    fn try_send_non_blocking(&self, message: T) -> Result<(), ChannelError> {
        self.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ChannelError::ChannelFull,
            mpsc::error::TrySendError::Closed(_) => ChannelError::ChannelClosed,
        })
    }
}
