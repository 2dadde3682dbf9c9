//! Channel Module
//!
//! - `communication`: commands, radio events, effects and application events
//! - `utils`: channel aliases and constructors

pub mod communication;
pub mod utils;

pub use communication::{AppEvent, Command, CommandRequest, Effect, RadioEvent};

pub use crate::config::ChannelConfig;

pub use utils::{
    create_app_event_channel, create_command_channel, create_effect_channel,
    create_event_channel, AppEventReceiver, AppEventSender, ChannelError, CommandReceiver,
    CommandSender, EffectReceiver, EffectSender, EventReceiver, EventSender, NonBlockingSend,
};
