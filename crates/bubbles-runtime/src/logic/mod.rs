//! Core Logic Module
//!
//! - `task`: the `CoreLogicTask` event loop around the sans-IO orchestrator
//! - `timers`: per-session timer scheduling
//! - `clock`: protocol time driven by tokio's clock
//!
//! Every session is owned by the one core logic task, so state transitions
//! for a session are serialized without any lock around the registry.

pub mod clock;
pub mod task;
pub mod timers;

pub use clock::TokioTimeSource;
pub use task::CoreLogicTask;
pub use timers::{TimerFired, TimerScheduler};
