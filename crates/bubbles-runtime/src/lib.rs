//! Bubbles Runtime Engine
//!
//! Runs the bubbles protocol on tokio:
//! - `BubblesContext`: the application-facing handle
//! - `CoreLogicTask`: the single task that owns every peer session
//! - `RadioTask`: executes radio effects with timeouts and bounded retries
//!
//! `bubbles-core` decides what should happen; this crate makes it happen
//! against a [`RadioTransport`].

pub mod builder;
pub mod context;
pub mod logic;
pub mod radio;

pub use builder::ContextBuilder;
pub use context::BubblesContext;
pub use logic::{CoreLogicTask, TokioTimeSource};
pub use radio::RadioTask;

// Re-export core types for convenience
pub use bubbles_core::{
    AppEvent, BubblesConfig, BubblesError, Coordinates, Location, Peer, PeerIdentity,
    RadioTransport, Result,
};
