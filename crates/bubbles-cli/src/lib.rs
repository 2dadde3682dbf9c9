//! Bubbles CLI library
//!
//! Configuration, argument parsing, the interactive prompt and the demo
//! mode behind the `bubbles` binary.

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod demo;
pub mod error;
pub mod output;
pub mod repl;

pub use app::BubblesApp;
pub use cli::{Cli, Commands};
pub use config::CliConfig;
pub use error::{CliError, Result};
