//! Error handling for the bubbles CLI

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Bubbles error: {0}")]
    Bubbles(#[from] bubbles_core::BubblesError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Input(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("TOML writing error: {0}")]
    TomlWriting(#[from] toml::ser::Error),
}

impl CliError {
    pub fn input(message: impl Into<String>) -> Self {
        CliError::Input(message.into())
    }
}

pub type Result<T> = std::result::Result<T, CliError>;
