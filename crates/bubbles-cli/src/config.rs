//! Bubbles CLI Configuration Management
//!
//! An optional TOML file holds who this device is and every protocol and
//! radio knob. Command line flags override the file; anything missing from
//! the file takes its default.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use bubbles_ble::BleTransportConfig;
use bubbles_core::{BubblesConfig, PeerIdentity};
use serde::{Deserialize, Serialize};
use tracing::{info, Level};
use uuid::Uuid;

use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Stable identity; a random one is used for the session when unset
    pub identity: Option<String>,
    /// Display name shown to nearby peers
    pub name: Option<String>,
    /// One of trace, debug, info, warn, error
    pub log_level: String,
    pub protocol: BubblesConfig,
    pub ble: BleTransportConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            identity: None,
            name: None,
            log_level: "info".to_string(),
            protocol: BubblesConfig::default(),
            ble: BleTransportConfig::default(),
        }
    }
}

impl CliConfig {
    /// `<config dir>/bubbles/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("bubbles").join("config.toml"))
    }

    /// Load `path` if given, else the default file if it exists, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_file(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&text)?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.protocol.validate()?;
        self.log_level()?;
        if let Some(identity) = &self.identity {
            PeerIdentity::new(identity.as_str())?;
        }
        Ok(())
    }

    pub fn log_level(&self) -> Result<Level> {
        Level::from_str(&self.log_level)
            .map_err(|_| CliError::Config(format!("unknown log level '{}'", self.log_level)))
    }

    /// The configured identity, or a fresh random one
    pub fn identity(&self) -> Result<PeerIdentity> {
        match &self.identity {
            Some(identity) => Ok(PeerIdentity::new(identity.as_str())?),
            None => Ok(PeerIdentity::new(generate_identity())?),
        }
    }

    /// Flags win over the file
    pub fn with_overrides(mut self, identity: Option<String>, name: Option<String>) -> Self {
        if identity.is_some() {
            self.identity = identity;
        }
        if name.is_some() {
            self.name = name;
        }
        self
    }
}

pub fn generate_identity() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("bubble-{}", &id[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = CliConfig::from_toml(
            r#"
            identity = "ana"
            name = "Ana"

            [protocol.session]
            exit_grace_period = 45000
            "#,
        )
        .unwrap();

        assert_eq!(config.identity.as_deref(), Some("ana"));
        assert_eq!(
            config.protocol.session.exit_grace_period,
            Duration::from_secs(45)
        );
        assert_eq!(config.protocol.codec, BubblesConfig::default().codec);
        assert_eq!(config.ble, BleTransportConfig::default());
        assert_eq!(config.log_level().unwrap(), Level::INFO);
    }

    #[test]
    fn test_written_file_reads_back() {
        let config = CliConfig {
            identity: Some("bo".into()),
            log_level: "debug".into(),
            ..CliConfig::default()
        };
        let text = config.to_toml().unwrap();
        assert_eq!(CliConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(CliConfig::from_toml("log_level = \"loud\"").is_err());
        assert!(CliConfig::from_toml("identity = \"\"").is_err());
        assert!(CliConfig::from_toml("[protocol.codec]\nmax_chunk_size = 2").is_err());
    }

    #[test]
    fn test_flags_override_file() {
        let config = CliConfig {
            identity: Some("file".into()),
            name: Some("File".into()),
            ..CliConfig::default()
        }
        .with_overrides(Some("flag".into()), None);

        assert_eq!(config.identity.as_deref(), Some("flag"));
        assert_eq!(config.name.as_deref(), Some("File"));
    }

    #[test]
    fn test_generated_identity_when_unset() {
        let identity = CliConfig::default().identity().unwrap();
        assert!(identity.as_str().starts_with("bubble-"));
        assert_eq!(identity.as_str().len(), "bubble-".len() + 8);
    }

    #[test]
    fn test_save_then_load() {
        let path = std::env::temp_dir()
            .join(format!("bubbles-cli-{}", generate_identity()))
            .join("config.toml");
        let config = CliConfig::default().with_overrides(Some("cy".into()), Some("Cy".into()));
        config.save(&path).unwrap();

        assert_eq!(CliConfig::load(Some(&path)).unwrap(), config);
        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}
