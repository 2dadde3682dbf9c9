//! Command handlers for the bubbles CLI

use std::time::Duration;

use bubbles_ble::BleTransport;
use tracing::info;

use crate::app::BubblesApp;
use crate::cli::{Cli, Commands, ConfigAction};
use crate::config::{generate_identity, CliConfig};
use crate::demo;
use crate::error::{CliError, Result};
use crate::output::Output;

pub struct CommandDispatcher;

impl CommandDispatcher {
    pub async fn execute(cli: Cli, config: CliConfig) -> Result<()> {
        let output = Output::new(cli.json);
        match cli.command.unwrap_or(Commands::Chat) {
            Commands::Chat => {
                let app = Self::launch_ble(&config, output)?;
                app.run_repl().await
            }
            Commands::Peers { seconds, watch } => {
                let app = Self::launch_ble(&config, output)?;
                app.survey(Duration::from_secs(seconds), watch).await
            }
            Commands::Demo { devices, seconds } => {
                demo::run(&config, devices, Duration::from_secs(seconds), output).await
            }
            Commands::Config { action } => Self::handle_config(action, cli.config, config),
        }
    }

    fn launch_ble(config: &CliConfig, output: Output) -> Result<BubblesApp> {
        let mut ble = config.ble.clone();
        // Scanners show the display name before any link exists
        if let Some(name) = &config.name {
            ble = ble.with_local_name(format!("bubbles {}", name));
        }
        BubblesApp::launch(config, BleTransport::with_config(ble), output)
    }

    fn handle_config(
        action: ConfigAction,
        path: Option<std::path::PathBuf>,
        config: CliConfig,
    ) -> Result<()> {
        let path = path.or_else(CliConfig::default_path);
        match action {
            ConfigAction::Show => {
                print!("{}", config.to_toml()?);
            }
            ConfigAction::Path => match path {
                Some(path) => println!("{}", path.display()),
                None => println!("no configuration directory on this system"),
            },
            ConfigAction::Init { force } => {
                let path = path.ok_or_else(|| {
                    CliError::Config("no configuration directory, pass --config".into())
                })?;
                if path.exists() && !force {
                    return Err(CliError::Config(format!(
                        "{} already exists, use --force to replace it",
                        path.display()
                    )));
                }
                let mut fresh = config;
                if fresh.identity.is_none() {
                    fresh.identity = Some(generate_identity());
                }
                fresh.save(&path)?;
                info!(path = %path.display(), "configuration written");
                println!("wrote {}", path.display());
            }
        }
        Ok(())
    }
}
