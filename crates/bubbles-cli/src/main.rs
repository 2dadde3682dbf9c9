//! Bubbles CLI entry point

use clap::Parser;
use tracing::{debug, Level};

use bubbles_cli::{commands::CommandDispatcher, Cli, CliConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = CliConfig::load(cli.config.as_deref())?
        .with_overrides(cli.identity.clone(), cli.name.clone());
    config.validate()?;

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        config.log_level()?
    };
    setup_logging(log_level);
    debug!(?config, "effective configuration");

    CommandDispatcher::execute(cli, config).await?;
    Ok(())
}

/// Logs go to stderr so stdout carries only what the user asked for
fn setup_logging(log_level: Level) {
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
