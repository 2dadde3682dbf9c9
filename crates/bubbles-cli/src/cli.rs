//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about = "See who is near you over Bluetooth LE", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Identity to announce, overriding the configuration file
    #[arg(long, global = true)]
    pub identity: Option<String>,

    /// Display name, overriding the configuration file
    #[arg(short, long, global = true)]
    pub name: Option<String>,

    /// Print events as JSON lines
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Interactive session (the default)
    Chat,
    /// Listen for a while, then list who is near
    Peers {
        /// How long to listen
        #[arg(short, long, default_value_t = 15)]
        seconds: u64,
        /// Keep printing events instead of a single summary
        #[arg(short, long)]
        watch: bool,
    },
    /// Run several simulated devices in this process, no radio needed
    Demo {
        #[arg(short, long, default_value_t = 3)]
        devices: usize,
        #[arg(short, long, default_value_t = 20)]
        seconds: u64,
    },
    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a configuration file with a fresh identity
    Init {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print where the configuration file is read from
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_is_the_default() {
        let cli = Cli::try_parse_from(["bubbles"]).unwrap();
        assert_eq!(cli.command, None);
        assert!(!cli.verbose);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["bubbles", "peers", "-s", "5", "--name", "Ana", "-v"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Peers {
                seconds: 5,
                watch: false
            })
        );
        assert_eq!(cli.name.as_deref(), Some("Ana"));
        assert!(cli.verbose);
    }

    #[test]
    fn test_config_init() {
        let cli = Cli::try_parse_from(["bubbles", "config", "init", "--force"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Config {
                action: ConfigAction::Init { force: true }
            })
        );
    }
}
