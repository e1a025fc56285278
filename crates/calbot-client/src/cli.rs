//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// calbot - Google Calendar reminders for your chat
#[derive(Debug, Parser)]
#[command(name = "calbot")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "CALBOT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v', global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the webhook server and the reminder scheduler
    Serve,

    /// Print the link a user follows to connect their calendar
    Connect {
        /// Chat user id
        user: String,
    },

    /// Stop watching a user's calendar and forget their data
    Disconnect {
        /// Chat user id
        user: String,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration, secrets redacted
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_connect_with_global_flags() {
        let cli = Cli::parse_from(["calbot", "connect", "u1", "--debug", "-c", "/tmp/c.toml"]);
        assert!(cli.debug);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
        assert!(matches!(cli.command, Command::Connect { ref user } if user == "u1"));
    }

    #[test]
    fn parses_config_actions() {
        let cli = Cli::parse_from(["calbot", "config", "validate"]);
        assert!(matches!(
            cli.command,
            Command::Config {
                action: ConfigAction::Validate
            }
        ));
    }
}
