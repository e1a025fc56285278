//! calbot CLI entry point.

use std::process::ExitCode;

use clap::Parser;

use calbot_client::cli::{Cli, Command, ConfigAction};
use calbot_client::commands;
use calbot_client::config::ClientConfig;
use calbot_client::error::ClientResult;
use calbot_core::{TracingConfig, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ClientResult<()> {
    let config_path = cli.config.clone().unwrap_or_else(ClientConfig::default_path);
    let config = match cli.config {
        Some(ref path) => ClientConfig::load_from(path)?,
        None => ClientConfig::load()?,
    };

    init_tracing(tracing_config(&cli, &config))?;

    match cli.command {
        Command::Serve => commands::serve::run(&config).await,
        Command::Connect { ref user } => commands::connect::connect(&config, user),
        Command::Disconnect { ref user } => commands::connect::disconnect(&config, user).await,
        Command::Config { action } => match action {
            ConfigAction::Dump => commands::config::dump(&config, &config_path),
            ConfigAction::Validate => commands::config::validate(&config),
            ConfigAction::Path => commands::config::path(&config_path),
        },
    }
}

fn tracing_config(cli: &Cli, config: &ClientConfig) -> TracingConfig {
    if cli.debug || config.debug {
        return TracingConfig::cli_debug();
    }
    match cli.command {
        Command::Serve => TracingConfig::daemon().with_format(config.server.log_format),
        _ => TracingConfig::default().with_level(tracing::Level::WARN),
    }
}
