//! CLI module for Glasswing
//!
//! Provides commands:
//! - `records`: inspect persisted canvas objects
//! - `config`: show the effective configuration
//! - `session`: run a live surface session and print what it persisted

use crate::config::AppConfig;
use clap::{Parser, Subcommand};

pub mod config;
pub mod records;
pub mod session;

/// Glasswing CLI
#[derive(Parser, Debug)]
#[command(name = "glasswing")]
#[command(about = "Live surface synchronization for canvas objects")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inspect persisted canvas objects
    Records {
        #[command(subcommand)]
        command: records::RecordsCommands,
    },
    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: config::ConfigCommands,
    },
    /// Run a live session for one url
    Session(session::SessionArgs),
}

/// Run the CLI command
pub async fn run(cli: Cli, config: AppConfig) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Records { command }) => records::run(command, &config).await,
        Some(Commands::Config { command }) => config::run(command, &config),
        Some(Commands::Session(args)) => session::run(args, &config).await,
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}
