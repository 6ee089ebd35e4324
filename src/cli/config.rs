//! CLI configuration commands
//!
//! `glasswing config show` prints the effective configuration as TOML.

use crate::config::AppConfig;
use anyhow::{Context, Result};
use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
}

pub fn run(cmd: ConfigCommands, config: &AppConfig) -> Result<()> {
    match cmd {
        ConfigCommands::Show => show(config),
    }
}

fn show(config: &AppConfig) -> Result<()> {
    let text = toml::to_string_pretty(config).context("Failed to serialize config")?;
    println!("{text}");
    if config.store.database_url.is_empty() {
        println!(
            "# store.database_url resolves to {}",
            crate::config::default_db_path().display()
        );
    }
    Ok(())
}
