//! Configuration loading
//!
//! Layers, lowest first: the defaults compiled into the binary, then
//! `config/default`, `config/<GLASSWING_ENV>` and `config/local` from the
//! working directory, then `GLASSWING_*` variables
//! (`GLASSWING_LIVE__CAPTURE_INTERVAL_MS=500`). The result is validated
//! before anything starts.

use crate::config::AppConfig;
use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");
const ENV_PREFIX: &str = "GLASSWING";
const PROFILE_VAR: &str = "GLASSWING_ENV";

/// Load the layered configuration for the current profile
pub fn load_config() -> Result<AppConfig> {
    let profile = std::env::var(PROFILE_VAR).unwrap_or_else(|_| "development".to_string());
    let builder = ["default", profile.as_str(), "local"]
        .into_iter()
        .fold(embedded(), |builder, name| {
            builder.add_source(File::with_name(&format!("config/{name}")).required(false))
        })
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    finish(builder).with_context(|| format!("Configuration for profile `{profile}` is unusable"))
}

fn embedded() -> ConfigBuilder<DefaultState> {
    Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
}

fn finish(builder: ConfigBuilder<DefaultState>) -> Result<AppConfig> {
    let config: AppConfig = builder
        .build()
        .context("Failed to read configuration sources")?
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    config
        .live
        .validate()
        .context("Invalid [live] section")?;
    Ok(config)
}
