//! Application configuration types

use anyhow::{Context, Result};
use glasswing_canvas::LiveSyncConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Live surface subsystem
    #[serde(default)]
    pub live: LiveSyncConfig,
    /// Document store
    #[serde(default)]
    pub store: StoreConfig,
    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Chromium settings for `--backend cdp`
    #[serde(default)]
    pub cdp: CdpAppConfig,
}

/// Document store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite url; empty uses the default database file
    #[serde(default)]
    pub database_url: String,
}

impl StoreConfig {
    /// Effective database url. Creates the parent directory of the default file.
    pub fn resolve_url(&self) -> Result<String> {
        if !self.database_url.is_empty() {
            return Ok(self.database_url.clone());
        }
        let path = default_db_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        Ok(format!("sqlite://{}?mode=rwc", path.display()))
    }
}

/// Default database file under the platform data directory
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("glasswing")
        .join("canvas.db")
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Emit JSON lines
    #[serde(default)]
    pub json: bool,
    /// Directory for daily rolling log files; empty disables
    #[serde(default)]
    pub directory: String,
}

fn default_filter() -> String {
    "glasswing=info,glasswing_canvas=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
            directory: String::new(),
        }
    }
}

/// Chromium launch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdpAppConfig {
    /// Chromium binary; found on PATH when unset
    #[serde(default)]
    pub executable: Option<PathBuf>,
    /// Show a browser window
    #[serde(default)]
    pub headful: bool,
    #[serde(default = "default_window_width")]
    pub window_width: u32,
    #[serde(default = "default_window_height")]
    pub window_height: u32,
    /// Per-query timeout
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

fn default_window_width() -> u32 {
    1280
}

fn default_window_height() -> u32 {
    800
}

fn default_query_timeout_ms() -> u64 {
    5000
}

impl Default for CdpAppConfig {
    fn default() -> Self {
        Self {
            executable: None,
            headful: false,
            window_width: default_window_width(),
            window_height: default_window_height(),
            query_timeout_ms: default_query_timeout_ms(),
        }
    }
}

#[cfg(feature = "cdp")]
impl From<&CdpAppConfig> for glasswing_canvas::CdpConfig {
    fn from(config: &CdpAppConfig) -> Self {
        Self {
            executable: config.executable.clone(),
            headful: config.headful,
            window_size: (config.window_width, config.window_height),
            query_timeout: std::time::Duration::from_millis(config.query_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_database_url_kept() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("doc.db").display());
        let store = StoreConfig {
            database_url: url.clone(),
        };
        assert_eq!(store.resolve_url().unwrap(), url);
    }

    #[test]
    fn test_defaults_roundtrip_through_toml() {
        let config = AppConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.live, config.live);
        assert_eq!(parsed.logging.filter, config.logging.filter);
        assert_eq!(parsed.cdp.query_timeout_ms, 5000);
    }
}
