//! Live sync configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::record::Bounds;
use crate::surface::SandboxPolicy;

/// Default capture cadence in milliseconds
pub const DEFAULT_CAPTURE_INTERVAL_MS: u64 = 750;

/// Shortest accepted capture cadence
pub const MIN_CAPTURE_INTERVAL_MS: u64 = 100;

/// Longest accepted capture cadence
pub const MAX_CAPTURE_INTERVAL_MS: u64 = 10_000;

/// Configuration for the live surface subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveSyncConfig {
    /// Interval between state captures of a mounted surface
    #[serde(default = "default_capture_interval_ms")]
    pub capture_interval_ms: u64,
    /// Url given to newly created live objects
    #[serde(default = "default_url")]
    pub default_url: String,
    /// Bounds given to newly created live objects
    #[serde(default)]
    pub default_bounds: Bounds,
    /// Horizontal gap between a surface and a popup redirected next to it
    #[serde(default = "default_popup_gap")]
    pub popup_gap: f64,
    /// Isolation policy for created surfaces
    #[serde(default)]
    pub sandbox: SandboxPolicy,
    /// Number of sync events kept in memory
    #[serde(default = "default_event_log_capacity")]
    pub event_log_capacity: usize,
}

fn default_capture_interval_ms() -> u64 {
    DEFAULT_CAPTURE_INTERVAL_MS
}

fn default_url() -> String {
    "about:blank".to_string()
}

fn default_popup_gap() -> f64 {
    40.0
}

fn default_event_log_capacity() -> usize {
    1024
}

impl Default for LiveSyncConfig {
    fn default() -> Self {
        Self {
            capture_interval_ms: default_capture_interval_ms(),
            default_url: default_url(),
            default_bounds: Bounds::default(),
            popup_gap: default_popup_gap(),
            sandbox: SandboxPolicy::default(),
            event_log_capacity: default_event_log_capacity(),
        }
    }
}

impl LiveSyncConfig {
    /// Create a config with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the capture interval
    #[must_use]
    pub fn with_capture_interval(mut self, interval: Duration) -> Self {
        self.capture_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the default url
    #[must_use]
    pub fn with_default_url(mut self, url: impl Into<String>) -> Self {
        self.default_url = url.into();
        self
    }

    /// Set the sandbox policy
    #[must_use]
    pub fn with_sandbox(mut self, sandbox: SandboxPolicy) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Capture interval as a duration
    #[must_use]
    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if !(MIN_CAPTURE_INTERVAL_MS..=MAX_CAPTURE_INTERVAL_MS).contains(&self.capture_interval_ms)
        {
            return Err(Error::InvalidConfig(format!(
                "capture_interval_ms must be between {} and {}, got {}",
                MIN_CAPTURE_INTERVAL_MS, MAX_CAPTURE_INTERVAL_MS, self.capture_interval_ms
            )));
        }
        if self.default_bounds.w <= 0.0 || self.default_bounds.h <= 0.0 {
            return Err(Error::InvalidConfig(
                "default_bounds must be positive".to_string(),
            ));
        }
        if self.event_log_capacity == 0 {
            return Err(Error::InvalidConfig(
                "event_log_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LiveSyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capture_interval(), Duration::from_millis(750));
        assert_eq!(config.default_url, "about:blank");
    }

    #[test]
    fn test_interval_out_of_range() {
        let config = LiveSyncConfig::new().with_capture_interval(Duration::from_millis(5));
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = LiveSyncConfig::new().with_capture_interval(Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: LiveSyncConfig =
            serde_json::from_str(r#"{"capture_interval_ms": 2000}"#).unwrap();
        assert_eq!(config.capture_interval_ms, 2000);
        assert_eq!(config.popup_gap, 40.0);
        assert!(!config.sandbox.allow_popups);
    }
}
