//! Runtime settings (`config.toml`)

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs, option_duration_secs};
use crate::error::ConfigError;

/// Top-level settings file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub supervisor: SupervisorSettings,
    pub daemon: DaemonSettings,
    pub teardown: TeardownSettings,
}

impl Settings {
    /// Load settings from `path`, or defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No settings at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        super::load_config(path)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Worker supervisor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    /// How long a new worker must survive before it is recorded (ms)
    #[serde(with = "duration_millis")]
    pub readiness_grace: Duration,

    /// How often the worker is polled during the grace window (ms)
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            readiness_grace: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Daemon runtime settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    /// Time the tunnel has to report readiness (s)
    #[serde(with = "duration_secs")]
    pub ready_timeout: Duration,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(10),
        }
    }
}

/// Teardown settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeardownSettings {
    /// Wait this long after SIGTERM before sending SIGKILL (s)
    ///
    /// Unset: SIGKILL is only sent when delivering SIGTERM fails.
    #[serde(
        default,
        with = "option_duration_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub escalate_after: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.supervisor.readiness_grace, Duration::from_millis(1000));
        assert_eq!(settings.daemon.ready_timeout, Duration::from_secs(10));
        assert_eq!(settings.teardown.escalate_after, None);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings: Settings = toml::from_str("[teardown]\nescalate_after = 3\n").unwrap();
        assert_eq!(settings.teardown.escalate_after, Some(Duration::from_secs(3)));
        assert_eq!(settings.supervisor, SupervisorSettings::default());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load_or_default(&dir.path().join("config.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut settings = Settings::default();
        settings.supervisor.readiness_grace = Duration::from_millis(1500);
        settings.teardown.escalate_after = Some(Duration::from_secs(5));

        let text = settings.to_toml().unwrap();
        let parsed: Settings = toml::from_str(&text).unwrap();
        assert_eq!(parsed, settings);
    }
}
