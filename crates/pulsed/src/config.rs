//! Monitor configuration.
//!
//! Every timing constant of the monitor is tunable. Values are read from a
//! TOML file where every key is optional; missing keys fall back to the
//! defaults below.
//!
//! ```toml
//! permission_delay_ms = 2500
//! idle_delay_ms = 4000
//! grace_window_ms = 1500
//! ```

use std::path::{Path, PathBuf};

use pulse_core::DomainError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

/// Default watchdog deadline.
pub const DEFAULT_PERMISSION_DELAY_MS: u64 = 2500;

/// Default permission sweep interval.
pub const DEFAULT_PERMISSION_CHECK_INTERVAL_MS: u64 = 2500;

/// Default idle timer. Kept strictly above the permission deadline.
pub const DEFAULT_IDLE_DELAY_MS: u64 = 4000;

/// Default aggregate hysteresis window.
pub const DEFAULT_GRACE_WINDOW_MS: u64 = 1500;

/// Default discovery tick.
pub const DEFAULT_DISCOVERY_INTERVAL_MS: u64 = 2000;

/// Default history replay cap (64 KiB).
pub const DEFAULT_BOOTSTRAP_WINDOW_BYTES: u64 = 64 * 1024;

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be rendered as TOML.
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    /// A value is out of range.
    #[error(transparent)]
    Invalid(#[from] DomainError),
}

// ============================================================================
// Monitor Config
// ============================================================================

/// Tunable settings of the session monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// How long a tool may stay outstanding before it is treated as
    /// blocked on a permission prompt.
    pub permission_delay_ms: u64,

    /// Period of the permission sweep while checks are pending.
    pub permission_check_interval_ms: u64,

    /// Quiet period after which thinking sessions are marked idle.
    pub idle_delay_ms: u64,

    /// How long the aggregate signal outlives the last activity.
    pub grace_window_ms: u64,

    /// Period of the discovery pass.
    pub discovery_interval_ms: u64,

    /// Maximum number of trailing bytes replayed when attaching.
    pub bootstrap_window_bytes: u64,

    /// Attach OS file watchers to transcripts.
    pub watch_transcripts: bool,

    /// Directory holding IDE lock files.
    pub lock_dir: PathBuf,

    /// Root of per-project transcript directories.
    pub projects_dir: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        let claude_dir = home_dir().join(".claude");
        Self {
            permission_delay_ms: DEFAULT_PERMISSION_DELAY_MS,
            permission_check_interval_ms: DEFAULT_PERMISSION_CHECK_INTERVAL_MS,
            idle_delay_ms: DEFAULT_IDLE_DELAY_MS,
            grace_window_ms: DEFAULT_GRACE_WINDOW_MS,
            discovery_interval_ms: DEFAULT_DISCOVERY_INTERVAL_MS,
            bootstrap_window_bytes: DEFAULT_BOOTSTRAP_WINDOW_BYTES,
            watch_transcripts: true,
            lock_dir: claude_dir.join("ide"),
            projects_dir: claude_dir.join("projects"),
        }
    }
}

impl MonitorConfig {
    /// Returns the default config file location (`~/.config/pulse/config.toml`).
    pub fn default_path() -> PathBuf {
        home_dir().join(".config").join("pulse").join("config.toml")
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` for malformed TOML and
    /// `ConfigError::Invalid` for out-of-range values.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the config at `path`, falling back to defaults if it does not
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed or
    /// validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml_str(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Renders the config as TOML.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Render` if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks value ranges and the ordering between timers.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidFieldValue` for the first offending field.
    pub fn validate(&self) -> Result<(), DomainError> {
        let durations = [
            ("permission_delay_ms", self.permission_delay_ms),
            (
                "permission_check_interval_ms",
                self.permission_check_interval_ms,
            ),
            ("idle_delay_ms", self.idle_delay_ms),
            ("grace_window_ms", self.grace_window_ms),
            ("discovery_interval_ms", self.discovery_interval_ms),
        ];
        for (field, value) in durations {
            if value == 0 {
                return Err(DomainError::invalid(field, value, "a positive duration"));
            }
        }

        if self.bootstrap_window_bytes == 0 {
            return Err(DomainError::invalid(
                "bootstrap_window_bytes",
                self.bootstrap_window_bytes,
                "a positive byte count",
            ));
        }

        // Idle detection must stay slower than permission detection.
        if self.idle_delay_ms <= self.permission_delay_ms {
            return Err(DomainError::invalid(
                "idle_delay_ms",
                self.idle_delay_ms,
                format!("greater than permission_delay_ms ({})", self.permission_delay_ms),
            ));
        }

        Ok(())
    }

    pub fn permission_delay(&self) -> Duration {
        Duration::from_millis(self.permission_delay_ms)
    }

    pub fn permission_check_interval(&self) -> Duration {
        Duration::from_millis(self.permission_check_interval_ms)
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }

    pub fn grace_window(&self) -> Duration {
        Duration::from_millis(self.grace_window_ms)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.idle_delay() > config.permission_delay());
        assert_eq!(config.permission_delay(), Duration::from_millis(2500));
        assert!(config.lock_dir.ends_with(".claude/ide"));
        assert!(config.projects_dir.ends_with(".claude/projects"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = MonitorConfig::from_toml_str(
            r#"
            grace_window_ms = 500
            watch_transcripts = false
            "#,
        )
        .unwrap();
        assert_eq!(config.grace_window_ms, 500);
        assert!(!config.watch_transcripts);
        assert_eq!(config.idle_delay_ms, DEFAULT_IDLE_DELAY_MS);
    }

    #[test]
    fn test_idle_must_exceed_permission_delay() {
        let err = MonitorConfig::from_toml_str("permission_delay_ms = 5000\nidle_delay_ms = 5000")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert_eq!(
            err.to_string(),
            "Invalid idle_delay_ms: 5000 (expected greater than permission_delay_ms (5000))"
        );
    }

    #[test]
    fn test_zero_values_rejected() {
        let config = MonitorConfig {
            grace_window_ms: 0,
            ..MonitorConfig::default()
        };
        assert!(config.validate().is_err());

        let config = MonitorConfig {
            bootstrap_window_bytes: 0,
            ..MonitorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unparseable_toml() {
        let err = MonitorConfig::from_toml_str("idle_delay_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = MonitorConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, MonitorConfig::default());
    }

    #[test]
    fn test_load_and_render_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "discovery_interval_ms = 750\n").unwrap();

        let config = MonitorConfig::load(&path).unwrap();
        assert_eq!(config.discovery_interval(), Duration::from_millis(750));

        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("discovery_interval_ms = 750"));
        assert_eq!(MonitorConfig::from_toml_str(&rendered).unwrap(), config);
    }
}
