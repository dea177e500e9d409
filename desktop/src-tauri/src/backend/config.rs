//! Guard configuration with validation and versioning.

use crate::backend::{BackendError, BackendResult};

use std::panic::Location;
use std::path::{Path, PathBuf};

use error_location::ErrorLocation;
use serde::{Deserialize, Serialize};

/// Configuration version for migration support.
/// Increment when adding new fields or changing structure.
pub const CONFIG_VERSION: u32 = 1;

const DEFAULT_BINARY: &str = "/usr/share/wa-desktop/wa-backend";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8085;
const DEFAULT_STATUS_PATH: &str = "/status";
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 1;
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 50;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 2;
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_LOG_DIR: &str = "logs";

const MIN_PORT: u16 = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Config file format version
    #[serde(default = "default_version")]
    pub version: u32,

    /// Backend process settings
    #[serde(default)]
    pub backend: BackendSettings,

    /// Health probe settings
    #[serde(default)]
    pub probe: ProbeSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Installed backend executable
    #[serde(default = "default_binary")]
    pub binary: PathBuf,

    /// Host the backend listens on (always 127.0.0.1 for security)
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the backend listens on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Liveness endpoint path
    #[serde(default = "default_status_path")]
    pub status_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSettings {
    /// Per-probe HTTP timeout (seconds)
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Sleep between poll attempts (milliseconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Maximum poll attempts before reporting startup failure
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,

    /// Graceful shutdown window before force kill (seconds)
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log directory (relative to data directory)
    #[serde(default = "default_log_dir")]
    pub directory: String,
}

// === Default Value Functions ===

fn default_version() -> u32 {
    CONFIG_VERSION
}
fn default_binary() -> PathBuf {
    DEFAULT_BINARY.into()
}
fn default_host() -> String {
    DEFAULT_HOST.into()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_status_path() -> String {
    DEFAULT_STATUS_PATH.into()
}
fn default_probe_timeout() -> u64 {
    DEFAULT_PROBE_TIMEOUT_SECS
}
fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_max_poll_attempts() -> u32 {
    DEFAULT_MAX_POLL_ATTEMPTS
}
fn default_shutdown_grace() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_SECS
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.into()
}
fn default_log_dir() -> String {
    DEFAULT_LOG_DIR.into()
}

// === Default Implementations ===

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            backend: BackendSettings::default(),
            probe: ProbeSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            host: default_host(),
            port: default_port(),
            status_path: default_status_path(),
        }
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            probe_timeout_secs: default_probe_timeout(),
            poll_interval_ms: default_poll_interval(),
            max_poll_attempts: default_max_poll_attempts(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: default_log_dir(),
        }
    }
}

// === Configuration Operations ===

impl BackendConfig {
    /// Load config from file, creating default if not exists.
    pub fn load_or_create(data_dir: &Path) -> BackendResult<Self> {
        let config_path = data_dir.join("config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let mut config: Self =
                toml::from_str(&content).map_err(|e| BackendError::ConfigInvalid {
                    message: e.to_string(),
                    location: ErrorLocation::from(Location::caller()),
                })?;

            // Migrate if needed
            if config.version < CONFIG_VERSION {
                config = Self::migrate(config)?;
                config.save(data_dir)?;
            }

            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save(data_dir)?;
            Ok(config)
        }
    }

    /// Save config to file atomically.
    ///
    /// Uses write-to-temp-then-rename pattern to prevent
    /// partial writes if the process is interrupted.
    pub fn save(&self, data_dir: &Path) -> BackendResult<()> {
        let config_path = data_dir.join("config.toml");
        let content = toml::to_string_pretty(self).map_err(|e| BackendError::ConfigInvalid {
            message: e.to_string(),
            location: ErrorLocation::from(Location::caller()),
        })?;

        // Write atomically via temp file
        let temp_path = config_path.with_extension("toml.tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, &config_path)?;

        Ok(())
    }

    /// Migrate config from older version.
    fn migrate(mut config: Self) -> BackendResult<Self> {
        // Version 0 -> 1: Add probe settings
        if config.version == 0 {
            config.probe = ProbeSettings::default();
            config.version = 1;
        }

        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> BackendResult<()> {
        // Port must be unprivileged
        if self.backend.port < MIN_PORT {
            return Err(BackendError::ConfigInvalid {
                message: format!("Port must be >= {} (unprivileged)", MIN_PORT),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        // Host must be localhost for security
        if self.backend.host != DEFAULT_HOST && self.backend.host != "localhost" {
            return Err(BackendError::ConfigInvalid {
                message: format!("Host must be {DEFAULT_HOST} or localhost for security"),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        // Status path must be absolute
        if !self.backend.status_path.starts_with('/') {
            return Err(BackendError::ConfigInvalid {
                message: "Status path must start with '/'".into(),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        // Probe budget must be positive
        if self.probe.max_poll_attempts == 0 {
            return Err(BackendError::ConfigInvalid {
                message: "Poll attempt budget must be > 0".into(),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        if self.probe.probe_timeout_secs == 0 {
            return Err(BackendError::ConfigInvalid {
                message: "Probe timeout must be > 0".into(),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        Ok(())
    }
}
