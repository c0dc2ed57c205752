//! TOML-based configuration persistence for the `sw16` tool.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\HlkSw16\config.toml`
//! - Linux:    `~/.config/hlk-sw16/config.toml`
//! - macOS:    `~/Library/Application Support/HlkSw16/config.toml`
//!
//! Example:
//!
//! ```toml
//! log_level = "debug"
//!
//! [controller]
//! host = "192.168.0.200"
//! port = 8080
//!
//! [reconnect]
//! strategy = "exponential"
//! max_delay_ms = 10000
//! ```
//!
//! Every field has a `#[serde(default = "...")]`, so a missing file, a missing
//! section or a missing key all fall back to the values shown in
//! [`AppConfig::default`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sw16_core::ControllerAddress;
use thiserror::Error;
use uuid::Uuid;

use crate::infrastructure::network::backoff::{BackoffPolicy, BackoffStrategy};
use crate::infrastructure::network::connection_manager::ConnectionConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value parsed but cannot be used.
    #[error("invalid value for `{key}`: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Which controller to talk to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControllerConfig {
    /// IPv4 address of the controller.
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Stable id for the shared connection.  A fresh one is generated per
    /// run when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<Uuid>,
}

/// Timer settings, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSettings {
    #[serde(default = "default_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_interval_ms")]
    pub idle_check_interval_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

/// Reconnect delay policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectConfig {
    #[serde(default)]
    pub strategy: BackoffStrategy,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_host() -> String {
    "192.168.0.200".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_interval_ms() -> u64 {
    5_000
}
fn default_probe_timeout_ms() -> u64 {
    5_000
}
fn default_initial_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            controller: ControllerConfig::default(),
            connection: ConnectionSettings::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            instance: None,
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_interval_ms(),
            idle_check_interval_ms: default_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::default(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl AppConfig {
    /// Runtime settings for connection managers built from this config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a timer interval or the initial
    /// reconnect delay is zero.
    pub fn connection_config(&self) -> Result<ConnectionConfig, ConfigError> {
        let conn = &self.connection;
        let reconnect = &self.reconnect;
        Ok(ConnectionConfig {
            poll_interval: non_zero_ms("connection.poll_interval_ms", conn.poll_interval_ms)?,
            idle_check_interval: non_zero_ms(
                "connection.idle_check_interval_ms",
                conn.idle_check_interval_ms,
            )?,
            backoff: BackoffPolicy {
                strategy: reconnect.strategy,
                initial_delay: non_zero_ms(
                    "reconnect.initial_delay_ms",
                    reconnect.initial_delay_ms,
                )?,
                max_delay: Duration::from_millis(reconnect.max_delay_ms),
            },
        })
    }

    /// Points the config at a paired controller and pins its instance id.
    pub fn remember_controller(&mut self, address: &ControllerAddress, instance: Uuid) {
        self.controller.host = address.host.clone();
        self.controller.port = address.port;
        self.controller.instance = Some(instance);
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.connection.probe_timeout_ms)
    }

    pub fn controller_address(&self) -> ControllerAddress {
        ControllerAddress::new(self.controller.host.clone(), self.controller.port)
    }
}

fn non_zero_ms(key: &'static str, ms: u64) -> Result<Duration, ConfigError> {
    if ms == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(Duration::from_millis(ms))
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("config.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("HlkSw16"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("hlk-sw16"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("HlkSw16")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
