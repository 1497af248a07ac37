//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/beacon/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/beacon/` (~/.config/beacon/)
//! - Data: `$XDG_DATA_HOME/beacon/` (~/.local/share/beacon/)
//! - State/Logs: `$XDG_STATE_HOME/beacon/` (~/.local/state/beacon/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Durable queue configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Collection service transport
    #[serde(default)]
    pub transport: TransportConfig,

    /// When the page side flushes
    #[serde(default)]
    pub flush: FlushConfig,

    /// Background worker channel
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Environment signal overrides for the device fingerprint
    #[serde(default)]
    pub identity: IdentityConfig,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// Durable queue configuration
#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    /// Override for the queue database path (defaults to the XDG data dir)
    pub path: Option<PathBuf>,

    /// How long a connection waits on a lock held by the other context
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

impl QueueConfig {
    /// Resolved queue database path
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(Config::database_path)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

fn default_busy_timeout() -> u64 {
    5000
}

/// Collection service configuration
///
/// Events are always stored in the local queue first; when the transport is
/// not configured they simply accumulate until it is.
#[derive(Debug, Deserialize, Clone)]
pub struct TransportConfig {
    /// Collection service base URL (e.g., `https://telemetry.example.com`)
    pub server_url: Option<String>,

    /// Optional bearer token
    pub api_key: Option<String>,

    /// Optional client identifier sent as `X-Client-ID`
    pub client_id: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_transport_timeout")]
    pub timeout_secs: u64,

    /// Max retry attempts for transient failures within one transmission
    #[serde(default = "default_transport_max_retries")]
    pub max_retries: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            api_key: None,
            client_id: None,
            timeout_secs: default_transport_timeout(),
            max_retries: default_transport_max_retries(),
        }
    }
}

impl TransportConfig {
    /// Check if the transport has everything it needs to send
    pub fn is_ready(&self) -> bool {
        self.server_url.is_some()
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        let url = self.server_url.as_deref().ok_or_else(|| {
            Error::Config("transport.server_url is required".to_string())
        })?;

        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "transport.server_url must be an http(s) URL, got {:?}",
                url
            )));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "transport.timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_transport_timeout() -> u64 {
    30
}

fn default_transport_max_retries() -> usize {
    2
}

/// Page-side flush triggers
#[derive(Debug, Deserialize, Clone)]
pub struct FlushConfig {
    /// Seconds between timer-driven flushes
    #[serde(default = "default_flush_interval")]
    pub interval_secs: u64,

    /// Flush when the page becomes hidden
    #[serde(default = "default_true")]
    pub flush_on_hidden: bool,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_flush_interval(),
            flush_on_hidden: true,
        }
    }
}

impl FlushConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

fn default_flush_interval() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

/// Background worker channel configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// How long a page waits for a worker reply before falling back
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Bounded inbox size of the worker
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Page-independent periodic wake-up
    #[serde(default)]
    pub periodic_sync: PeriodicSyncConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout(),
            channel_capacity: default_channel_capacity(),
            periodic_sync: PeriodicSyncConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_request_timeout() -> u64 {
    5000
}

fn default_channel_capacity() -> usize {
    64
}

/// Whether the host allows the worker to wake itself on a schedule
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    Granted,
    Denied,
    /// Never asked; treated as not granted
    #[default]
    Prompt,
}

/// Periodic wake-up configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PeriodicSyncConfig {
    /// Attempt registration at startup
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between wake-ups
    #[serde(default = "default_periodic_interval")]
    pub interval_secs: u64,

    /// Host permission for periodic background work
    #[serde(default)]
    pub permission: PermissionState,
}

impl Default for PeriodicSyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_periodic_interval(),
            permission: PermissionState::default(),
        }
    }
}

impl PeriodicSyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

fn default_periodic_interval() -> u64 {
    24 * 60 * 60
}

/// Overrides for the signals the device fingerprint is derived from
#[derive(Debug, Deserialize, Clone, Default)]
pub struct IdentityConfig {
    pub locale: Option<String>,
    pub user_agent: Option<String>,
    /// Rendering surface as `WIDTHxHEIGHT`
    pub screen: Option<String>,
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/beacon/config.toml` (~/.config/beacon/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("beacon").join("config.toml")
    }

    /// Returns the data directory path (for the queue database)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("beacon")
    }

    /// Returns the state directory path (for logs)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("beacon")
    }

    /// Returns the queue database path
    ///
    /// `$XDG_DATA_HOME/beacon/queue.db` (~/.local/share/beacon/queue.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("queue.db")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
