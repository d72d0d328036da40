//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/medchat/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/medchat/` (~/.config/medchat/)
//! - Data: `$XDG_DATA_HOME/medchat/` (~/.local/share/medchat/)
//! - State/Logs: `$XDG_STATE_HOME/medchat/` (~/.local/state/medchat/)

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
    /// Chat backend endpoint
    #[serde(default)]
    pub server: ServerConfig,

    /// Reconnect and heartbeat policy
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Conversation store timing
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Local storage overrides
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Transport kinds, tried in configured order
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Websocket,
    Polling,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Websocket => "websocket",
            TransportKind::Polling => "polling",
        }
    }
}

/// Chat backend configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Base URL of the Socket.IO server (e.g., `http://localhost:5000`)
    #[serde(default = "default_server_url")]
    pub url: String,

    /// Path the Socket.IO server is mounted on
    #[serde(default = "default_socketio_path")]
    pub socketio_path: String,

    /// Transports in order of preference
    #[serde(default = "default_transports")]
    pub transports: Vec<TransportKind>,

    /// Handshake timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// User id sent with every message; generated when absent
    pub user_id: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_server_url(),
            socketio_path: default_socketio_path(),
            transports: default_transports(),
            connect_timeout_secs: default_connect_timeout(),
            user_id: None,
        }
    }
}

impl ServerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Configured user id, or a fresh `medical_user_<millis>` id.
    pub fn resolve_user_id(&self) -> String {
        self.user_id.clone().unwrap_or_else(|| {
            format!("medical_user_{}", chrono::Utc::now().timestamp_millis())
        })
    }
}

fn default_server_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_socketio_path() -> String {
    "socket.io".to_string()
}

fn default_transports() -> Vec<TransportKind> {
    vec![TransportKind::Websocket, TransportKind::Polling]
}

fn default_connect_timeout() -> u64 {
    20
}

/// Connection lifecycle configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ConnectionConfig {
    /// Fixed delay between reconnect attempts
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,

    /// Automatic reconnect attempts before giving up
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Interval between outgoing heartbeat events
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Force a reconnect when nothing was received for this long (disabled when unset)
    pub liveness_timeout_secs: Option<u64>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_interval_ms: default_reconnect_interval(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            liveness_timeout_secs: None,
        }
    }
}

impl ConnectionConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn liveness_timeout(&self) -> Option<Duration> {
        self.liveness_timeout_secs.map(Duration::from_secs)
    }
}

fn default_reconnect_interval() -> u64 {
    5000
}

fn default_max_reconnect_attempts() -> u32 {
    3
}

fn default_heartbeat_interval() -> u64 {
    30
}

/// Conversation store configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ConversationConfig {
    /// Repeating the previous user message inside this window is ignored
    #[serde(default = "default_duplicate_send_window")]
    pub duplicate_send_window_ms: u64,

    /// Identical bot text inside this window is treated as a resend
    #[serde(default = "default_duplicate_reply_window")]
    pub duplicate_reply_window_ms: u64,

    /// Delay before retrying a send made while a reply is pending
    #[serde(default = "default_busy_retry_delay")]
    pub busy_retry_delay_ms: u64,

    /// Debounce applied to conversation writes
    #[serde(default = "default_persist_debounce")]
    pub persist_debounce_ms: u64,

    /// Give up waiting for a reply after this many seconds (0 disables)
    #[serde(default = "default_response_timeout")]
    pub response_timeout_secs: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            duplicate_send_window_ms: default_duplicate_send_window(),
            duplicate_reply_window_ms: default_duplicate_reply_window(),
            busy_retry_delay_ms: default_busy_retry_delay(),
            persist_debounce_ms: default_persist_debounce(),
            response_timeout_secs: default_response_timeout(),
        }
    }
}

impl ConversationConfig {
    pub fn duplicate_send_window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.duplicate_send_window_ms as i64)
    }

    pub fn duplicate_reply_window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.duplicate_reply_window_ms as i64)
    }

    pub fn busy_retry_delay(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.busy_retry_delay_ms as i64)
    }

    pub fn persist_debounce(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.persist_debounce_ms as i64)
    }

    pub fn response_timeout(&self) -> Option<chrono::Duration> {
        (self.response_timeout_secs > 0)
            .then(|| chrono::Duration::seconds(self.response_timeout_secs as i64))
    }
}

fn default_duplicate_send_window() -> u64 {
    2000
}

fn default_duplicate_reply_window() -> u64 {
    5000
}

fn default_busy_retry_delay() -> u64 {
    1000
}

fn default_persist_debounce() -> u64 {
    100
}

fn default_response_timeout() -> u64 {
    180
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

/// Local storage configuration
#[derive(Debug, Deserialize, Default, Clone)]
pub struct StorageConfig {
    /// Override for the conversation database path
    pub path: Option<PathBuf>,
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

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        crate::transport::Endpoint::parse(&self.server.url, &self.server.socketio_path)?;

        if self.server.transports.is_empty() {
            return Err(Error::Config(
                "server.transports must name at least one transport".to_string(),
            ));
        }
        if self.server.connect_timeout_secs == 0 {
            return Err(Error::Config(
                "server.connect_timeout_secs must be positive".to_string(),
            ));
        }
        if self.connection.heartbeat_interval_secs == 0 {
            return Err(Error::Config(
                "connection.heartbeat_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/medchat/config.toml` (~/.config/medchat/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("medchat").join("config.toml")
    }

    /// Returns the data directory path (for the conversation database)
    ///
    /// `$XDG_DATA_HOME/medchat/` (~/.local/share/medchat/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("medchat")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/medchat/` (~/.local/state/medchat/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("medchat")
    }

    /// Returns the default database file path
    ///
    /// `$XDG_DATA_HOME/medchat/medchat.db` (~/.local/share/medchat/medchat.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("medchat.db")
    }

    /// Database path honoring `[storage] path`
    pub fn resolved_database_path(&self) -> PathBuf {
        self.storage
            .path
            .clone()
            .unwrap_or_else(Self::database_path)
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/medchat/medchat.log` (~/.local/state/medchat/medchat.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("medchat.log")
    }
}
