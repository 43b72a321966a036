//! # Sync Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     STOCKLINE_REMOTE_URL=https://api.example.com/api                   │
//! │     STOCKLINE_AUTO_SYNC=false                                          │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/stockline/sync.toml (Linux)                              │
//! │     ~/Library/Application Support/com.stockline.stockline/sync.toml    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     localhost remote, auto sync on, generated device_id                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Register 1"
//!
//! [remote]
//! base_url = "https://pos.example.com/api"
//! api_token = "..."
//! request_timeout_secs = 10
//!
//! [sync]
//! auto_sync = true
//! poll_interval_secs = 30
//! dispatch_timeout_secs = 10
//!
//! [cache]
//! max_age_secs = 300
//!
//! [database]
//! path = "/var/lib/stockline/stockline.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Device Configuration
// =============================================================================

/// Configuration for this device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier (UUID v4).
    /// Auto-generated on first run if not provided.
    pub id: String,

    /// Human-readable device name (e.g., "Register 1", "Back Office").
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "Stockline Terminal".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Remote Settings
// =============================================================================

/// Where the remote authority lives and how to talk to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Base URL of the REST API, without a trailing slash.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token sent with every request.
    #[serde(default)]
    pub api_token: Option<String>,

    /// Per-request HTTP timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8000/api".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for RemoteSettings {
    fn default() -> Self {
        RemoteSettings {
            base_url: default_base_url(),
            api_token: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Run passes automatically (connectivity, timer, backoff).
    /// When off, only `request_sync_now` and `run_pass` drain the queue.
    #[serde(default = "default_true")]
    pub auto_sync: bool,

    /// Interval between periodic passes (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Upper bound on a single dispatch (seconds). Exceeding it is retryable.
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout_secs: u64,

    /// First delay after a pass that deferred work (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Ceiling for the retry delay (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// How long connectivity must stay online before a pass is triggered
    /// (milliseconds).
    #[serde(default = "default_online_debounce")]
    pub online_debounce_ms: u64,

    /// Synced mutations older than this are pruned (days). 0 disables.
    #[serde(default = "default_retention_days")]
    pub synced_retention_days: u32,
}

fn default_true() -> bool {
    true
}
fn default_poll_interval() -> u64 {
    30
}
fn default_dispatch_timeout() -> u64 {
    10
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    60
}
fn default_online_debounce() -> u64 {
    1_000
}
fn default_retention_days() -> u32 {
    7
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            auto_sync: default_true(),
            poll_interval_secs: default_poll_interval(),
            dispatch_timeout_secs: default_dispatch_timeout(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            online_debounce_ms: default_online_debounce(),
            synced_retention_days: default_retention_days(),
        }
    }
}

impl SyncSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    pub fn online_debounce(&self) -> Duration {
        Duration::from_millis(self.online_debounce_ms)
    }
}

// =============================================================================
// Cache Settings
// =============================================================================

/// Read path settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Age after which a cached table counts as stale (seconds).
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,
}

fn default_max_age() -> u64 {
    300
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            max_age_secs: default_max_age(),
        }
    }
}

impl CacheSettings {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

// =============================================================================
// Database Settings
// =============================================================================

/// Location of the local store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to `stockline.db` in the platform data dir.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Device-specific configuration.
    #[serde(default)]
    pub device: DeviceConfig,

    /// Remote authority settings.
    #[serde(default)]
    pub remote: RemoteSettings,

    /// Sync behavior settings.
    #[serde(default)]
    pub sync: SyncSettings,

    /// Read path settings.
    #[serde(default)]
    pub cache: CacheSettings,

    /// Local store settings.
    #[serde(default)]
    pub database: DatabaseSettings,
}

impl SyncConfig {
    /// Creates a new config with defaults and a generated device ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Writes the configuration as TOML, creating parent directories.
    ///
    /// The generated device id only survives restarts once it is saved.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.is_empty() {
            return Err(SyncError::MissingDeviceId);
        }

        let url = url::Url::parse(&self.remote.base_url)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(SyncError::InvalidUrl(format!(
                "Remote URL must start with http:// or https://, got: {}",
                self.remote.base_url
            )));
        }

        if self.remote.request_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.sync.dispatch_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "dispatch_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.sync.poll_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "poll_interval_secs must be greater than 0".into(),
            ));
        }

        if self.sync.initial_backoff() > self.sync.max_backoff() {
            return Err(SyncError::InvalidConfig(
                "initial_backoff_ms must not exceed max_backoff_secs".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("STOCKLINE_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Ok(url) = std::env::var("STOCKLINE_REMOTE_URL") {
            debug!(url = %url, "Overriding remote URL from environment");
            self.remote.base_url = url;
        }

        if let Ok(token) = std::env::var("STOCKLINE_API_TOKEN") {
            self.remote.api_token = Some(token);
        }

        if let Ok(value) = std::env::var("STOCKLINE_AUTO_SYNC") {
            match value.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.sync.auto_sync = true,
                "0" | "false" | "no" | "off" => self.sync.auto_sync = false,
                _ => warn!(value = %value, "Unknown STOCKLINE_AUTO_SYNC value"),
            }
        }

        if let Ok(secs) = std::env::var("STOCKLINE_POLL_INTERVAL_SECS") {
            if let Ok(s) = secs.parse::<u64>() {
                debug!(secs = s, "Overriding poll interval from environment");
                self.sync.poll_interval_secs = s;
            }
        }

        if let Ok(path) = std::env::var("STOCKLINE_DB_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "stockline", "stockline")
    }

    /// Default config file: `sync.toml` in the platform config dir.
    pub fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the device ID.
    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    /// Returns the local store path, falling back to the platform data dir
    /// and finally the working directory.
    pub fn database_path(&self) -> PathBuf {
        if let Some(path) = &self.database.path {
            return path.clone();
        }
        Self::project_dirs()
            .map(|dirs| dirs.data_dir().join("stockline.db"))
            .unwrap_or_else(|| PathBuf::from("stockline.db"))
    }
}
