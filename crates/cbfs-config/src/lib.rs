//! # cbfs-config
//!
//! Configuration management for cbfs.
//!
//! Loads configuration from:
//! 1. `~/.cbfs/config.toml` (global)
//! 2. `.cbfs/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod testing;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub use logging::LogLevel;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub log: LogConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Global config (~/.cbfs/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                config = Self::load_from(&global_path)?;
            }
        }

        // 2. Project config (.cbfs/config.toml) - overrides global
        let project_path = Path::new(".cbfs/config.toml");
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            let project_config = Self::load_from(project_path)?;
            config.merge(project_config);
        }

        // 3. Environment
        config.apply_env_overrides();

        Ok(config)
    }

    /// Load a single explicit config file, without merging or env overrides
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Global config path: ~/.cbfs/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".cbfs/config.toml"))
    }

    /// Merge a project config over this one. Only values that differ from
    /// the defaults replace ours.
    fn merge(&mut self, other: Config) {
        let defaults = Config::default();

        if other.server.socket != defaults.server.socket {
            self.server.socket = other.server.socket;
        }
        if other.server.data_dir.is_some() {
            self.server.data_dir = other.server.data_dir;
        }
        if other.server.notify_workers != defaults.server.notify_workers {
            self.server.notify_workers = other.server.notify_workers;
        }
        if other.server.notify_queue != defaults.server.notify_queue {
            self.server.notify_queue = other.server.notify_queue;
        }
        if other.server.connection_queue != defaults.server.connection_queue {
            self.server.connection_queue = other.server.connection_queue;
        }
        if other.client.socket != defaults.client.socket {
            self.client.socket = other.client.socket;
        }
        if other.client.client_id.is_some() {
            self.client.client_id = other.client.client_id;
        }
        if other.log.level != defaults.log.level {
            self.log.level = other.log.level;
        }
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key/value source. `CBFS_SOCKET` sets both the
    /// server and client socket.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(socket) = lookup("CBFS_SOCKET") {
            self.server.socket = PathBuf::from(&socket);
            self.client.socket = PathBuf::from(socket);
        }
        if let Some(dir) = lookup("CBFS_DATA_DIR") {
            self.server.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(workers) = lookup("CBFS_NOTIFY_WORKERS") {
            match workers.parse() {
                Ok(n) if n > 0 => self.server.notify_workers = n,
                _ => debug!(value = %workers, "Ignoring invalid CBFS_NOTIFY_WORKERS"),
            }
        }
        if let Some(id) = lookup("CBFS_CLIENT_ID") {
            if !id.is_empty() {
                self.client.client_id = Some(id);
            }
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Unix socket path
    pub socket: PathBuf,
    /// Flat directory of initial files
    pub data_dir: Option<PathBuf>,
    /// Invalidation delivery workers
    pub notify_workers: usize,
    /// Pending invalidation deliveries before new ones are dropped
    pub notify_queue: usize,
    /// Outbound frames buffered per client connection
    pub connection_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket: PathBuf::from(cbfs_ipc::default_socket_path()),
            data_dir: None,
            notify_workers: 8,
            notify_queue: 4096,
            connection_queue: 256,
        }
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub socket: PathBuf,
    /// Registry key; generated per session when unset
    pub client_id: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket: PathBuf::from(cbfs_ipc::default_socket_path()),
            client_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
}
