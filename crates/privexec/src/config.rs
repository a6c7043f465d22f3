//! Bridge configuration.
//!
//! Loaded from `~/.config/privexec/config.toml`:
//!
//! ```toml
//! socket_path = "$XDG_RUNTIME_DIR/privexec-broker.sock"
//! capability = "new_process"
//! connect_timeout_ms = 5000
//! response_timeout_ms = 10000
//! ```
//!
//! Every field is optional. The CLI's `--socket` (or `PRIVEXEC_SOCKET`)
//! overrides `socket_path`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use privexec_protocol::NEW_PROCESS_CAPABILITY;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Socket file name inside the runtime directory.
pub const DEFAULT_SOCKET_NAME: &str = "privexec-broker.sock";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid socket path {0:?}: {1}")]
    InvalidPath(String, String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Unix socket the broker listens on. `~` and `$VARS` are expanded.
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Name of the hidden process-creation capability.
    #[serde(default = "default_capability")]
    pub capability: String,

    /// Upper bound for establishing a broker connection.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Upper bound for the broker's answer to any request except waiting
    /// for a process.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

fn default_socket_path() -> String {
    let runtime_dir = dirs::runtime_dir().unwrap_or_else(std::env::temp_dir);
    runtime_dir.join(DEFAULT_SOCKET_NAME).to_string_lossy().into_owned()
}

fn default_capability() -> String {
    NEW_PROCESS_CAPABILITY.to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_response_timeout_ms() -> u64 {
    10_000
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            capability: default_capability(),
            connect_timeout_ms: default_connect_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

impl BridgeConfig {
    /// `$XDG_CONFIG_HOME/privexec/config.toml`, or `None` when no config
    /// directory can be determined.
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("privexec").join("config.toml"))
    }

    /// Load from the default location, falling back to defaults when the
    /// file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_config_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            Some(path) => {
                debug!("Config file {:?} not found, using defaults", path);
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// Load config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Replace the socket path if `socket` is set and non-empty.
    pub fn with_socket_override(mut self, socket: Option<String>) -> Self {
        if let Some(socket) = socket.filter(|s| !s.is_empty()) {
            self.socket_path = socket;
        }
        self
    }

    /// Socket path with `~` and environment variables expanded.
    pub fn resolved_socket_path(&self) -> Result<PathBuf, ConfigError> {
        shellexpand::full(&self.socket_path)
            .map(|p| PathBuf::from(p.as_ref()))
            .map_err(|e| ConfigError::InvalidPath(self.socket_path.clone(), e.to_string()))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}
