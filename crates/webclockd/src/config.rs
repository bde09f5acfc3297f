//! Daemon process configuration.
//!
//! Where the daemon listens and where it keeps its files. This is
//! separate from the user [`Settings`](webclock_core::Settings), which live
//! in the state store and change at runtime.
//!
//! Resolution order, later wins:
//! 1. Built-in defaults (XDG data/state dirs, `/tmp` fallback)
//! 2. `$XDG_CONFIG_HOME/webclock/config.toml`, if present
//! 3. `WEBCLOCK_SOCKET` / `WEBCLOCK_STATE` environment variables

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Default socket path
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/webclock.sock";

/// Environment variable overriding the socket path.
pub const SOCKET_ENV: &str = "WEBCLOCK_SOCKET";

/// Environment variable overriding the state file path.
pub const STATE_ENV: &str = "WEBCLOCK_STATE";

const APP_DIR: &str = "webclock";

/// Resolved daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    /// JSON file holding usage, settings, marker and constraints
    pub state_path: PathBuf,
    pub pid_path: PathBuf,
    pub log_path: PathBuf,
}

/// Optional overrides read from `config.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    socket_path: Option<PathBuf>,
    state_path: Option<PathBuf>,
    pid_path: Option<PathBuf>,
    log_path: Option<PathBuf>,
}

/// Errors while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Invalid config file {path}: {error}")]
    Parse { path: PathBuf, error: String },
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(APP_DIR);
        let state_dir = dirs::state_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(APP_DIR);

        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            state_path: data_dir.join("state.json"),
            pid_path: state_dir.join("webclockd.pid"),
            log_path: state_dir.join("webclockd.log"),
        }
    }
}

impl DaemonConfig {
    /// Default location of the config file.
    pub fn default_file() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
    }

    /// Loads configuration from the default file and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::default_file().as_deref(), |key| std::env::var(key).ok())
    }

    /// Loads configuration from `file` (skipped if absent) and `env`.
    pub fn load_from(
        file: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = file {
            match std::fs::read_to_string(path) {
                Ok(contents) => {
                    let parsed: FileConfig =
                        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
                            path: path.to_path_buf(),
                            error: e.to_string(),
                        })?;
                    config.apply_file(parsed);
                    debug!(path = %path.display(), "Loaded config file");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(ConfigError::Read {
                        path: path.to_path_buf(),
                        error: e.to_string(),
                    })
                }
            }
        }

        if let Some(socket) = env(SOCKET_ENV).filter(|s| !s.is_empty()) {
            config.socket_path = PathBuf::from(socket);
        }
        if let Some(state) = env(STATE_ENV).filter(|s| !s.is_empty()) {
            config.state_path = PathBuf::from(state);
        }

        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(p) = file.socket_path {
            self.socket_path = p;
        }
        if let Some(p) = file.state_path {
            self.state_path = p;
        }
        if let Some(p) = file.pid_path {
            self.pid_path = p;
        }
        if let Some(p) = file.log_path {
            self.log_path = p;
        }
    }
}
