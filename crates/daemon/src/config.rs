//! Configuration management for the TermGate daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/termgate/config.toml`.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("bind_addr is not a valid host:port address: {0}")]
    InvalidBindAddr(String),

    #[error("session command must not be empty")]
    EmptyCommand,

    #[error("flush_interval_ms must be between 1 and 1000, got {0}")]
    InvalidFlushInterval(u64),

    #[error("flush_max_size must be greater than 0, got {0}")]
    InvalidFlushMaxSize(usize),

    #[error("read_chunk_size must be greater than 0, got {0}")]
    InvalidReadChunkSize(usize),

    #[error("input_poll_ms must be between 1 and 10000, got {0}")]
    InvalidInputPoll(u64),

    #[error("stop_poll_interval_ms must be greater than 0, got {0}")]
    InvalidStopPollInterval(u64),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Placeholder in `session.args` replaced with the session key at spawn time.
pub const KEY_PLACEHOLDER: &str = "{key}";

/// Main configuration structure for the TermGate daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Listener configuration.
    pub server: ServerConfig,

    /// Session spawn and streaming configuration.
    pub session: SessionConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Listener configuration for the WebSocket server and IPC socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: String,

    /// Override path for the IPC admin socket. Defaults to the runtime dir.
    pub ipc_socket: Option<PathBuf>,
}

/// Session spawn and output streaming configuration.
///
/// The flush thresholds default to the reference tuning (16 ms matches a
/// 60 Hz redraw budget, 16 KiB bounds message size) but are deliberately
/// configurable; they are not tuned for every workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Program attached to each session's pseudo-terminal.
    pub command: String,

    /// Arguments passed to the program. Occurrences of `{key}` are replaced
    /// with the session key.
    pub args: Vec<String>,

    /// TERM value exported to the child process.
    pub term: String,

    /// Working directory for spawned sessions.
    pub cwd: Option<PathBuf>,

    /// Initial terminal height in rows.
    pub rows: u16,

    /// Initial terminal width in columns.
    pub cols: u16,

    /// Minimum interval between output flushes, in milliseconds.
    pub flush_interval_ms: u64,

    /// Buffered output size that forces a flush regardless of the interval.
    pub flush_max_size: usize,

    /// Size of individual PTY reads.
    pub read_chunk_size: usize,

    /// How long the input loop waits for a client frame before re-checking
    /// the session's running flag, in milliseconds.
    pub input_poll_ms: u64,

    /// Number of liveness polls after SIGTERM before escalating to SIGKILL.
    pub stop_grace_polls: u32,

    /// Interval between liveness polls during graceful stop, in milliseconds.
    pub stop_poll_interval_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8090".to_string(),
            ipc_socket: None,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command: default_shell(),
            args: Vec::new(),
            term: "xterm-256color".to_string(),
            cwd: None,
            rows: 24,
            cols: 80,
            flush_interval_ms: 16,
            flush_max_size: 16 * 1024,
            read_chunk_size: 8 * 1024,
            input_poll_ms: 100,
            stop_grace_polls: 20,
            stop_poll_interval_ms: 50,
        }
    }
}

impl SessionConfig {
    /// Minimum interval between output flushes.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Input loop receive timeout.
    pub fn input_poll(&self) -> Duration {
        Duration::from_millis(self.input_poll_ms)
    }

    /// Interval between liveness polls during graceful stop.
    pub fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_interval_ms)
    }

    /// Argument vector for a session, with the key placeholder substituted.
    pub fn args_for_key(&self, key: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(KEY_PLACEHOLDER, key))
            .collect()
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("termgate")
        .join("config.toml")
}

/// Returns the default shell for the current platform.
fn default_shell() -> String {
    if cfg!(windows) {
        "powershell.exe".to_string()
    } else {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
    }
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - TERMGATE_BIND_ADDR: Override WebSocket listener address
    /// - TERMGATE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - TERMGATE_COMMAND: Override the session command
    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("TERMGATE_BIND_ADDR") {
            if !addr.is_empty() {
                tracing::info!("Overriding bind_addr from environment: {}", addr);
                self.server.bind_addr = addr;
            }
        }

        if let Ok(level) = std::env::var("TERMGATE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }

        if let Ok(command) = std::env::var("TERMGATE_COMMAND") {
            if !command.is_empty() {
                tracing::info!("Overriding session command from environment: {}", command);
                self.session.command = command;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidBindAddr(self.server.bind_addr.clone()));
        }

        if self.session.command.trim().is_empty() {
            return Err(ConfigError::EmptyCommand);
        }

        if self.session.flush_interval_ms == 0 || self.session.flush_interval_ms > 1000 {
            return Err(ConfigError::InvalidFlushInterval(
                self.session.flush_interval_ms,
            ));
        }

        if self.session.flush_max_size == 0 {
            return Err(ConfigError::InvalidFlushMaxSize(self.session.flush_max_size));
        }

        if self.session.read_chunk_size == 0 {
            return Err(ConfigError::InvalidReadChunkSize(
                self.session.read_chunk_size,
            ));
        }

        if self.session.input_poll_ms == 0 || self.session.input_poll_ms > 10_000 {
            return Err(ConfigError::InvalidInputPoll(self.session.input_poll_ms));
        }

        if self.session.stop_poll_interval_ms == 0 {
            return Err(ConfigError::InvalidStopPollInterval(
                self.session.stop_poll_interval_ms,
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.daemon.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from the default path, falling back to defaults
    /// when no file exists.
    pub fn load_default() -> Result<Self> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the given path, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config dir: {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("failed to write config file: {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session.flush_interval_ms, 16);
        assert_eq!(config.session.flush_max_size, 16 * 1024);
        assert_eq!(config.session.read_chunk_size, 8 * 1024);
        assert_eq!(config.session.stop_grace_polls, 20);
        assert_eq!(config.session.stop_poll_interval_ms, 50);
    }

    #[test]
    fn test_config_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.server.bind_addr = "127.0.0.1:9999".to_string();
        config.session.command = "/usr/bin/env".to_string();
        config.session.args = vec!["tracker".to_string(), "{key}".to_string()];

        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[server]\nbind_addr = \"0.0.0.0:7070\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.bind_addr, "0.0.0.0:7070");
        assert_eq!(config.session.flush_interval_ms, 16);
        assert_eq!(config.daemon.log_level, "info");
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempdir().unwrap();
        let result = Config::load(&dir.path().join("nope.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_bind_addr() {
        let mut config = Config::default();
        config.server.bind_addr = "not-an-address".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBindAddr(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_command() {
        let mut config = Config::default();
        config.session.command = "  ".to_string();
        assert_eq!(config.validate(), Err(ConfigError::EmptyCommand));
    }

    #[test]
    fn test_validate_rejects_zero_flush_interval() {
        let mut config = Config::default();
        config.session.flush_interval_ms = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidFlushInterval(0))
        );
    }

    #[test]
    fn test_validate_rejects_oversized_flush_interval() {
        let mut config = Config::default();
        config.session.flush_interval_ms = 5000;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidFlushInterval(5000))
        );
    }

    #[test]
    fn test_validate_rejects_zero_flush_max_size() {
        let mut config = Config::default();
        config.session.flush_max_size = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidFlushMaxSize(0)));
    }

    #[test]
    fn test_validate_rejects_bad_log_level() {
        let mut config = Config::default();
        config.daemon.log_level = "loud".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn test_args_for_key_substitutes_placeholder() {
        let mut config = SessionConfig::default();
        config.args = vec![
            "attach".to_string(),
            "{key}".to_string(),
            "--label={key}".to_string(),
            "plain".to_string(),
        ];

        let args = config.args_for_key("task-1");
        assert_eq!(args, vec!["attach", "task-1", "--label=task-1", "plain"]);
    }

    #[test]
    #[serial]
    fn test_env_override_bind_addr() {
        std::env::set_var("TERMGATE_BIND_ADDR", "127.0.0.1:6001");
        let mut config = Config::default();
        config.apply_env_overrides();
        std::env::remove_var("TERMGATE_BIND_ADDR");

        assert_eq!(config.server.bind_addr, "127.0.0.1:6001");
    }

    #[test]
    #[serial]
    fn test_env_override_ignores_empty_values() {
        std::env::set_var("TERMGATE_LOG_LEVEL", "");
        let mut config = Config::default();
        config.apply_env_overrides();
        std::env::remove_var("TERMGATE_LOG_LEVEL");

        assert_eq!(config.daemon.log_level, "info");
    }

    #[test]
    fn test_default_config_path_ends_with_toml() {
        let path = default_config_path();
        assert!(path.to_str().unwrap().contains("termgate"));
        assert!(path.extension().map(|e| e == "toml").unwrap_or(false));
    }
}
