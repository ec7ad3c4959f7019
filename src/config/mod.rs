//! Configuration module
//!
//! Handles loading and saving casemux configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::network::{Endpoint, RetryPolicy, Timeouts, DEFAULT_MAX_ATTEMPTS};
use crate::protocol::{DEFAULT_HOST, DEFAULT_MAX_FRAGMENT_SIZE, DEFAULT_PATH, DEFAULT_PORT};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Where and how to connect
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Connect retry settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Response timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// General configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
    /// Log filter directive, overrides `verbose` (e.g. "casemux=trace")
    pub log_filter: Option<String>,
}

/// Transport used to reach the remote peer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// WebSocket at `ws://host:port/path`
    #[default]
    WebSocket,
    /// Fragment-framed TCP
    Tcp,
}

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Host the remote peer listens on
    #[serde(default = "default_host")]
    pub host: String,
    /// Port the remote peer listens on
    #[serde(default = "default_port")]
    pub port: u16,
    /// WebSocket resource path
    #[serde(default = "default_path")]
    pub path: String,
    /// Transport kind
    #[serde(default)]
    pub transport: TransportKind,
    /// Largest outbound fragment on framed TCP
    #[serde(default = "default_max_fragment_size")]
    pub max_fragment_size: usize,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_path() -> String {
    DEFAULT_PATH.to_string()
}

fn default_max_fragment_size() -> usize {
    DEFAULT_MAX_FRAGMENT_SIZE
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_path(),
            transport: TransportKind::default(),
            max_fragment_size: default_max_fragment_size(),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total connect attempts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Pause between attempts in ms
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_retry_delay() -> u64 {
    250
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Timeout for steady-state requests in ms
    #[serde(default = "default_steady_timeout")]
    pub steady_ms: u64,
    /// Timeout for game lifecycle requests in ms
    #[serde(default = "default_lifecycle_timeout")]
    pub lifecycle_ms: u64,
}

fn default_steady_timeout() -> u64 {
    1000
}

fn default_lifecycle_timeout() -> u64 {
    25_000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            steady_ms: default_steady_timeout(),
            lifecycle_ms: default_lifecycle_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("casemux/config.toml")),
            Some(PathBuf::from("./casemux.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Endpoint of the remote peer
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.connection.host.clone(), self.connection.port)
            .with_path(self.connection.path.clone())
    }

    /// Connect retry policy
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.retry_delay_ms),
        )
    }

    /// Response timeouts
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            steady: Duration::from_millis(self.timeouts.steady_ms),
            lifecycle: Duration::from_millis(self.timeouts.lifecycle_ms),
        }
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        connection: ConnectionConfig {
            host: "192.168.1.20".to_string(),
            ..Default::default()
        },
        ..Default::default()
    };

    Ok(toml::to_string_pretty(&config)?)
}
