//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level configuration shared by the server binary and game clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Session server settings.
    pub server: ServerConfig,
    /// Game client settings.
    pub client: ClientConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Session server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// IPv4 address to bind the UDP listener to.
    pub bind_address: String,
    /// UDP port to listen on.
    pub port: u16,
    /// Maximum number of simultaneously connected peers.
    pub max_connections: usize,
    /// Lowest client version accepted during the handshake.
    pub min_client_version: i32,
    /// Highest client version accepted during the handshake.
    pub max_client_version: i32,
    /// Seconds of silence after which a peer is considered disconnected.
    pub idle_timeout_seconds: u32,
    /// Seconds between periodic statistics log lines (0 disables them).
    pub stats_interval_seconds: u32,
}

/// Game client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Session server address.
    pub server_address: String,
    /// Session server port.
    pub server_port: u16,
    /// Version sent in the connection handshake.
    pub client_version: i32,
    /// Minimum milliseconds between batched outbound packets.
    pub min_send_interval_ms: u64,
    /// Milliseconds between keepalive pings.
    pub keepalive_interval_ms: u64,
    /// Milliseconds to wait for the handshake reply.
    pub connect_timeout_ms: u64,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Directory for JSON log files in debug builds.
    pub log_dir: Option<PathBuf>,
}

// --- Default implementations ---

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 23456,
            max_connections: 1024,
            min_client_version: 1,
            max_client_version: 1,
            idle_timeout_seconds: 15,
            stats_interval_seconds: 60,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            server_port: 23456,
            client_version: 1,
            min_send_interval_ms: 100,
            keepalive_interval_ms: 1000,
            connect_timeout_ms: 5000,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl ServerConfig {
    /// Idle timeout as a [`Duration`].
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.idle_timeout_seconds))
    }

    /// Statistics interval, or `None` when periodic statistics are disabled.
    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_seconds > 0)
            .then(|| Duration::from_secs(u64::from(self.stats_interval_seconds)))
    }

    /// Whether a handshake carrying `version` should be accepted.
    pub fn accepts_version(&self, version: i32) -> bool {
        (self.min_client_version..=self.max_client_version).contains(&version)
    }
}

impl ClientConfig {
    /// Minimum interval between batched sends.
    pub fn min_send_interval(&self) -> Duration {
        Duration::from_millis(self.min_send_interval_ms)
    }

    /// Interval between keepalive pings.
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    /// Handshake timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Platform config directory for Gather (`<config dir>/gather`), falling back
/// to the working directory when the platform has none.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("gather"))
        .unwrap_or_else(|| PathBuf::from("."))
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            config.validate()?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join("config.ron");
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
        new_config.validate()?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Reject settings that cannot work at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let server = &self.server;
        if server.min_client_version > server.max_client_version {
            return Err(ConfigError::InvalidVersionRange {
                min: server.min_client_version,
                max: server.max_client_version,
            });
        }
        Ok(())
    }
}
