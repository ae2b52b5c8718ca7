//! # Configuration Management
//!
//! Centralized configuration for discovery, the device transport and logging.
//!
//! A [`BridgeConfig`] value is built once by the host and handed to each
//! component at construction; nothing in the crate reads configuration from a
//! process-wide singleton.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`
//!
//! Durations are expressed in milliseconds in TOML.

use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Ports appliances listen on for the discovery probe
pub const DEFAULT_DISCOVERY_PORTS: [u16; 2] = [6445, 20086];

/// Largest discovery datagram the scanner accepts
pub const MAX_DATAGRAM_SIZE: usize = 4096;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BridgeConfig {
    /// Discovery scanner configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Device transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BridgeConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addrs) = std::env::var("APPLIANCE_LINK_BROADCAST_ADDRESSES") {
            config.discovery.broadcast_addresses = addrs
                .split(',')
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect();
        }

        if let Ok(window) = std::env::var("APPLIANCE_LINK_DISCOVERY_WINDOW_MS") {
            let val = window.parse::<u64>().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid discovery window '{window}': {e}"))
            })?;
            config.discovery.window = Duration::from_millis(val);
        }

        if let Ok(timeout) = std::env::var("APPLIANCE_LINK_CONNECT_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.transport.connect_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(flag) = std::env::var("APPLIANCE_LINK_TOLERATE_RECOVERABLE_ERRORS") {
            config.transport.tolerate_recoverable_errors = matches!(flag.as_str(), "1" | "true");
        }

        if let Ok(level) = std::env::var("APPLIANCE_LINK_LOG_LEVEL") {
            config.logging.log_level = level.parse::<Level>().map_err(|_| {
                ProtocolError::ConfigError(format!("Invalid log level: {level}"))
            })?;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.discovery.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Discovery scanner configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    /// Broadcast (or unicast) addresses the probe is sent to
    pub broadcast_addresses: Vec<String>,

    /// UDP ports the probe is sent to on each address
    pub ports: Vec<u16>,

    /// How long the scanner listens for replies
    #[serde(with = "duration_serde")]
    pub window: Duration,

    /// Number of times the probe is repeated within the window
    pub broadcast_count: u32,

    /// Delay between repeated probes
    #[serde(with = "duration_serde")]
    pub broadcast_interval: Duration,

    /// Upper bound on one device's credential/handshake chain
    #[serde(with = "duration_serde")]
    pub device_timeout: Duration,

    /// Local address the discovery socket binds to
    pub bind_address: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            broadcast_addresses: vec![Ipv4Addr::BROADCAST.to_string()],
            ports: DEFAULT_DISCOVERY_PORTS.to_vec(),
            window: timeout::DISCOVERY_WINDOW,
            broadcast_count: 3,
            broadcast_interval: Duration::from_millis(500),
            device_timeout: timeout::DEVICE_TIMEOUT,
            bind_address: String::from("0.0.0.0:0"),
        }
    }
}

impl DiscoveryConfig {
    /// Validate discovery configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.broadcast_addresses.is_empty() {
            errors.push("At least one broadcast address is required".to_string());
        }
        for addr in &self.broadcast_addresses {
            if addr.parse::<std::net::IpAddr>().is_err() {
                errors.push(format!(
                    "Invalid broadcast address: '{addr}' (expected an IP address)"
                ));
            }
        }

        if self.ports.is_empty() {
            errors.push("At least one discovery port is required".to_string());
        } else if self.ports.contains(&0) {
            errors.push("Discovery port 0 is not allowed".to_string());
        }

        if self.window.as_millis() < 10 {
            errors.push("Discovery window too short (minimum: 10ms)".to_string());
        } else if self.window.as_secs() > 300 {
            errors.push("Discovery window too long (maximum: 300s)".to_string());
        }

        if self.broadcast_count == 0 {
            errors.push("Broadcast count must be greater than 0".to_string());
        }

        if self.device_timeout.as_millis() < 100 {
            errors.push("Device timeout too short (minimum: 100ms)".to_string());
        }

        if self.bind_address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid bind address format: '{}' (expected format: '0.0.0.0:0')",
                self.bind_address
            ));
        }

        errors
    }
}

/// Device transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Timeout for connection attempts
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Timeout for a single read
    #[serde(with = "duration_serde")]
    pub read_timeout: Duration,

    /// Timeout for a single write
    #[serde(with = "duration_serde")]
    pub write_timeout: Duration,

    /// Log connection resets and similar noise instead of surfacing them
    pub tolerate_recoverable_errors: bool,

    /// Maximum accepted frame size in bytes
    pub max_frame_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: timeout::CONNECT_TIMEOUT,
            read_timeout: timeout::DEFAULT_TIMEOUT,
            write_timeout: timeout::DEFAULT_TIMEOUT,
            tolerate_recoverable_errors: false,
            max_frame_size: crate::core::frame::MAX_FRAME_SIZE,
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.connect_timeout.as_millis() < 100 {
            errors.push("Connection timeout too short (minimum: 100ms)".to_string());
        } else if self.connect_timeout.as_secs() > 60 {
            errors.push("Connection timeout too long (maximum: 60s)".to_string());
        }

        if self.read_timeout.as_millis() < 10 {
            errors.push("Read timeout too short (minimum: 10ms)".to_string());
        }

        if self.write_timeout.as_millis() < 10 {
            errors.push("Write timeout too short (minimum: 10ms)".to_string());
        }

        if self.max_frame_size < crate::core::frame::HEADER_LEN {
            errors.push("Max frame size smaller than a frame header".to_string());
        } else if self.max_frame_size > crate::core::frame::MAX_FRAME_SIZE {
            errors.push(format!(
                "Max frame size too large: {} bytes (maximum: {})",
                self.max_frame_size,
                crate::core::frame::MAX_FRAME_SIZE
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,

    /// Whether to colorize console output
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("appliance-link"),
            log_level: Level::INFO,
            json_format: false,
            ansi: true,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.json_format && self.ansi {
            errors.push("ANSI colors cannot be combined with JSON formatting".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
