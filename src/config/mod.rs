//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables (`ROBOVAC_*`)
//!
//! Durations are stored as integer milliseconds and exposed as
//! [`Duration`] through accessor methods.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RobovacError};
use crate::model::DeviceConfig;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Session lifecycle (connect, handshake, heartbeat)
    #[serde(default)]
    pub session: SessionConfig,

    /// Reconnect backoff and transport failover
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Command timeouts and retries
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Frame and map payload limits
    #[serde(default)]
    pub codec: CodecConfig,

    /// Capability table source
    #[serde(default)]
    pub capabilities: CapabilityConfig,

    /// Devices to manage
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RobovacError::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| RobovacError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(client_id) = std::env::var("ROBOVAC_CLIENT_ID") {
            config.session.client_id = client_id;
        }
        if let Some(val) = env_parse("ROBOVAC_HEARTBEAT_INTERVAL_MS") {
            config.session.heartbeat_interval_ms = val;
        }
        if let Some(val) = env_parse("ROBOVAC_HEARTBEAT_TIMEOUT_MS") {
            config.session.heartbeat_timeout_ms = val;
        }
        if let Some(val) = env_parse("ROBOVAC_COMMAND_TIMEOUT_MS") {
            config.dispatch.command_timeout_ms = val;
        }
        if let Some(val) = env_parse("ROBOVAC_MAX_RETRIES") {
            config.dispatch.max_retries = val;
        }
        if let Some(val) = env_parse("ROBOVAC_RECONNECT_MAX_DELAY_MS") {
            config.reconnect.max_delay_ms = val;
        }
        if let Ok(path) = std::env::var("ROBOVAC_CAPABILITY_TABLE") {
            config.capabilities.table_path = Some(PathBuf::from(path));
        }

        config
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.session.heartbeat_interval_ms == 0 {
            return Err(RobovacError::Config(
                "session.heartbeat_interval_ms must be positive".to_string(),
            ));
        }
        if self.session.heartbeat_timeout_ms <= self.session.heartbeat_interval_ms {
            return Err(RobovacError::Config(format!(
                "session.heartbeat_timeout_ms ({}) must exceed heartbeat_interval_ms ({})",
                self.session.heartbeat_timeout_ms, self.session.heartbeat_interval_ms
            )));
        }
        if self.reconnect.initial_delay_ms > self.reconnect.max_delay_ms {
            return Err(RobovacError::Config(
                "reconnect.initial_delay_ms must not exceed max_delay_ms".to_string(),
            ));
        }
        if self.dispatch.command_timeout_ms == 0 || self.dispatch.ack_timeout_ms == 0 {
            return Err(RobovacError::Config(
                "dispatch timeouts must be positive".to_string(),
            ));
        }
        if self.codec.max_frame_size < 1024 {
            return Err(RobovacError::Config(format!(
                "codec.max_frame_size ({}) is below the 1024 byte minimum",
                self.codec.max_frame_size
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for device in &self.devices {
            if !seen.insert(device.id.as_str()) {
                return Err(RobovacError::Config(format!(
                    "device {} configured twice",
                    device.id
                )));
            }
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Identifier sent to devices in the handshake
    pub client_id: String,

    /// Timeout for opening the transport
    pub connect_timeout_ms: u64,

    /// Timeout for the Hello/HelloAck exchange
    pub handshake_timeout_ms: u64,

    /// Interval between heartbeat pings
    pub heartbeat_interval_ms: u64,

    /// Inbound silence after which the session is considered dead
    pub heartbeat_timeout_ms: u64,

    /// Capacity of the per-session outbound queue
    pub outbound_queue: usize,

    /// Capacity of the fleet event broadcast
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_id: "robovac-core".to_string(),
            connect_timeout_ms: 5_000,
            handshake_timeout_ms: 5_000,
            heartbeat_interval_ms: 15_000,
            heartbeat_timeout_ms: 45_000,
            outbound_queue: 64,
            event_buffer: 1024,
        }
    }
}

impl SessionConfig {
    /// Transport open timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Handshake timeout
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Heartbeat ping interval
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Inbound silence limit
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

/// Reconnect backoff configuration.
///
/// `delay = min(initial * 2^attempt, max) * jitter`, jitter within +-25%.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt
    pub initial_delay_ms: u64,

    /// Upper bound on backoff delay (before jitter)
    pub max_delay_ms: u64,

    /// Give up after this many consecutive failures. `None` retries forever.
    pub max_attempts: Option<u32>,

    /// Consecutive local failures before falling back to the relay
    pub local_failover_threshold: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: None,
            local_failover_threshold: 3,
        }
    }
}

impl ReconnectConfig {
    /// Initial backoff delay
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Backoff cap
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Command dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Deadline for query-style commands
    pub command_timeout_ms: u64,

    /// Deadline for acknowledgement-only commands (start, dock, goto)
    pub ack_timeout_ms: u64,

    /// Resends after the first attempt before giving up
    pub max_retries: u32,

    /// How long `issue_confirmed` waits for the expected state
    pub confirm_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 5_000,
            ack_timeout_ms: 10_000,
            max_retries: 2,
            confirm_timeout_ms: 30_000,
        }
    }
}

impl DispatchConfig {
    /// Query command deadline
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Acknowledgement-only command deadline
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// State confirmation deadline
    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }
}

/// Codec limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Largest accepted frame body; larger means the stream is desynchronized
    pub max_frame_size: usize,

    /// Payloads at least this large are gzip-compressed before sealing
    pub compression_threshold: usize,

    /// Largest reassembled (and decompressed) map payload
    pub max_map_size: usize,

    /// Partial map transfers older than this are discarded
    pub map_transfer_timeout_ms: u64,

    /// Decode failures tolerated within the window before reconnecting
    pub decode_error_threshold: usize,

    /// Sliding window for decode failures
    pub decode_error_window_ms: u64,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 256 * 1024,
            compression_threshold: 1024,
            max_map_size: 4 * 1024 * 1024,
            map_transfer_timeout_ms: 30_000,
            decode_error_threshold: 5,
            decode_error_window_ms: 10_000,
        }
    }
}

impl CodecConfig {
    /// Partial map transfer expiry
    pub fn map_transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.map_transfer_timeout_ms)
    }

    /// Decode failure window
    pub fn decode_error_window(&self) -> Duration {
        Duration::from_millis(self.decode_error_window_ms)
    }
}

/// Capability table source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityConfig {
    /// External table replacing the built-in one
    pub table_path: Option<PathBuf>,
}

impl CapabilityConfig {
    /// The table file to load, if any.
    ///
    /// An explicit `table_path` wins; otherwise `<config_dir>/robovac/capabilities.toml`
    /// is used when it exists.
    pub fn resolve_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.table_path {
            return Some(path.clone());
        }
        dirs::config_dir()
            .map(|dir| dir.join("robovac").join("capabilities.toml"))
            .filter(|path| path.is_file())
    }
}
