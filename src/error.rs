//! Robovac error types.
//!
//! # Error Classes
//!
//! Errors fall into three groups with different handling policies:
//!
//! - **Session-level** (`Connection`, `Handshake`, `HandshakeRejected`,
//!   `FrameTooLarge`): the session task absorbs these and schedules a
//!   reconnect with backoff. They reach callers only through events.
//! - **Command-level** (`Timeout`, `Disconnected`, `NotConnected`,
//!   `DeviceRejected`, `ConfirmationTimeout`): returned from the dispatcher
//!   to the caller that issued the command.
//! - **Validation** (`UnsupportedCapability`, `StaleRoomReference`,
//!   `UnknownRoom`, `InvalidCommand`): rejected before anything is sent.
//!
//! `Decode`, `Integrity` and `MapParse` are local and non-fatal: the
//! offending frame or payload is dropped and the previous state is kept.
//!
//! The `Crypto` variant preserves the full error chain via `#[source]`.

use std::time::Duration;

use thiserror::Error;

use crate::capability::Capability;
use crate::codec::crypto::CryptoError;

/// Robovac errors.
#[derive(Error, Debug)]
pub enum RobovacError {
    /// Transport could not be opened or failed underneath the session.
    #[error("Connection error: {0}")]
    Connection(String),

    /// No response arrived within the deadline after all retries.
    #[error("Command {method} timed out after {attempts} attempts")]
    Timeout {
        /// Wire name of the method.
        method: String,
        /// Number of times the request was sent.
        attempts: u32,
    },

    /// The session dropped while the command was pending.
    #[error("Session disconnected while command was pending")]
    Disconnected,

    /// Command issued while the device has no live session.
    #[error("Device {0} is not connected")]
    NotConnected(String),

    /// Malformed frame or payload.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Frame length exceeds the configured cap. The stream is desynchronized.
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Declared body length.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Authentication or decryption failed, or the frame used an
    /// unexpected security mode.
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// Handshake failed locally (bad ack, key derivation, timeout).
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// Device refused the handshake.
    #[error("Handshake rejected by device: {0}")]
    HandshakeRejected(String),

    /// Map payload could not be parsed. The previous room graph is kept.
    #[error("Map parse error: {0}")]
    MapParse(String),

    /// Device model/firmware does not support the capability.
    #[error("Capability {capability} not supported by {model}")]
    UnsupportedCapability {
        /// Capability the command needs.
        capability: Capability,
        /// Device model designator.
        model: String,
    },

    /// Room selection was made against an older map generation or
    /// another floor's map.
    #[error(
        "Stale room reference: selection from map {selected_map} generation {selected}, \
         current is map {current_map} generation {current}"
    )]
    StaleRoomReference {
        /// Generation the selection was taken from.
        selected: u32,
        /// Generation of the current room graph.
        current: u32,
        /// Map (floor) the selection was taken from.
        selected_map: u32,
        /// Map (floor) of the current room graph.
        current_map: u32,
    },

    /// Room id or name not present in the current room graph.
    #[error("Unknown room: {0}")]
    UnknownRoom(String),

    /// Device answered the request with an error.
    #[error("Device rejected command ({code}): {message}")]
    DeviceRejected {
        /// Device error code.
        code: i64,
        /// Device error message.
        message: String,
    },

    /// Command was acknowledged but the expected state never arrived.
    #[error("State change not confirmed within {0:?}")]
    ConfirmationTimeout(Duration),

    /// Device id not registered with the session manager.
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// Command parameters are out of range or malformed.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// Cryptographic operation failed.
    #[error("Crypto error: {0}")]
    Crypto(#[source] CryptoError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for robovac operations
pub type Result<T> = std::result::Result<T, RobovacError>;

impl RobovacError {
    /// Whether the stream can no longer be trusted to be frame-aligned.
    pub fn is_desync(&self) -> bool {
        matches!(self, Self::FrameTooLarge { .. })
    }

    /// Whether the error was raised before anything reached the device.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedCapability { .. }
                | Self::StaleRoomReference { .. }
                | Self::UnknownRoom(_)
                | Self::InvalidCommand(_)
        )
    }
}

impl From<CryptoError> for RobovacError {
    fn from(err: CryptoError) -> Self {
        RobovacError::Crypto(err)
    }
}

impl From<toml::de::Error> for RobovacError {
    fn from(err: toml::de::Error) -> Self {
        RobovacError::Config(err.to_string())
    }
}

impl From<base64::DecodeError> for RobovacError {
    fn from(err: base64::DecodeError) -> Self {
        RobovacError::Handshake(format!("Base64 decode error: {err}"))
    }
}
