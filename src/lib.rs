//! # Robovac - Robotic Vacuum Fleet Client
//!
//! Client core for talking to a fleet of robotic vacuums over the local
//! network or a cloud broker relay: sealed framing, long-lived device
//! sessions, request/response correlation, capability detection per model
//! and firmware, and a room model decoded from the device map.
//!
//! ## Architecture
//!
//! ```text
//!   Fleet ──> Dispatcher ──> SessionManager ──> DeviceSession (task per device)
//!                 │                                  │
//!                 │ CapabilityRegistry               │ FrameSealer + FrameCodec
//!                 │ RoomModel                        │
//!                 v                                  v
//!            Command/Method                   Connector: local socket | broker relay
//! ```
//!
//! ### Session State Machine
//!
//! ```text
//!                      open + handshake ok
//!   [Disconnected] ──> [Connecting] ──────────────> [Connected]
//!        ^                  │                          │
//!        │   backoff        │ failure                  │ heartbeat timeout,
//!        └──────────────────┴──────────────────────────┘ close, desync
//!
//!   remove_device / shutdown / max_attempts ──> [Stopped]
//! ```
//!
//! ### Wire Format
//!
//! Each frame is a fixed header followed by a sealed body:
//!
//! | Field     | Size | Notes                                  |
//! |-----------|------|----------------------------------------|
//! | magic     | 2    | `RV`                                   |
//! | version   | 1    | wire format version                    |
//! | kind      | 1    | hello, request, response, event, ...   |
//! | security  | 1    | HMAC (handshake) or AEAD (session)     |
//! | flags     | 1    | body gzip-compressed before sealing    |
//! | sequence  | 4    | per-direction counter                  |
//! | body_len  | 4    | body length                            |
//! | crc32     | 4    | over the body as sent                  |
//!
//! The handshake is authenticated with an HMAC over the pre-shared device
//! key; afterwards bodies are encrypted with ChaCha20-Poly1305 under keys
//! derived from both nonces.
//!
//! ### Message Types
//!
//! | Type       | Direction       | Purpose                             |
//! |------------|-----------------|-------------------------------------|
//! | HELLO      | Client→Device   | Open a session                      |
//! | HELLO_ACK  | Device→Client   | Accept; carries model and firmware  |
//! | REQUEST    | Client→Device   | Command with request id             |
//! | RESPONSE   | Device→Client   | Result or error for a request id    |
//! | EVENT      | Device→Client   | Status, consumables, errors         |
//! | MAP_CHUNK  | Device→Client   | Part of a compressed map payload    |
//! | PING/PONG  | Bidirectional   | Heartbeat                           |
//! | CLOSE      | Bidirectional   | Session termination                 |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use robovac::{Config, Fleet};
//! use robovac::model::DeviceId;
//!
//! # async fn example() -> robovac::Result<()> {
//! let config = Config::from_file("robovac.toml")?;
//! let fleet = Fleet::from_config(config, None)?;
//!
//! let device = DeviceId::from("1a2b3c");
//! fleet.device(&device)?.wait_connected(std::time::Duration::from_secs(10)).await?;
//!
//! println!("{:?}", fleet.capabilities(&device)?.supported);
//! fleet.clean_rooms(&device, &["Kitchen", "Hallway"], 1).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`transport`]: Local sockets and broker relay channels
//! - [`codec`]: Framing, sealing, compression and map chunk reassembly
//! - [`protocol`]: Handshake and message bodies
//! - [`session`]: Per-device session tasks, heartbeat and reconnect
//! - [`dispatch`]: Commands, correlation, retries and confirmation
//! - [`capability`]: Model and firmware capability table
//! - [`map`]: Map parsing and the room graph
//! - [`model`]: Device identity, status, consumables and events
//! - [`fleet`]: Facade over all of the above
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod capability;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fleet;
pub mod map;
pub mod model;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use capability::{Capability, CapabilityRegistry, CapabilitySet};
pub use config::Config;
pub use dispatch::{Command, Dispatcher, Method, Outcome};
pub use error::{Result, RobovacError};
pub use fleet::Fleet;
pub use map::{RoomGraph, RoomId, RoomSelection};
pub use model::{DeviceConfig, DeviceEvent, DeviceId, DeviceStatus, EventKind};
pub use session::{DeviceSession, SessionManager, SessionState};
pub use transport::TransportKind;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use protocol::PROTOCOL_VERSION;
