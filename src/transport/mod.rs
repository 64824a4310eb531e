//! Transport layer: byte channels to a device.
//!
//! A session runs over either a direct local socket or a relay through a
//! message broker. Both present the same [`Channel`] contract, so the
//! session code above never knows which one it holds.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            Session runner               │
//! │         (Transport-Agnostic)            │
//! └──────────────────┬──────────────────────┘
//!                    │ Box<dyn Channel>
//!          ┌────────┴─────────┐
//!          ▼                  ▼
//! ┌─────────────────┐ ┌──────────────────┐
//! │  StreamChannel  │ │   RelayChannel   │
//! │ (TCP / duplex)  │ │ (Broker topics)  │
//! └─────────────────┘ └──────────────────┘
//! ```

mod relay;
mod stream;

pub use relay::{
    device_inbound_topic, device_outbound_topic, Broker, MemoryBroker, RelayChannel,
    RelayConnector,
};
pub use stream::{DuplexConnector, DuplexListener, StreamChannel, TcpConnector};

use bytes::Bytes;
pub use futures::future::BoxFuture;

use crate::error::Result;

/// How a channel reaches its device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Direct connection on the local network (default)
    #[default]
    Local,
    /// Relayed through the cloud broker
    Relayed,
}

impl TransportKind {
    /// Get descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Relayed => "relayed",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "tcp" | "lan" => Ok(Self::Local),
            "relayed" | "relay" | "cloud" | "mqtt" => Ok(Self::Relayed),
            _ => Err(format!("Unknown transport kind: {}", s)),
        }
    }
}

/// A bidirectional byte channel to one device.
///
/// The inbound side is a lazy, non-restartable sequence of byte chunks with
/// no relation to frame boundaries. `None` from [`Channel::recv`] means the
/// transport closed; a closed channel is never reopened.
pub trait Channel: Send {
    /// Write bytes to the device
    fn send(&mut self, bytes: Bytes) -> BoxFuture<'_, Result<()>>;

    /// Next inbound chunk.
    ///
    /// Must be cancel-safe: if the future is dropped before completing, no
    /// data is lost.
    fn recv(&mut self) -> BoxFuture<'_, Option<Result<Bytes>>>;

    /// Release the underlying socket or subscription. Idempotent.
    fn close(&mut self) -> BoxFuture<'_, ()>;

    /// How this channel reaches the device
    fn kind(&self) -> TransportKind;
}

/// Opens channels to one device
pub trait Connector: Send + Sync {
    /// Open a new channel
    fn open(&self) -> BoxFuture<'_, Result<Box<dyn Channel>>>;

    /// Kind of channel this connector opens
    fn kind(&self) -> TransportKind;

    /// Address or topic, for logging
    fn describe(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_transport_kind_from_str() {
        assert_eq!(TransportKind::from_str("local").unwrap(), TransportKind::Local);
        assert_eq!(TransportKind::from_str("TCP").unwrap(), TransportKind::Local);
        assert_eq!(
            TransportKind::from_str("cloud").unwrap(),
            TransportKind::Relayed
        );
        assert!(TransportKind::from_str("carrier-pigeon").is_err());
    }

    #[test]
    fn test_transport_kind_default() {
        assert_eq!(TransportKind::default(), TransportKind::Local);
        assert_eq!(TransportKind::Relayed.to_string(), "relayed");
    }
}
