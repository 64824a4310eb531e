//! Session management.
//!
//! Each device gets one long-lived task that owns its channel. The task
//! connects, runs the handshake, keeps the link alive with heartbeats and
//! reconnects with backoff when anything goes wrong. Commands reach it
//! through a [`SessionLink`] that exists only while a session is up.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use robovac::capability::CapabilityRegistry;
//! use robovac::config::Config;
//! use robovac::model::DeviceConfig;
//! use robovac::session::SessionManager;
//!
//! # async fn example() -> robovac::Result<()> {
//! let registry = Arc::new(CapabilityRegistry::builtin()?);
//! let manager = SessionManager::new(Config::default(), registry);
//! let device = manager.add_device(
//!     DeviceConfig::new("1a2b3c", "aB3dE5gH7jK9mN1p").with_local_addr("192.168.1.40:58867"),
//! )?;
//! device.wait_connected(Duration::from_secs(10)).await?;
//! println!("rooms: {}", device.room_graph().len());
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod backoff;
mod device;
mod link;
mod manager;
mod runner;
mod state;

pub use backoff::calculate_backoff;
pub use device::DeviceSession;
#[cfg(test)]
pub(crate) use device::DeviceShared;
#[cfg(test)]
pub(crate) use link::Outbound;
pub use link::{PendingRequest, PendingTable, SessionLink};
pub use manager::{Connectors, SessionManager};
pub use state::{Heartbeat, SessionState};
