//! Session manager: owns every device session in the fleet.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::device::{DeviceSession, DeviceShared};
use super::runner::Runner;
use super::state::SessionState;
use crate::capability::CapabilityRegistry;
use crate::config::Config;
use crate::error::{Result, RobovacError};
use crate::model::{DeviceConfig, DeviceEvent, DeviceId};
use crate::transport::{Broker, Connector, RelayConnector, TcpConnector};

/// Ways to reach one device
#[derive(Clone, Default)]
pub struct Connectors {
    /// Direct socket, tried first
    pub local: Option<Arc<dyn Connector>>,
    /// Broker relay, used after repeated local failures
    pub relay: Option<Arc<dyn Connector>>,
}

impl Connectors {
    /// Local connector only
    pub fn local(connector: Arc<dyn Connector>) -> Self {
        Self {
            local: Some(connector),
            relay: None,
        }
    }

    /// Relay connector only
    pub fn relayed(connector: Arc<dyn Connector>) -> Self {
        Self {
            local: None,
            relay: Some(connector),
        }
    }

    /// Add a relay fallback
    pub fn with_relay(mut self, connector: Arc<dyn Connector>) -> Self {
        self.relay = Some(connector);
        self
    }

    /// Whether no transport is configured
    pub fn is_empty(&self) -> bool {
        self.local.is_none() && self.relay.is_none()
    }
}

impl std::fmt::Debug for Connectors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connectors")
            .field("local", &self.local.as_ref().map(|c| c.describe()))
            .field("relay", &self.relay.as_ref().map(|c| c.describe()))
            .finish()
    }
}

struct DeviceEntry {
    session: DeviceSession,
    task: JoinHandle<()>,
}

/// Owns `DeviceId → DeviceSession` and the fleet-wide event stream
pub struct SessionManager {
    config: Arc<Config>,
    registry: Arc<CapabilityRegistry>,
    broker: Option<Arc<dyn Broker>>,
    devices: DashMap<DeviceId, DeviceEntry>,
    events: broadcast::Sender<Arc<DeviceEvent>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("devices", &self.devices.len())
            .field("relay", &self.broker.is_some())
            .finish()
    }
}

impl SessionManager {
    /// Manager with no devices
    pub fn new(config: Config, registry: Arc<CapabilityRegistry>) -> Self {
        let (events, _) = broadcast::channel(config.session.event_buffer.max(1));
        Self {
            config: Arc::new(config),
            registry,
            broker: None,
            devices: DashMap::new(),
            events,
            cancel: CancellationToken::new(),
        }
    }

    /// Use a broker for relayed sessions
    pub fn with_broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Capability registry shared by all sessions
    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Register a device and start its session using its configured
    /// address and, if enabled, the broker relay
    pub fn add_device(&self, device: DeviceConfig) -> Result<DeviceSession> {
        let mut connectors = Connectors::default();
        if let Some(addr) = &device.local_addr {
            connectors.local = Some(Arc::new(TcpConnector::new(
                addr.clone(),
                self.config.session.connect_timeout(),
            )));
        }
        if device.relay {
            if let Some(broker) = &self.broker {
                connectors.relay = Some(Arc::new(RelayConnector::new(
                    Arc::clone(broker),
                    device.id.clone(),
                )));
            }
        }
        self.add_device_with(device, connectors)
    }

    /// Register a device reached through the given connectors
    pub fn add_device_with(
        &self,
        device: DeviceConfig,
        connectors: Connectors,
    ) -> Result<DeviceSession> {
        if connectors.is_empty() {
            return Err(RobovacError::Config(format!(
                "Device {} has no local address and no relay",
                device.id
            )));
        }
        let key = device.key_material()?;
        if self.cancel.is_cancelled() {
            return Err(RobovacError::Config("Session manager is shut down".to_string()));
        }

        match self.devices.entry(device.id.clone()) {
            Entry::Occupied(_) => Err(RobovacError::Config(format!(
                "Device {} is already registered",
                device.id
            ))),
            Entry::Vacant(slot) => {
                tracing::info!(device = %device.id, name = device.display_name(), ?connectors, "Adding device");
                let shared = Arc::new(DeviceShared::new(
                    device,
                    Arc::clone(&self.registry),
                    self.events.clone(),
                    self.cancel.child_token(),
                    self.config.codec.max_map_size,
                ));
                let runner = Runner::new(
                    Arc::clone(&shared),
                    connectors,
                    Arc::clone(&self.config),
                    key,
                );
                let task = tokio::spawn(runner.run());
                let session = DeviceSession::new(shared);
                slot.insert(DeviceEntry {
                    session: session.clone(),
                    task,
                });
                Ok(session)
            }
        }
    }

    /// Stop a device's session and forget it
    pub async fn remove_device(&self, id: &DeviceId) -> Result<()> {
        let (_, entry) = self
            .devices
            .remove(id)
            .ok_or_else(|| RobovacError::UnknownDevice(id.to_string()))?;
        Self::stop(entry).await;
        self.registry.invalidate(id);
        tracing::info!(device = %id, "Removed device");
        Ok(())
    }

    async fn stop(entry: DeviceEntry) {
        entry.session.shared().cancel.cancel();
        if let Err(e) = entry.task.await {
            tracing::warn!(device = %entry.session.id(), error = %e, "Session task failed");
        }
        entry.session.shared().set_state(SessionState::Stopped);
    }

    /// Handle for a registered device
    pub fn device(&self, id: &DeviceId) -> Result<DeviceSession> {
        self.devices
            .get(id)
            .map(|entry| entry.session.clone())
            .ok_or_else(|| RobovacError::UnknownDevice(id.to_string()))
    }

    /// All registered devices, ordered by id
    pub fn devices(&self) -> Vec<DeviceSession> {
        let mut sessions: Vec<DeviceSession> = self
            .devices
            .iter()
            .map(|entry| entry.session.clone())
            .collect();
        sessions.sort_by(|a, b| a.id().cmp(b.id()));
        sessions
    }

    /// Fleet-wide event stream
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DeviceEvent>> {
        self.events.subscribe()
    }

    /// Stop every session. New devices are refused afterwards.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let ids: Vec<DeviceId> = self.devices.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            if let Some((_, entry)) = self.devices.remove(&id) {
                Self::stop(entry).await;
            }
        }
        tracing::info!("Session manager shut down");
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::DuplexConnector;

    fn manager() -> SessionManager {
        SessionManager::new(
            Config::default(),
            Arc::new(CapabilityRegistry::builtin().unwrap()),
        )
    }

    #[tokio::test]
    async fn test_device_without_transport_rejected() {
        let manager = manager();
        let err = manager
            .add_device(DeviceConfig::new("d1", "aB3dE5gH7jK9mN1p"))
            .unwrap_err();
        assert!(matches!(err, RobovacError::Config(_)));
    }

    #[tokio::test]
    async fn test_duplicate_and_unknown_devices() {
        let manager = manager();
        let (connector, _listener) = DuplexConnector::pair(1024);
        let connector: Arc<dyn Connector> = Arc::new(connector);
        let device = DeviceConfig::new("d1", "aB3dE5gH7jK9mN1p");

        manager
            .add_device_with(device.clone(), Connectors::local(Arc::clone(&connector)))
            .unwrap();
        assert!(manager
            .add_device_with(device, Connectors::local(connector))
            .is_err());
        assert_eq!(manager.devices().len(), 1);

        assert!(matches!(
            manager.device(&DeviceId::from("nope")),
            Err(RobovacError::UnknownDevice(_))
        ));
        assert!(manager.remove_device(&DeviceId::from("nope")).await.is_err());
    }

    #[tokio::test]
    async fn test_remove_device_stops_session() {
        let manager = manager();
        let (connector, _listener) = DuplexConnector::pair(1024);
        let session = manager
            .add_device_with(
                DeviceConfig::new("d1", "aB3dE5gH7jK9mN1p"),
                Connectors::local(Arc::new(connector)),
            )
            .unwrap();

        manager.remove_device(session.id()).await.unwrap();
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(manager.devices().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_devices() {
        let manager = manager();
        manager.shutdown().await;
        let (connector, _listener) = DuplexConnector::pair(1024);
        assert!(manager
            .add_device_with(
                DeviceConfig::new("d1", "aB3dE5gH7jK9mN1p"),
                Connectors::local(Arc::new(connector)),
            )
            .is_err());
    }
}
