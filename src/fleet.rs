//! Fleet facade: one entry point over sessions, dispatch and maps.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::capability::{CapabilityRegistry, CapabilitySet};
use crate::config::Config;
use crate::dispatch::{Command, Dispatcher, Outcome, Zone};
use crate::error::{Result, RobovacError};
use crate::map::{Point, RoomGraph, RoomId, RoomSelection};
use crate::model::{Consumables, DeviceEvent, DeviceId, DeviceStatus, StateCode};
use crate::session::{DeviceSession, SessionManager};
use crate::transport::Broker;

/// A fleet of vacuums
#[derive(Debug, Clone)]
pub struct Fleet {
    manager: Arc<SessionManager>,
    dispatcher: Dispatcher,
}

impl Fleet {
    /// Fleet over an existing manager
    pub fn new(manager: Arc<SessionManager>) -> Self {
        let dispatcher = Dispatcher::new(Arc::clone(&manager));
        Self {
            manager,
            dispatcher,
        }
    }

    /// Build the manager from configuration and start every configured device
    pub fn from_config(config: Config, broker: Option<Arc<dyn Broker>>) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(CapabilityRegistry::from_config(&config.capabilities)?);
        let devices = config.devices.clone();
        let mut manager = SessionManager::new(config, registry);
        if let Some(broker) = broker {
            manager = manager.with_broker(broker);
        }
        for device in devices {
            manager.add_device(device)?;
        }
        tracing::info!(devices = manager.devices().len(), "Fleet started");
        Ok(Self::new(Arc::new(manager)))
    }

    /// Session manager
    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Command dispatcher
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Session handle for a device
    pub fn device(&self, device: &DeviceId) -> Result<DeviceSession> {
        self.manager.device(device)
    }

    /// Events from every device
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DeviceEvent>> {
        self.manager.subscribe()
    }

    /// Send a method by wire name
    pub async fn issue(&self, device: &DeviceId, method: &str, params: Value) -> Result<Value> {
        self.dispatcher
            .issue(device, Command::named(method, params))
            .await
    }

    /// Resolved capabilities; known once the first session is up
    pub fn capabilities(&self, device: &DeviceId) -> Result<Arc<CapabilitySet>> {
        self.device(device)?
            .capabilities()
            .ok_or_else(|| RobovacError::NotConnected(device.to_string()))
    }

    /// Last known good room graph
    pub fn room_graph(&self, device: &DeviceId) -> Result<Arc<RoomGraph>> {
        Ok(self.device(device)?.room_graph())
    }

    /// Status fetched from the device now
    pub async fn status(&self, device: &DeviceId) -> Result<DeviceStatus> {
        self.dispatcher.fetch_status(device).await
    }

    /// Start a full clean and wait for the device to report cleaning
    pub async fn start_cleaning(&self, device: &DeviceId) -> Result<Outcome> {
        self.dispatcher.confirm(device, Command::start()).await
    }

    /// Clean rooms by name, if the device is ready for it
    pub async fn clean_rooms<S: AsRef<str>>(
        &self,
        device: &DeviceId,
        names: &[S],
        repeat: u8,
    ) -> Result<Outcome> {
        let status = self.status(device).await?;
        if !status.can_start_room_clean() {
            return Err(RobovacError::InvalidCommand(format!(
                "Device {device} cannot start a room clean while {:?} (error {})",
                status.state, status.error_code
            )));
        }
        let selection = self.room_graph(device)?.select_by_names(names)?;
        self.clean_selection(device, selection, repeat).await
    }

    /// Clean a room selection taken from the room graph
    pub async fn clean_selection(
        &self,
        device: &DeviceId,
        selection: RoomSelection,
        repeat: u8,
    ) -> Result<Outcome> {
        tracing::info!(device = %device, rooms = ?selection.segment_ids(), generation = selection.generation, "Cleaning rooms");
        self.dispatcher
            .confirm(device, Command::segment_clean(selection, repeat)?)
            .await
    }

    /// Clean rectangular zones
    pub async fn clean_zone(&self, device: &DeviceId, zones: &[Zone]) -> Result<Outcome> {
        self.dispatcher
            .confirm(device, Command::zoned_clean(zones)?)
            .await
    }

    /// Drive to a point, then spot clean once it arrives
    pub async fn goto_and_spot(
        &self,
        device: &DeviceId,
        target: Point,
        travel_timeout: Duration,
    ) -> Result<Outcome> {
        self.dispatcher
            .confirm(device, Command::goto_target(target))
            .await?;
        let arrived = self
            .dispatcher
            .wait_for_status(
                device,
                |status| status.state != StateCode::GoingToTarget,
                travel_timeout,
            )
            .await?;
        if arrived.has_error() {
            return Err(RobovacError::DeviceRejected {
                code: arrived.error_code,
                message: format!("Stopped on the way to {}, {}", target.x, target.y),
            });
        }
        self.dispatcher.confirm(device, Command::spot()).await
    }

    /// Rename a room on the device and in the local graph
    pub async fn rename_room(&self, device: &DeviceId, room: RoomId, name: &str) -> Result<()> {
        let session = self.device(device)?;
        if session.room_graph().room(room).is_none() {
            return Err(RobovacError::UnknownRoom(room.to_string()));
        }
        self.dispatcher
            .issue_on(&session, &Command::name_segment(room, name)?)
            .await?;
        session
            .shared()
            .apply_room_names(vec![(room, name.trim().to_string())]);
        Ok(())
    }

    /// Discard the device's map; a new generation follows once it remaps
    pub async fn reset_map(&self, device: &DeviceId) -> Result<()> {
        self.dispatcher.issue(device, Command::reset_map()).await?;
        tracing::info!(device = %device, "Map reset requested");
        Ok(())
    }

    /// Download the map and room names again.
    ///
    /// The device acknowledges `get_map` and streams the map separately;
    /// this waits for the payload to be processed, up to the map transfer
    /// timeout. A map that fails to parse leaves the previous graph in
    /// place; the returned graph is whatever is current afterwards.
    pub async fn refresh_map(&self, device: &DeviceId) -> Result<Arc<RoomGraph>> {
        let session = self.device(device)?;
        let mut loads = session.shared().map_loads.subscribe();
        self.dispatcher.issue_on(&session, &Command::get_map()).await?;
        let limit = self.manager.config().codec.map_transfer_timeout();
        match tokio::time::timeout(limit, loads.changed()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(RobovacError::Disconnected),
            Err(_) => {
                tracing::warn!(device = %device, ?limit, "Map not received after get_map, keeping current graph");
            }
        }
        let capabilities = self.capabilities(device)?;
        if capabilities.supports(crate::capability::Capability::RoomNaming) {
            let mapping = self
                .dispatcher
                .issue_on(&session, &Command::get_room_mapping())
                .await?;
            session.shared().apply_room_mapping(&mapping);
        }
        Ok(session.room_graph())
    }

    /// Number of consumables due for replacement
    pub async fn maintenance_alerts(&self, device: &DeviceId) -> Result<usize> {
        let session = self.device(device)?;
        let value = self
            .dispatcher
            .issue_on(&session, &Command::get_consumables())
            .await?;
        let consumables = Consumables::from_value(&value)?;
        session.shared().apply_consumables(consumables);
        Ok(consumables.maintenance_alerts())
    }

    /// Stop every session
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }
}
