//! Per-device shared state and its public handle.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use serde_json::Value;
use tokio::sync::{broadcast, watch, Notify};
use tokio_util::sync::CancellationToken;

use super::link::SessionLink;
use super::state::SessionState;
use crate::capability::{CapabilityRegistry, CapabilitySet};
use crate::error::{Result, RobovacError};
use crate::map::{room_names_from_mapping, room_names_from_object, MapChange, RoomGraph, RoomId, RoomModel};
use crate::model::{
    Consumables, DeviceConfig, DeviceEvent, DeviceId, DeviceIdentity, DeviceStatus, EventKind,
};
use crate::protocol::{events, EventMessage};

/// State shared between a device's session task and its handles
pub(crate) struct DeviceShared {
    pub(crate) config: DeviceConfig,
    pub(crate) state: watch::Sender<SessionState>,
    pub(crate) link: ArcSwapOption<SessionLink>,
    pub(crate) identity: ArcSwapOption<DeviceIdentity>,
    pub(crate) capabilities: ArcSwapOption<CapabilitySet>,
    pub(crate) status: ArcSwapOption<DeviceStatus>,
    pub(crate) consumables: ArcSwapOption<Consumables>,
    pub(crate) rooms: RoomModel,
    /// Count of map payloads processed, whatever the outcome
    pub(crate) map_loads: watch::Sender<u64>,
    pub(crate) events: broadcast::Sender<Arc<DeviceEvent>>,
    pub(crate) registry: Arc<CapabilityRegistry>,
    pub(crate) cancel: CancellationToken,
    pub(crate) reconnect: Notify,
}

impl DeviceShared {
    pub(crate) fn new(
        config: DeviceConfig,
        registry: Arc<CapabilityRegistry>,
        events: broadcast::Sender<Arc<DeviceEvent>>,
        cancel: CancellationToken,
        max_map_size: usize,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        let (map_loads, _) = watch::channel(0);
        Self {
            config,
            state,
            link: ArcSwapOption::empty(),
            identity: ArcSwapOption::empty(),
            capabilities: ArcSwapOption::empty(),
            status: ArcSwapOption::empty(),
            consumables: ArcSwapOption::empty(),
            rooms: RoomModel::new(max_map_size),
            map_loads,
            events,
            registry,
            cancel,
            reconnect: Notify::new(),
        }
    }

    pub(crate) fn id(&self) -> &DeviceId {
        &self.config.id
    }

    pub(crate) fn emit(&self, kind: EventKind) {
        tracing::trace!(device = %self.id(), event = kind.name(), "Emitting event");
        // No subscribers is fine
        let _ = self
            .events
            .send(Arc::new(DeviceEvent::now(self.id().clone(), kind)));
    }

    /// Publish a state; top-level transitions are also broadcast as events
    pub(crate) fn set_state(&self, new: SessionState) {
        let mut previous = None;
        self.state.send_if_modified(|current| {
            if *current == new {
                return false;
            }
            previous = Some(*current);
            *current = new;
            true
        });
        if let Some(old) = previous {
            if !old.same_phase(&new) {
                tracing::debug!(device = %self.id(), from = %old, to = %new, "Session state changed");
                self.emit(EventKind::ConnectionChanged { state: new });
            }
        }
    }

    pub(crate) fn apply_identity(&self, identity: DeviceIdentity) {
        let capabilities = self.registry.resolve(self.id(), &identity);
        let changed = self
            .capabilities
            .load_full()
            .is_none_or(|old| !Arc::ptr_eq(&old, &capabilities));

        let (model, firmware) = (identity.model.clone(), identity.firmware.clone());
        self.identity.store(Some(Arc::new(identity)));
        self.capabilities.store(Some(capabilities));
        if changed {
            tracing::info!(device = %self.id(), model = %model, firmware = %firmware, "Capabilities resolved");
            self.emit(EventKind::CapabilitiesChanged { model, firmware });
        }
    }

    pub(crate) fn apply_status(&self, status: DeviceStatus) {
        self.status.store(Some(Arc::new(status.clone())));
        self.emit(EventKind::StatusChanged { status });
    }

    pub(crate) fn apply_consumables(&self, consumables: Consumables) {
        self.consumables.store(Some(Arc::new(consumables)));
        self.emit(EventKind::ConsumablesChanged {
            consumables,
            alerts: consumables.maintenance_alerts(),
        });
    }

    /// Parse and install a reassembled map payload
    pub(crate) fn apply_map(&self, payload: &[u8]) {
        match self.rooms.apply(payload) {
            Ok((graph, MapChange::Unchanged)) => {
                tracing::trace!(device = %self.id(), generation = graph.generation(), "Map unchanged");
            }
            Ok((graph, change)) => {
                tracing::info!(
                    device = %self.id(),
                    generation = graph.generation(),
                    rooms = graph.len(),
                    ?change,
                    "Room graph updated"
                );
                self.emit_map(&graph);
            }
            Err(e) => {
                tracing::warn!(device = %self.id(), error = %e, "Rejected map payload, keeping previous graph");
                self.emit(EventKind::MapParseFailed {
                    reason: e.to_string(),
                });
            }
        }
        self.map_loads.send_modify(|loads| *loads += 1);
    }

    /// Merge a `get_room_mapping` result into the room graph
    pub(crate) fn apply_room_mapping(&self, value: &Value) {
        self.apply_room_names(room_names_from_mapping(value));
    }

    pub(crate) fn apply_room_names(&self, names: Vec<(RoomId, String)>) {
        if names.is_empty() {
            return;
        }
        let graph = self.rooms.set_names(names);
        self.emit_map(&graph);
    }

    fn emit_map(&self, graph: &RoomGraph) {
        self.emit(EventKind::MapUpdated {
            generation: graph.generation(),
            rooms: graph.len(),
        });
    }

    /// Route an unsolicited device push
    pub(crate) fn apply_event(&self, message: EventMessage) {
        match message.event.as_str() {
            events::STATUS => match DeviceStatus::from_value(&message.data) {
                Ok(status) => self.apply_status(status),
                Err(e) => tracing::warn!(device = %self.id(), error = %e, "Ignoring status push"),
            },
            events::CONSUMABLES => match Consumables::from_value(&message.data) {
                Ok(consumables) => self.apply_consumables(consumables),
                Err(e) => tracing::warn!(device = %self.id(), error = %e, "Ignoring consumables push"),
            },
            events::ERROR => {
                let code = message.data["code"].as_i64().unwrap_or_default();
                let text = message.data["message"].as_str().unwrap_or_default().to_string();
                tracing::warn!(device = %self.id(), code, message = %text, "Device reported error");
                self.emit(EventKind::DeviceError {
                    code,
                    message: text,
                });
            }
            events::ROOM_NAMES => self.apply_room_names(room_names_from_object(&message.data)),
            _ => self.emit(EventKind::Other {
                name: message.event,
                data: message.data,
            }),
        }
    }
}

/// Handle to one managed device. Cheap to clone.
#[derive(Clone)]
pub struct DeviceSession {
    shared: Arc<DeviceShared>,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("id", self.id())
            .field("state", &self.state())
            .finish()
    }
}

impl DeviceSession {
    pub(crate) fn new(shared: Arc<DeviceShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<DeviceShared> {
        &self.shared
    }

    /// Device id
    pub fn id(&self) -> &DeviceId {
        self.shared.id()
    }

    /// Device configuration
    pub fn config(&self) -> &DeviceConfig {
        &self.shared.config
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Receiver notified on every state change
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Wait until the session is connected.
    ///
    /// Fails with `NotConnected` on timeout or if the session stops.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<()> {
        let mut state = self.watch_state();
        let connected = match tokio::time::timeout(
            timeout,
            state.wait_for(|s| s.is_connected() || s.is_stopped()),
        )
        .await
        {
            Ok(Ok(current)) => current.is_connected(),
            _ => false,
        };
        if connected {
            Ok(())
        } else {
            Err(RobovacError::NotConnected(self.id().to_string()))
        }
    }

    /// Identity learned at the last handshake
    pub fn identity(&self) -> Option<Arc<DeviceIdentity>> {
        self.shared.identity.load_full()
    }

    /// Effective capabilities, once a handshake has completed
    pub fn capabilities(&self) -> Option<Arc<CapabilitySet>> {
        self.shared.capabilities.load_full()
    }

    /// Last good room graph (empty before the first map)
    pub fn room_graph(&self) -> Arc<RoomGraph> {
        self.shared.rooms.graph()
    }

    /// Room model of this device
    pub fn room_model(&self) -> &RoomModel {
        &self.shared.rooms
    }

    /// Last known status
    pub fn status(&self) -> Option<Arc<DeviceStatus>> {
        self.shared.status.load_full()
    }

    /// Last known consumable counters
    pub fn consumables(&self) -> Option<Arc<Consumables>> {
        self.shared.consumables.load_full()
    }

    /// Drop the current session (or skip the backoff wait) and reconnect now.
    /// A request made while a connection is being set up is satisfied by it.
    pub fn reconnect(&self) {
        tracing::info!(device = %self.id(), "Reconnect requested");
        self.shared.reconnect.notify_one();
    }

    /// Live session, or `NotConnected`
    pub fn link(&self) -> Result<Arc<SessionLink>> {
        self.shared
            .link
            .load_full()
            .filter(|link| !link.is_closed())
            .ok_or_else(|| RobovacError::NotConnected(self.id().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StateCode;
    use crate::transport::TransportKind;
    use serde_json::json;

    fn shared() -> (Arc<DeviceShared>, broadcast::Receiver<Arc<DeviceEvent>>) {
        let (tx, rx) = broadcast::channel(32);
        let registry = Arc::new(CapabilityRegistry::builtin().unwrap());
        let shared = DeviceShared::new(
            DeviceConfig::new("d1", "aB3dE5gH7jK9mN1p"),
            registry,
            tx,
            CancellationToken::new(),
            1 << 20,
        );
        (Arc::new(shared), rx)
    }

    #[test]
    fn test_state_events_only_on_phase_change() {
        let (shared, mut rx) = shared();
        let connected = SessionState::Connected {
            transport: TransportKind::Local,
            heartbeat: crate::session::Heartbeat::Idle,
        };
        shared.set_state(connected);
        shared.set_state(SessionState::Connected {
            transport: TransportKind::Local,
            heartbeat: crate::session::Heartbeat::AwaitingHeartbeat,
        });
        shared.set_state(SessionState::Disconnected);

        let first = rx.try_recv().unwrap();
        assert!(matches!(first.kind, EventKind::ConnectionChanged { state } if state == connected));
        let second = rx.try_recv().unwrap();
        assert!(matches!(
            second.kind,
            EventKind::ConnectionChanged {
                state: SessionState::Disconnected
            }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_status_and_error_events() {
        let (shared, mut rx) = shared();
        shared.apply_event(EventMessage {
            event: events::STATUS.into(),
            data: json!({"state": 5, "battery": 80}),
        });
        assert_eq!(shared.status.load_full().unwrap().state, StateCode::Cleaning);
        assert!(matches!(rx.try_recv().unwrap().kind, EventKind::StatusChanged { .. }));

        shared.apply_event(EventMessage {
            event: events::ERROR.into(),
            data: json!({"code": 8, "message": "Side brush jammed"}),
        });
        assert!(matches!(
            &rx.try_recv().unwrap().kind,
            EventKind::DeviceError { code: 8, message } if message == "Side brush jammed"
        ));

        shared.apply_event(EventMessage {
            event: "dock_event".into(),
            data: json!(1),
        });
        assert_eq!(rx.try_recv().unwrap().kind.name(), "dock_event");
    }

    #[test]
    fn test_bad_map_emits_failure() {
        let (shared, mut rx) = shared();
        shared.apply_map(b"garbage");
        assert!(matches!(rx.try_recv().unwrap().kind, EventKind::MapParseFailed { .. }));
        assert!(shared.rooms.graph().is_empty());
    }

    #[test]
    fn test_identity_resolves_capabilities_once() {
        let (shared, mut rx) = shared();
        let identity = DeviceIdentity::new("d1", "roborock.vacuum.a15", "02.15.00");
        shared.apply_identity(identity.clone());
        shared.apply_identity(identity);
        assert!(matches!(rx.try_recv().unwrap().kind, EventKind::CapabilitiesChanged { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_link_requires_session() {
        let (shared, _rx) = shared();
        let session = DeviceSession::new(shared);
        assert!(matches!(session.link(), Err(RobovacError::NotConnected(_))));
        assert!(session
            .wait_connected(Duration::from_millis(10))
            .await
            .is_err());
    }
}
