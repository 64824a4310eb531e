//! End-to-end session tests.
//!
//! A simulated vacuum on the other end of an in-process socket or broker
//! relay; these cover the session lifecycle beyond the unit test level.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fast_config, wait_until, Harness, Simulator};
use robovac::capability::{Capability, CapabilityRegistry};
use robovac::session::{Connectors, SessionManager, SessionState};
use robovac::transport::{Broker, Connector, DuplexConnector, MemoryBroker, RelayConnector};
use robovac::{EventKind, TransportKind};

/// Wait for the session to reach a state matching `check`
async fn wait_for_state(
    session: &robovac::DeviceSession,
    check: impl Fn(&SessionState) -> bool,
) -> SessionState {
    let mut states = session.watch_state();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let state = *states.borrow_and_update();
            if check(&state) {
                return state;
            }
            states.changed().await.unwrap();
        }
    })
    .await
    .expect("session never reached the expected state")
}

/// Test connecting over the local socket resolves identity and capabilities
#[tokio::test]
async fn test_connect_resolves_capabilities() {
    let sim = Simulator::new("vac-1", "roborock.vacuum.a15", "01.20.00");
    let harness = Harness::connected(&sim, fast_config()).await;

    assert_eq!(
        harness.session.state().transport(),
        Some(TransportKind::Local)
    );
    let identity = harness.session.identity().unwrap();
    assert_eq!(identity.model, "roborock.vacuum.a15");
    assert_eq!(identity.firmware, "01.20.00");

    let capabilities = harness.fleet.capabilities(&harness.id).unwrap();
    assert!(capabilities.supports(Capability::SegmentCleaning));
    assert!(capabilities.supports(Capability::MapRetrieval));
    assert_eq!(sim.connections(), 1);

    harness.fleet.shutdown().await;
}

/// Test the post-connect refresh pulls status and consumables
#[tokio::test]
async fn test_connect_refreshes_status_and_consumables() {
    let sim = Simulator::new("vac-1", "roborock.vacuum.a15", "01.20.00");
    let harness = Harness::connected(&sim, fast_config()).await;

    let status = harness.session.status().unwrap();
    assert_eq!(status.battery, 100);
    assert!(status.is_docked());

    let session = harness.session.clone();
    wait_until("consumables", move || session.consumables().is_some()).await;
    // Every simulated counter is within a day of its rated life
    let consumables = harness.session.consumables().unwrap();
    assert_eq!(consumables.maintenance_alerts(), 4);

    harness.fleet.shutdown().await;
}

/// Test a dropped connection is re-established without caller involvement
#[tokio::test]
async fn test_reconnects_after_connection_drop() {
    let sim = Simulator::new("vac-1", "roborock.vacuum.a15", "01.20.00");
    let harness = Harness::connected(&sim, fast_config()).await;
    let mut events = harness.fleet.subscribe();

    sim.disconnect();
    sim.wait_for_connections(2).await;
    wait_for_state(&harness.session, SessionState::is_connected).await;

    // The drop is visible to subscribers as a phase change
    let saw_disconnect = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.unwrap();
            if let EventKind::ConnectionChanged {
                state: SessionState::Disconnected,
            } = event.kind
            {
                return true;
            }
        }
    })
    .await
    .unwrap();
    assert!(saw_disconnect);

    harness.fleet.shutdown().await;
}

/// Test a reconnect requested while connecting does not drop the new session
#[tokio::test]
async fn test_reconnect_during_connect_keeps_new_session() {
    let sim = Simulator::new("vac-1", "roborock.vacuum.a15", "01.20.00");
    let harness = Harness::start(&sim, fast_config());
    harness.session.reconnect();

    wait_for_state(&harness.session, SessionState::is_connected).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(sim.connections(), 1);
    assert!(harness.session.state().is_connected());

    // A request made once connected still takes effect
    harness.session.reconnect();
    sim.wait_for_connections(2).await;

    harness.fleet.shutdown().await;
}

/// Test a device that rejects the handshake never reaches Connected
#[tokio::test]
async fn test_rejected_handshake_stops_after_max_attempts() {
    let sim = Simulator::new("vac-1", "roborock.vacuum.a15", "01.20.00");
    sim.update(|b| b.reject_handshake = true);

    let mut config = fast_config();
    config.reconnect.max_attempts = Some(2);
    let harness = Harness::start(&sim, config);

    wait_for_state(&harness.session, SessionState::is_stopped).await;
    assert_eq!(sim.connections(), 0);
    assert!(harness.session.capabilities().is_none());
    assert!(harness.session.link().is_err());
}

/// Test a silent device is detected by the heartbeat and reconnected
#[tokio::test]
async fn test_heartbeat_timeout_reconnects() {
    let sim = Simulator::new("vac-1", "roborock.vacuum.a15", "01.20.00");
    sim.update(|b| b.answer_pings = false);
    let harness = Harness::connected(&sim, fast_config()).await;

    // Heartbeat every 200ms, silence tolerated for 600ms
    sim.wait_for_connections(2).await;
    wait_for_state(&harness.session, SessionState::is_connected).await;

    harness.fleet.shutdown().await;
}

/// Test repeated local failures fail over to the broker relay
#[tokio::test]
async fn test_fails_over_to_relay() {
    let sim = Simulator::new("vac-1", "roborock.vacuum.a15", "01.20.00");
    let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
    sim.serve_relay(Arc::clone(&broker));

    let (local, listener) = DuplexConnector::pair(64 * 1024);
    local.set_available(false);
    sim.serve_local(listener);
    let relay = RelayConnector::new(Arc::clone(&broker), sim.id());

    let registry = Arc::new(CapabilityRegistry::builtin().unwrap());
    let manager = SessionManager::new(fast_config(), registry);
    let session = manager
        .add_device_with(
            common::device_config("vac-1"),
            Connectors::local(Arc::new(local) as Arc<dyn Connector>)
                .with_relay(Arc::new(relay) as Arc<dyn Connector>),
        )
        .unwrap();

    let state = wait_for_state(&session, SessionState::is_connected).await;
    assert_eq!(state.transport(), Some(TransportKind::Relayed));
    assert_eq!(sim.connections(), 1);

    manager.shutdown().await;
}

/// Test removing a device stops its session
#[tokio::test]
async fn test_remove_device_stops_session() {
    let sim = Simulator::new("vac-1", "roborock.vacuum.a15", "01.20.00");
    let harness = Harness::connected(&sim, fast_config()).await;

    harness.manager.remove_device(&harness.id).await.unwrap();

    assert!(harness.session.state().is_stopped());
    assert!(harness.manager.device(&harness.id).is_err());
    assert!(harness.manager.devices().is_empty());
}

/// Test the same device cannot be registered twice
#[tokio::test]
async fn test_duplicate_device_rejected() {
    let sim = Simulator::new("vac-1", "roborock.vacuum.a15", "01.20.00");
    let harness = Harness::start(&sim, fast_config());

    let (again, _listener) = DuplexConnector::pair(1024);
    let result = harness.manager.add_device_with(
        common::device_config("vac-1"),
        Connectors::local(Arc::new(again) as Arc<dyn Connector>),
    );
    assert!(result.is_err());

    harness.fleet.shutdown().await;
}
