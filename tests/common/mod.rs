//! In-process vacuum simulator for end-to-end tests.
//!
//! Speaks the device side of the protocol over any [`Channel`]: answers the
//! handshake, replies to requests from a scripted state, streams maps as
//! chunks and answers heartbeats. Behaviour can be changed while a session
//! is running.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use robovac::codec::crypto::KeyMaterial;
use robovac::codec::{FrameCodec, FrameKind, FrameSealer, MapChunk, RawFrame, SealOptions};
use robovac::config::Config;
use robovac::map::{BoundingBox, MapBuilder};
use robovac::capability::CapabilityRegistry;
use robovac::model::{DeviceConfig, DeviceId, DeviceIdentity, DeviceStatus, StateCode};
use robovac::session::{Connectors, DeviceSession, SessionManager};
use robovac::Fleet;
use robovac::protocol::{
    events, EventMessage, Hello, HelloReject, RejectionCode, Request, Response,
};
use robovac::transport::{Broker, Channel, DuplexConnector, DuplexListener, RelayConnector};
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder};

/// Local key shared by the simulator and the client
pub const LOCAL_KEY: &str = "aB3dE5gH7jK9mN1p";

/// Client configuration with timings short enough for tests
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.session.connect_timeout_ms = 500;
    config.session.handshake_timeout_ms = 500;
    config.session.heartbeat_interval_ms = 200;
    config.session.heartbeat_timeout_ms = 600;
    config.reconnect.initial_delay_ms = 10;
    config.reconnect.max_delay_ms = 50;
    config.reconnect.local_failover_threshold = 2;
    config.dispatch.command_timeout_ms = 300;
    config.dispatch.ack_timeout_ms = 300;
    config.dispatch.max_retries = 2;
    config.dispatch.confirm_timeout_ms = 1_000;
    config
}

/// Device config matching a simulator id
pub fn device_config(id: &str) -> DeviceConfig {
    DeviceConfig::new(id, LOCAL_KEY)
}

/// Map with a kitchen, hallway and bedroom in a row
pub fn three_room_map(generation: u32) -> Vec<u8> {
    MapBuilder::new(1, generation)
        .room(16, "", BoundingBox::new(0, 0, 4000, 3000))
        .room(17, "", BoundingBox::new(4000, 0, 6000, 3000))
        .room(18, "", BoundingBox::new(6000, 0, 10000, 3000))
        .charger(5000, 100)
        .build()
        .unwrap()
}

/// Map with two rooms, as after a remap
pub fn two_room_map(generation: u32) -> Vec<u8> {
    MapBuilder::new(1, generation)
        .room(20, "", BoundingBox::new(0, 0, 5000, 5000))
        .room(21, "", BoundingBox::new(5000, 0, 9000, 5000))
        .build()
        .unwrap()
}

/// Poll `check` until it holds, panicking after five seconds
pub async fn wait_until(what: &str, check: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

/// A fleet with one simulated device on an in-process local socket
pub struct Harness {
    /// The simulated device
    pub sim: Arc<Simulator>,
    /// Device id
    pub id: DeviceId,
    /// Fleet facade over `manager`
    pub fleet: Fleet,
    /// Session manager
    pub manager: Arc<SessionManager>,
    /// Session handle for the device
    pub session: DeviceSession,
    /// Local connector, to make the device unreachable
    pub connector: Arc<DuplexConnector>,
}

impl Harness {
    /// Register the simulator with a new manager; does not wait for a session
    pub fn start(sim: &Arc<Simulator>, config: Config) -> Self {
        let registry = Arc::new(CapabilityRegistry::builtin().unwrap());
        let manager = Arc::new(SessionManager::new(config, registry));
        let (connector, listener) = DuplexConnector::pair(64 * 1024);
        let connector = Arc::new(connector);
        sim.serve_local(listener);

        let id = sim.id();
        let session = manager
            .add_device_with(
                device_config(id.as_str()),
                Connectors::local(Arc::clone(&connector) as Arc<dyn robovac::transport::Connector>),
            )
            .unwrap();
        Self {
            sim: Arc::clone(sim),
            id,
            fleet: Fleet::new(Arc::clone(&manager)),
            manager,
            session,
            connector,
        }
    }

    /// Start and wait for the session and its first status
    pub async fn connected(sim: &Arc<Simulator>, config: Config) -> Self {
        let harness = Self::start(sim, config);
        harness
            .session
            .wait_connected(Duration::from_secs(5))
            .await
            .unwrap();
        let session = harness.session.clone();
        wait_until("initial status", move || session.status().is_some()).await;
        harness
    }

    /// Wait until the room names from the mapping are applied
    pub async fn wait_for_rooms(&self, name: &str) {
        let session = self.session.clone();
        let name = name.to_string();
        wait_until("room names", move || session.room_graph().room_by_name(&name).is_some()).await;
    }
}

/// Scripted device state
#[derive(Debug, Clone)]
pub struct Behavior {
    /// Current status
    pub status: DeviceStatus,
    /// Map payload served for `get_map_v1`
    pub map: Option<Vec<u8>>,
    /// `get_room_mapping` result
    pub room_mapping: Value,
    /// Methods received but never answered
    pub dropped: HashSet<String>,
    /// State entered after a method is acknowledged
    pub transitions: HashMap<String, StateCode>,
    /// Push a status event after each transition
    pub push_status: bool,
    /// Answer heartbeats
    pub answer_pings: bool,
    /// Refuse handshakes
    pub reject_handshake: bool,
    /// Acknowledge `get_map_v1` first and stream the map after this delay
    pub map_delay: Option<Duration>,
}

impl Default for Behavior {
    fn default() -> Self {
        let transitions = [
            ("app_start", StateCode::Cleaning),
            ("app_stop", StateCode::Idle),
            ("app_pause", StateCode::Paused),
            ("app_charge", StateCode::ReturningHome),
            ("app_spot", StateCode::SpotCleaning),
            ("app_zoned_clean", StateCode::ZonedCleaning),
            ("app_segment_clean", StateCode::SegmentCleaning),
            ("app_goto_target", StateCode::GoingToTarget),
        ]
        .into_iter()
        .map(|(method, state)| (method.to_string(), state))
        .collect();

        let mut status = DeviceStatus::with_state(StateCode::Charging);
        status.battery = 100;

        Self {
            status,
            map: Some(three_room_map(1)),
            room_mapping: json!([[16, "Kitchen"], [17, "Hallway"], [18, "Bedroom"]]),
            dropped: HashSet::new(),
            transitions,
            push_status: true,
            answer_pings: true,
            reject_handshake: false,
            map_delay: None,
        }
    }
}

/// A simulated vacuum
pub struct Simulator {
    identity: DeviceIdentity,
    key: KeyMaterial,
    behavior: Mutex<Behavior>,
    requests: Mutex<Vec<Request>>,
    connections: AtomicUsize,
    kick: watch::Sender<u64>,
}

impl Simulator {
    /// Simulator for a model/firmware with default behaviour
    pub fn new(id: &str, model: &str, firmware: &str) -> Arc<Self> {
        Self::with_identity(DeviceIdentity::new(id, model, firmware))
    }

    /// Simulator announcing a full identity
    pub fn with_identity(identity: DeviceIdentity) -> Arc<Self> {
        Arc::new(Self {
            identity,
            key: KeyMaterial::from_local_key(LOCAL_KEY).unwrap(),
            behavior: Mutex::new(Behavior::default()),
            requests: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
            kick: watch::channel(0).0,
        })
    }

    /// Device id announced in the handshake
    pub fn id(&self) -> DeviceId {
        self.identity.duid.clone()
    }

    /// Change behaviour
    pub fn update(&self, f: impl FnOnce(&mut Behavior)) {
        f(&mut self.behavior.lock().unwrap());
    }

    /// Current behaviour
    pub fn behavior(&self) -> Behavior {
        self.behavior.lock().unwrap().clone()
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests received for one method
    pub fn requests_for(&self, method: &str) -> Vec<Request> {
        self.requests()
            .into_iter()
            .filter(|request| request.method == method)
            .collect()
    }

    /// Wait until `count` requests for `method` have arrived
    pub async fn wait_for_requests(&self, method: &str, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.requests_for(method).len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("never received {count} {method} request(s)"));
    }

    /// Sessions that completed a handshake
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Wait until `count` sessions have been established
    pub async fn wait_for_connections(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.connections() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("never reached {count} connection(s)"));
    }

    /// Drop the current connection without a Close frame
    pub fn disconnect(&self) {
        self.kick.send_modify(|kicks| *kicks += 1);
    }

    /// Accept local connections until the connector is dropped
    pub fn serve_local(self: &Arc<Self>, mut listener: DuplexListener) -> JoinHandle<()> {
        let sim = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(channel) = listener.accept().await {
                let sim = Arc::clone(&sim);
                tokio::spawn(async move { sim.serve(Box::new(channel)).await });
            }
        })
    }

    /// Serve one session over the broker relay
    pub fn serve_relay(self: &Arc<Self>, broker: Arc<dyn Broker>) -> JoinHandle<()> {
        let sim = Arc::clone(self);
        tokio::spawn(async move {
            let endpoint = RelayConnector::device_endpoint(broker, &sim.identity.duid)
                .await
                .unwrap();
            sim.serve(Box::new(endpoint)).await;
        })
    }

    async fn serve(&self, mut channel: Box<dyn Channel>) {
        let mut kicked = self.kick.subscribe();
        let mut conn = Connection {
            codec: FrameCodec::new(1 << 20),
            buffer: BytesMut::new(),
            sealer: FrameSealer::handshake(&self.key, SealOptions::default()).unwrap(),
        };

        loop {
            let raw = tokio::select! {
                _ = kicked.changed() => break,
                raw = conn.next_frame(channel.as_mut()) => match raw {
                    Some(raw) => raw,
                    None => break,
                },
            };
            let Ok(frame) = conn.sealer.open(raw) else {
                continue;
            };
            let keep_going = match frame.kind {
                FrameKind::Hello => self.on_hello(&mut conn, channel.as_mut(), frame.json().unwrap()).await,
                FrameKind::Request => self.on_request(&mut conn, channel.as_mut(), frame.json().unwrap()).await,
                FrameKind::Ping => {
                    if self.behavior().answer_pings {
                        conn.send(channel.as_mut(), FrameKind::Pong, b"").await;
                    }
                    true
                }
                FrameKind::Close => false,
                _ => true,
            };
            if !keep_going {
                break;
            }
        }
        channel.close().await;
    }

    async fn on_hello(&self, conn: &mut Connection, channel: &mut dyn Channel, hello: Hello) -> bool {
        if self.behavior().reject_handshake {
            let reject = HelloReject {
                code: RejectionCode::Busy,
                reason: "too many clients".to_string(),
            };
            conn.send_json(channel, FrameKind::HelloReject, &reject).await;
            return false;
        }
        let handshake = robovac::protocol::DeviceHandshake::new(self.key.clone(), self.identity.clone());
        let (ack, session_key) = handshake.accept(&hello).unwrap();
        conn.send_json(channel, FrameKind::HelloAck, &ack).await;
        conn.sealer.upgrade(&session_key).unwrap();
        self.connections.fetch_add(1, Ordering::SeqCst);
        true
    }

    async fn on_request(&self, conn: &mut Connection, channel: &mut dyn Channel, request: Request) -> bool {
        self.requests.lock().unwrap().push(request.clone());
        let behavior = self.behavior();
        if behavior.dropped.contains(&request.method) {
            return true;
        }

        let response = match request.method.as_str() {
            "get_status" => Response::ok(request.id, json!([behavior.status])),
            "get_consumable" => Response::ok(
                request.id,
                json!([{
                    "main_brush_work_time": 1_000_000,
                    "side_brush_work_time": 719_000,
                    "filter_work_time": 540_000,
                    "sensor_dirty_time": 100_000,
                }]),
            ),
            "get_room_mapping" => Response::ok(request.id, behavior.room_mapping.clone()),
            "get_map_v1" => match &behavior.map {
                Some(_) if behavior.map_delay.is_some() => Response::ok(request.id, json!(["ok"])),
                Some(map) => {
                    for chunk in MapChunk::split(request.id, map, 256).unwrap() {
                        conn.send(channel, FrameKind::MapChunk, &chunk.encode()).await;
                    }
                    Response::ok(request.id, json!(["ok"]))
                }
                None => Response::error(request.id, -1, "no map"),
            },
            _ => Response::ok(request.id, json!(["ok"])),
        };
        conn.send_json(channel, FrameKind::Response, &response).await;

        if let (Some(delay), Some(map), "get_map_v1") =
            (behavior.map_delay, &behavior.map, request.method.as_str())
        {
            tokio::time::sleep(delay).await;
            for chunk in MapChunk::split(request.id, map, 256).unwrap() {
                conn.send(channel, FrameKind::MapChunk, &chunk.encode()).await;
            }
        }

        if let Some(state) = behavior.transitions.get(&request.method) {
            let status = {
                let mut current = self.behavior.lock().unwrap();
                current.status.state = *state;
                current.status.clone()
            };
            if behavior.push_status {
                let event = EventMessage {
                    event: events::STATUS.to_string(),
                    data: json!([status]),
                };
                conn.send_json(channel, FrameKind::Event, &event).await;
            }
        }
        true
    }
}

/// Per-connection framing and sealing state
struct Connection {
    codec: FrameCodec,
    buffer: BytesMut,
    sealer: FrameSealer,
}

impl Connection {
    async fn next_frame(&mut self, channel: &mut dyn Channel) -> Option<RawFrame> {
        loop {
            match self.codec.decode(&mut self.buffer) {
                Ok(Some(frame)) => return Some(frame),
                Ok(None) => {}
                Err(_) => continue,
            }
            match channel.recv().await {
                Some(Ok(bytes)) => self.buffer.extend_from_slice(&bytes),
                _ => return None,
            }
        }
    }

    async fn send(&mut self, channel: &mut dyn Channel, kind: FrameKind, payload: &[u8]) {
        let frame = self.sealer.seal(kind, payload).unwrap();
        self.write(channel, frame).await;
    }

    async fn send_json<T: serde::Serialize>(&mut self, channel: &mut dyn Channel, kind: FrameKind, value: &T) {
        let frame = self.sealer.seal_json(kind, value).unwrap();
        self.write(channel, frame).await;
    }

    async fn write(&mut self, channel: &mut dyn Channel, frame: RawFrame) {
        let mut out = BytesMut::new();
        self.codec.encode(frame, &mut out).unwrap();
        let _ = channel.send(out.freeze()).await;
    }
}
