//! Session task: connect, handshake, run the I/O loop, reconnect.
//!
//! One task per device. It is the only code that writes to the channel and
//! the only code that completes pending requests.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::codec::{Decoder, Encoder};

use super::backoff::calculate_backoff;
use super::device::DeviceShared;
use super::link::{Outbound, PendingTable, SessionLink};
use super::manager::Connectors;
use super::state::{Heartbeat, SessionState};
use crate::capability::Capability;
use crate::codec::crypto::KeyMaterial;
use crate::codec::{
    DecodeFailureTracker, Frame, FrameCodec, FrameKind, FrameSealer, MapAssembler, MapChunk,
    RawFrame, SealOptions,
};
use crate::config::Config;
use crate::error::{Result, RobovacError};
use crate::model::{Consumables, DeviceId, DeviceIdentity, DeviceStatus};
use crate::protocol::{methods, ClientHandshake, Close, EventMessage, HelloReject, Response};
use crate::transport::{Channel, Connector, TransportKind};

/// Why an established session ended
#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionEnd {
    Cancelled,
    Closed,
    HeartbeatTimeout,
    ReconnectRequested,
    Desync(String),
    Transport(String),
}

impl SessionEnd {
    fn reason(&self) -> String {
        match self {
            Self::Cancelled => "cancelled".to_string(),
            Self::Closed => "closed by peer".to_string(),
            Self::HeartbeatTimeout => "heartbeat timeout".to_string(),
            Self::ReconnectRequested => "reconnect requested".to_string(),
            Self::Desync(e) => format!("stream desynchronized: {e}"),
            Self::Transport(e) => format!("transport error: {e}"),
        }
    }
}

fn is_transport_error(err: &RobovacError) -> bool {
    matches!(err, RobovacError::Connection(_) | RobovacError::Io(_))
}

// ── Framed channel ──────────────────────────────────────────────────

/// A channel with frame decoding on the inbound side and a deadline on
/// every write
struct FramedChannel {
    channel: Box<dyn Channel>,
    codec: FrameCodec,
    buffer: BytesMut,
    closed: bool,
    write_timeout: Duration,
}

impl FramedChannel {
    fn new(channel: Box<dyn Channel>, max_frame_size: usize, write_timeout: Duration) -> Self {
        Self {
            channel,
            codec: FrameCodec::new(max_frame_size),
            buffer: BytesMut::new(),
            closed: false,
            write_timeout,
        }
    }

    fn kind(&self) -> TransportKind {
        self.channel.kind()
    }

    /// Next frame; `None` once the transport closed.
    ///
    /// Cancel-safe: bytes are moved into the buffer right after `recv`
    /// completes, with no await in between.
    async fn next_frame(&mut self) -> Option<Result<RawFrame>> {
        loop {
            match self.codec.decode(&mut self.buffer) {
                Ok(Some(frame)) => return Some(Ok(frame)),
                Ok(None) => {}
                Err(e) => return Some(Err(e)),
            }
            if self.closed {
                return None;
            }
            match self.channel.recv().await {
                Some(Ok(bytes)) => self.buffer.extend_from_slice(&bytes),
                Some(Err(e)) => return Some(Err(e)),
                None => self.closed = true,
            }
        }
    }

    async fn send(&mut self, frame: RawFrame) -> Result<()> {
        let mut out = BytesMut::with_capacity(frame.encoded_len());
        self.codec.encode(frame, &mut out)?;
        tokio::time::timeout(self.write_timeout, self.channel.send(out.freeze()))
            .await
            .map_err(|_| {
                RobovacError::Connection(format!(
                    "Write stalled for {}ms",
                    self.write_timeout.as_millis()
                ))
            })?
    }

    async fn close(&mut self) {
        self.channel.close().await;
    }
}

// ── Reconnect loop ──────────────────────────────────────────────────

pub(crate) struct Runner {
    shared: Arc<DeviceShared>,
    connectors: Connectors,
    config: Arc<Config>,
    key: KeyMaterial,
}

impl Runner {
    pub(crate) fn new(
        shared: Arc<DeviceShared>,
        connectors: Connectors,
        config: Arc<Config>,
        key: KeyMaterial,
    ) -> Self {
        Self {
            shared,
            connectors,
            config,
            key,
        }
    }

    fn device(&self) -> &DeviceId {
        self.shared.id()
    }

    fn connector(&self, relay: bool) -> Option<&Arc<dyn Connector>> {
        if relay {
            self.connectors.relay.as_ref().or(self.connectors.local.as_ref())
        } else {
            self.connectors.local.as_ref().or(self.connectors.relay.as_ref())
        }
    }

    /// Run until cancelled or out of attempts
    pub(crate) async fn run(self) {
        let cancel = self.shared.cancel.clone();
        let reconnect = &self.config.reconnect;
        let mut attempt: u32 = 0;
        let mut local_failures: u32 = 0;
        let mut use_relay = false;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let Some(connector) = self.connector(use_relay).cloned() else {
                tracing::error!(device = %self.device(), "No transport configured");
                break;
            };
            let transport = connector.kind();
            self.shared.set_state(SessionState::Connecting { transport });
            tracing::debug!(
                device = %self.device(),
                target = %connector.describe(),
                attempt,
                "Connecting"
            );

            let result = self.connect_and_run(connector.as_ref()).await;
            self.shared.set_state(SessionState::Disconnected);

            match result {
                Ok(SessionEnd::Cancelled) => break,
                Ok(end) => {
                    tracing::info!(
                        device = %self.device(),
                        %transport,
                        reason = %end.reason(),
                        "Session ended, reconnecting"
                    );
                    attempt = 0;
                    local_failures = 0;
                    // A finished relayed session re-probes the local socket
                    use_relay = false;
                }
                Err(e) => {
                    if transport == TransportKind::Local {
                        local_failures += 1;
                        if self.connectors.relay.is_some()
                            && local_failures >= reconnect.local_failover_threshold
                        {
                            if !use_relay {
                                tracing::info!(
                                    device = %self.device(),
                                    failures = local_failures,
                                    "Local connection unavailable, failing over to relay"
                                );
                            }
                            use_relay = true;
                        }
                    } else if self.connectors.local.is_some() {
                        // Alternate: one local probe before the next relay attempt
                        use_relay = false;
                        local_failures = reconnect.local_failover_threshold.saturating_sub(1);
                    }

                    if reconnect
                        .max_attempts
                        .is_some_and(|max| attempt.saturating_add(1) >= max)
                    {
                        tracing::error!(
                            device = %self.device(),
                            error = %e,
                            attempts = attempt + 1,
                            "Giving up on device"
                        );
                        break;
                    }

                    let delay = calculate_backoff(attempt, reconnect);
                    tracing::warn!(
                        device = %self.device(),
                        %transport,
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Connection failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        () = self.shared.reconnect.notified() => {}
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt = attempt.saturating_add(1);
                }
            }
        }

        self.shared.link.store(None);
        self.shared.set_state(SessionState::Stopped);
        tracing::debug!(device = %self.device(), "Session task stopped");
    }

    /// One session: errors before the handshake completes are `Err`,
    /// the end of an established session is `Ok`.
    async fn connect_and_run(&self, connector: &dyn Connector) -> Result<SessionEnd> {
        let session = &self.config.session;
        let channel = tokio::select! {
            biased;
            () = self.shared.cancel.cancelled() => return Ok(SessionEnd::Cancelled),
            opened = tokio::time::timeout(session.connect_timeout(), connector.open()) => {
                opened.map_err(|_| {
                    RobovacError::Connection(format!("Connect to {} timed out", connector.describe()))
                })??
            }
        };

        let mut framed = FramedChannel::new(
            channel,
            self.config.codec.max_frame_size,
            session.heartbeat_timeout(),
        );
        let result = self.establish(&mut framed).await;
        framed.close().await;
        result
    }

    async fn establish(&self, framed: &mut FramedChannel) -> Result<SessionEnd> {
        let session = &self.config.session;
        let mut sealer = FrameSealer::handshake(&self.key, SealOptions::from(&self.config.codec))?;
        let handshake = ClientHandshake::new(self.key.clone(), session.client_id.as_str());

        let (identity, session_key) = tokio::select! {
            biased;
            () = self.shared.cancel.cancelled() => return Ok(SessionEnd::Cancelled),
            done = tokio::time::timeout(
                session.handshake_timeout(),
                exchange_hello(framed, &mut sealer, handshake, self.device()),
            ) => done.map_err(|_| RobovacError::Handshake("Handshake timed out".to_string()))??,
        };
        sealer.upgrade(&session_key)?;
        self.shared.apply_identity(identity);

        let transport = framed.kind();
        let (tx, rx) = mpsc::channel(session.outbound_queue.max(1));
        let pending = Arc::new(PendingTable::new());
        let link = Arc::new(SessionLink::new(transport, tx, Arc::clone(&pending)));
        tracing::info!(
            device = %self.device(),
            session = %link.id(),
            %transport,
            "Session established"
        );
        // A reconnect asked for while connecting is satisfied by this session
        let _ = self.shared.reconnect.notified().now_or_never();
        self.shared.link.store(Some(Arc::clone(&link)));
        self.shared.set_state(SessionState::Connected {
            transport,
            heartbeat: Heartbeat::Idle,
        });

        let refresh = tokio::spawn(refresh_after_connect(
            Arc::clone(&self.shared),
            link,
            self.config.dispatch.command_timeout(),
        ));

        let end = self.io_loop(framed, &mut sealer, rx, &pending).await;

        refresh.abort();
        self.shared.link.store(None);
        let failed = pending.fail_all();
        if failed > 0 {
            tracing::debug!(device = %self.device(), failed, "Failed pending commands on disconnect");
        }
        Ok(end)
    }

    // ── I/O loop ────────────────────────────────────────────────────

    async fn io_loop(
        &self,
        framed: &mut FramedChannel,
        sealer: &mut FrameSealer,
        mut outbound: mpsc::Receiver<Outbound>,
        pending: &PendingTable,
    ) -> SessionEnd {
        let session = &self.config.session;
        let codec = &self.config.codec;
        let transport = framed.kind();
        let interval = session.heartbeat_interval();
        let mut heartbeat = tokio::time::interval_at(Instant::now() + interval, interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_inbound = Instant::now();
        let mut failures =
            DecodeFailureTracker::new(codec.decode_error_window(), codec.decode_error_threshold);
        let mut assembler = MapAssembler::new(codec.max_map_size, codec.map_transfer_timeout());

        loop {
            let silence_deadline = last_inbound + session.heartbeat_timeout();
            tokio::select! {
                biased;
                () = self.shared.cancel.cancelled() => {
                    let close = Close { reason: "client shutdown".to_string() };
                    if let Ok(frame) = sealer.seal_json(FrameKind::Close, &close) {
                        let _ = framed.send(frame).await;
                    }
                    return SessionEnd::Cancelled;
                }
                () = self.shared.reconnect.notified() => return SessionEnd::ReconnectRequested,
                _ = heartbeat.tick() => {
                    let sent = match sealer.seal(FrameKind::Ping, &[]) {
                        Ok(frame) => framed.send(frame).await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = sent {
                        return SessionEnd::Transport(e.to_string());
                    }
                    self.shared.set_state(SessionState::Connected {
                        transport,
                        heartbeat: Heartbeat::AwaitingHeartbeat,
                    });
                }
                inbound = framed.next_frame() => {
                    let raw = match inbound {
                        None => return SessionEnd::Closed,
                        Some(Ok(raw)) => raw,
                        Some(Err(e)) if e.is_desync() => return SessionEnd::Desync(e.to_string()),
                        Some(Err(e)) if is_transport_error(&e) => {
                            return SessionEnd::Transport(e.to_string())
                        }
                        Some(Err(e)) => {
                            if let Some(end) = self.decode_failed(&mut failures, &e) {
                                return end;
                            }
                            continue;
                        }
                    };
                    let frame = match sealer.open(raw) {
                        Ok(frame) => frame,
                        Err(e) => {
                            if let Some(end) = self.decode_failed(&mut failures, &e) {
                                return end;
                            }
                            continue;
                        }
                    };

                    last_inbound = Instant::now();
                    self.shared.set_state(SessionState::Connected {
                        transport,
                        heartbeat: Heartbeat::Idle,
                    });

                    match self.handle_frame(frame, framed, sealer, pending, &mut assembler).await {
                        Ok(None) => {}
                        Ok(Some(end)) => return end,
                        Err(e) if is_transport_error(&e) => {
                            return SessionEnd::Transport(e.to_string())
                        }
                        Err(e) => {
                            if let Some(end) = self.decode_failed(&mut failures, &e) {
                                return end;
                            }
                        }
                    }
                }
                () = tokio::time::sleep_until(silence_deadline) => {
                    tracing::warn!(
                        device = %self.device(),
                        timeout_ms = session.heartbeat_timeout_ms,
                        "No traffic from device"
                    );
                    return SessionEnd::HeartbeatTimeout;
                }
                Some(out) = outbound.recv() => {
                    let sent = match sealer.seal(out.kind, &out.payload) {
                        Ok(frame) => framed.send(frame).await,
                        Err(e) => Err(e),
                    };
                    match sent {
                        Ok(()) => {}
                        Err(e) if is_transport_error(&e) => {
                            return SessionEnd::Transport(e.to_string())
                        }
                        Err(e) => {
                            tracing::warn!(device = %self.device(), error = %e, "Dropping outbound frame");
                        }
                    }
                }
            }
        }
    }

    fn decode_failed(
        &self,
        failures: &mut DecodeFailureTracker,
        err: &RobovacError,
    ) -> Option<SessionEnd> {
        tracing::debug!(device = %self.device(), error = %err, "Dropping inbound frame");
        if failures.record_and_should_reset() {
            tracing::warn!(
                device = %self.device(),
                failures = failures.count(),
                "Too many decode failures, resetting session"
            );
            return Some(SessionEnd::Desync(err.to_string()));
        }
        None
    }

    async fn handle_frame(
        &self,
        frame: Frame,
        framed: &mut FramedChannel,
        sealer: &mut FrameSealer,
        pending: &PendingTable,
        assembler: &mut MapAssembler,
    ) -> Result<Option<SessionEnd>> {
        match frame.kind {
            FrameKind::Response => {
                let response: Response = frame.json()?;
                let id = response.id;
                if !pending.resolve(response) {
                    tracing::debug!(device = %self.device(), id, "Ignoring response with no pending command");
                }
            }
            FrameKind::Event => {
                let message: EventMessage = frame.json()?;
                self.shared.apply_event(message);
            }
            FrameKind::MapChunk => {
                let chunk = MapChunk::decode(&frame.payload)?;
                if let Some(payload) = assembler.push(chunk)? {
                    self.shared.apply_map(&payload);
                }
            }
            FrameKind::Ping => {
                let pong = sealer.seal(FrameKind::Pong, &[])?;
                framed.send(pong).await?;
            }
            FrameKind::Pong => {}
            FrameKind::Close => {
                let reason = frame.json::<Close>().map(|c| c.reason).unwrap_or_default();
                tracing::info!(device = %self.device(), reason = %reason, "Device closed the session");
                return Ok(Some(SessionEnd::Closed));
            }
            other => {
                tracing::debug!(device = %self.device(), kind = ?other, "Ignoring unexpected frame");
            }
        }
        Ok(None)
    }
}

// ── Handshake ───────────────────────────────────────────────────────

async fn exchange_hello(
    framed: &mut FramedChannel,
    sealer: &mut FrameSealer,
    handshake: ClientHandshake,
    expected: &DeviceId,
) -> Result<(DeviceIdentity, KeyMaterial)> {
    let hello = sealer.seal_json(FrameKind::Hello, &handshake.hello())?;
    framed.send(hello).await?;

    loop {
        let raw = match framed.next_frame().await {
            None => {
                return Err(RobovacError::Connection(
                    "Channel closed during handshake".to_string(),
                ))
            }
            Some(Ok(raw)) => raw,
            Some(Err(e)) if e.is_desync() || is_transport_error(&e) => return Err(e),
            Some(Err(e)) => {
                tracing::debug!(error = %e, "Dropping malformed handshake frame");
                continue;
            }
        };
        let frame = match sealer.open(raw) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "Dropping unauthenticated handshake frame");
                continue;
            }
        };
        match frame.kind {
            FrameKind::HelloAck => return handshake.complete(frame.json()?, expected),
            FrameKind::HelloReject => {
                let reject: HelloReject = frame.json()?;
                return Err(RobovacError::HandshakeRejected(format!(
                    "{:?}: {}",
                    reject.code, reject.reason
                )));
            }
            FrameKind::Close => {
                return Err(RobovacError::Connection(
                    "Device closed during handshake".to_string(),
                ))
            }
            other => tracing::trace!(kind = ?other, "Ignoring frame before handshake completes"),
        }
    }
}

// ── Post-connect refresh ────────────────────────────────────────────

/// Pull status, consumables, room names and the map after connecting
async fn refresh_after_connect(shared: Arc<DeviceShared>, link: Arc<SessionLink>, timeout: Duration) {
    let device = shared.id().clone();
    let capabilities = shared.capabilities.load_full();
    let supports = |capability: Capability| {
        capabilities
            .as_ref()
            .is_some_and(|set| set.supports(capability))
    };

    match link.call(methods::GET_STATUS, Value::Null, timeout).await {
        Ok(value) => match DeviceStatus::from_value(&value) {
            Ok(status) => shared.apply_status(status),
            Err(e) => tracing::debug!(%device, error = %e, "Unreadable status"),
        },
        Err(e) => tracing::debug!(%device, error = %e, "Initial status query failed"),
    }

    if supports(Capability::Consumables) {
        match link.call(methods::GET_CONSUMABLE, Value::Null, timeout).await {
            Ok(value) => match Consumables::from_value(&value) {
                Ok(consumables) => shared.apply_consumables(consumables),
                Err(e) => tracing::debug!(%device, error = %e, "Unreadable consumables"),
            },
            Err(e) => tracing::debug!(%device, error = %e, "Consumables query failed"),
        }
    }

    if supports(Capability::MapRetrieval) {
        if let Err(e) = link.call(methods::GET_MAP, Value::Null, timeout).await {
            tracing::debug!(%device, error = %e, "Map request failed");
        }
    }

    if supports(Capability::RoomNaming) {
        match link.call(methods::GET_ROOM_MAPPING, Value::Null, timeout).await {
            Ok(value) => shared.apply_room_mapping(&value),
            Err(e) => tracing::debug!(%device, error = %e, "Room mapping query failed"),
        }
    }
}
