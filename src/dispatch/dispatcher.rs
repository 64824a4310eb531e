//! Command dispatcher: validation, correlation, retries and confirmation.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, MissedTickBehavior};

use super::command::Command;
use super::method::Method;
use crate::config::DispatchConfig;
use crate::error::{Result, RobovacError};
use crate::model::{DeviceEvent, DeviceId, DeviceStatus, EventKind};
use crate::session::{DeviceSession, SessionManager};

/// Interval between `get_status` polls while waiting for confirmation
const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Result of a confirmed command
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The device answered; the method has no observable state
    Acknowledged(Value),
    /// A status matching the expectation was observed
    Confirmed(DeviceStatus),
}

/// Routes commands to device sessions.
///
/// Commands to one device are pipelined over its session and matched to
/// responses by request id only. Dropping an `issue` future cancels the
/// command locally; the device may still carry it out.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    manager: Arc<SessionManager>,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Dispatcher using the manager's dispatch settings
    pub fn new(manager: Arc<SessionManager>) -> Self {
        let config = manager.config().dispatch.clone();
        Self { manager, config }
    }

    /// Dispatcher with explicit settings
    pub fn with_config(manager: Arc<SessionManager>, config: DispatchConfig) -> Self {
        Self { manager, config }
    }

    /// Session manager
    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Dispatch settings
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Response deadline for one attempt
    pub fn timeout_for(&self, command: &Command) -> Duration {
        command.timeout().unwrap_or_else(|| {
            if command.method().is_ack_only() {
                self.config.ack_timeout()
            } else {
                self.config.command_timeout()
            }
        })
    }

    /// Check a command against the device's capabilities and room graph and
    /// return the parameters to send
    pub fn prepare(&self, device: &DeviceSession, command: &Command) -> Result<Value> {
        let capabilities = device
            .capabilities()
            .ok_or_else(|| RobovacError::NotConnected(device.id().to_string()))?;
        if let Some(capability) = command.required_capability() {
            capabilities.require(capability)?;
        }
        if let Some(selection) = command.selection() {
            device.room_graph().validate(selection)?;
        }
        if let Some(ids) = command.raw_segments()? {
            device.room_graph().select(&ids)?;
        }
        command.resolve_params(&capabilities)
    }

    /// Send a command and return the device's result
    pub async fn issue(&self, device: &DeviceId, command: Command) -> Result<Value> {
        let session = self.manager.device(device)?;
        self.issue_on(&session, &command).await
    }

    /// Send a command over a session handle already looked up
    pub async fn issue_on(&self, device: &DeviceSession, command: &Command) -> Result<Value> {
        let params = self.prepare(device, command)?;
        let link = device.link()?;
        let timeout = self.timeout_for(command);
        let retries = command.max_retries().unwrap_or(self.config.max_retries);

        let mut request = link.begin(command.method().as_str(), params)?;
        tracing::debug!(
            device = %device.id(),
            session = %link.id(),
            method = %command.method(),
            id = request.id(),
            ?timeout,
            "Issuing command"
        );

        loop {
            match request.attempt(timeout).await {
                Ok(Some(response)) => {
                    return response.into_result().inspect_err(|e| {
                        tracing::warn!(device = %device.id(), method = %command.method(), error = %e, "Command rejected");
                    });
                }
                Ok(None) if request.sends() > retries => {
                    tracing::warn!(
                        device = %device.id(),
                        method = %command.method(),
                        id = request.id(),
                        attempts = request.sends(),
                        "Command timed out"
                    );
                    return Err(RobovacError::Timeout {
                        method: command.method().to_string(),
                        attempts: request.sends(),
                    });
                }
                Ok(None) => {
                    tracing::debug!(
                        device = %device.id(),
                        method = %command.method(),
                        id = request.id(),
                        attempt = request.sends(),
                        "No response, resending"
                    );
                }
                Err(e) => {
                    tracing::debug!(device = %device.id(), method = %command.method(), id = request.id(), "Session ended with command pending");
                    return Err(e);
                }
            }
        }
    }

    /// Send a command, then wait until a status satisfying `expect` is seen.
    ///
    /// The status comes from device pushes or, failing those, from periodic
    /// `get_status` polls. Gives `ConfirmationTimeout` when nothing matches
    /// within `timeout` of the acknowledgement.
    pub async fn issue_confirmed<F>(
        &self,
        device: &DeviceId,
        command: Command,
        expect: F,
        timeout: Duration,
    ) -> Result<Outcome>
    where
        F: Fn(&DeviceStatus) -> bool,
    {
        let session = self.manager.device(device)?;
        let mut events = self.manager.subscribe();
        self.issue_on(&session, &command).await?;
        let status = self
            .await_status(&session, &mut events, &expect, timeout)
            .await
            .inspect_err(|_| {
                tracing::warn!(device = %device, method = %command.method(), ?timeout, "State change not confirmed");
            })?;
        tracing::debug!(device = %device, method = %command.method(), state = ?status.state, "Command confirmed");
        Ok(Outcome::Confirmed(status))
    }

    /// Wait for a status satisfying `expect`, starting with the cached one
    pub async fn wait_for_status<F>(
        &self,
        device: &DeviceId,
        expect: F,
        timeout: Duration,
    ) -> Result<DeviceStatus>
    where
        F: Fn(&DeviceStatus) -> bool,
    {
        let session = self.manager.device(device)?;
        let mut events = self.manager.subscribe();
        if let Some(status) = session.status().filter(|status| expect(&**status)) {
            return Ok(DeviceStatus::clone(&status));
        }
        self.await_status(&session, &mut events, &expect, timeout).await
    }

    async fn await_status<F>(
        &self,
        device: &DeviceSession,
        events: &mut broadcast::Receiver<Arc<DeviceEvent>>,
        expect: &F,
        timeout: Duration,
    ) -> Result<DeviceStatus>
    where
        F: Fn(&DeviceStatus) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut poll = tokio::time::interval_at(Instant::now() + STATUS_POLL_INTERVAL, STATUS_POLL_INTERVAL);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = tokio::time::sleep_until(deadline) => {
                    return Err(RobovacError::ConfirmationTimeout(timeout));
                }
                event = events.recv() => match event {
                    Ok(event) if event.device == *device.id() => {
                        if let EventKind::StatusChanged { status } = &event.kind {
                            if expect(status) {
                                return Ok(status.clone());
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(device = %device.id(), skipped, "Event stream lagged while waiting for status");
                    }
                    Err(RecvError::Closed) => return Err(RobovacError::Disconnected),
                },
                _ = poll.tick() => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    self.poll_status(device, remaining).await;
                }
            }
        }
    }

    /// Issue a command and confirm it by the states its method declares.
    /// Methods without such states return [`Outcome::Acknowledged`].
    pub async fn confirm(&self, device: &DeviceId, command: Command) -> Result<Outcome> {
        let method = command.method().clone();
        if method.confirming_states().is_empty() {
            return self.issue(device, command).await.map(Outcome::Acknowledged);
        }
        let timeout = self.config.confirm_timeout();
        self.issue_confirmed(device, command, move |status| method.confirmed_by(status.state), timeout)
            .await
    }

    /// Fetch and publish a fresh status. Failures only delay confirmation.
    async fn poll_status(&self, device: &DeviceSession, limit: Duration) {
        let Ok(link) = device.link() else {
            return;
        };
        let timeout = self.config.command_timeout().min(limit);
        let result = link
            .call(Method::GetStatus.as_str(), Value::Null, timeout)
            .await
            .and_then(|value| DeviceStatus::from_value(&value));
        match result {
            Ok(status) => device.shared().apply_status(status),
            Err(e) => tracing::debug!(device = %device.id(), error = %e, "Status poll failed"),
        }
    }

    /// Fresh status straight from the device
    pub async fn fetch_status(&self, device: &DeviceId) -> Result<DeviceStatus> {
        let session = self.manager.device(device)?;
        let value = self.issue_on(&session, &Command::get_status()).await?;
        let status = DeviceStatus::from_value(&value)?;
        session.shared().apply_status(status.clone());
        Ok(status)
    }
}
