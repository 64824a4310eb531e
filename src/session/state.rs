//! Per-device session state machine.

use std::fmt;

use serde::Serialize;

use crate::transport::TransportKind;

/// Heartbeat sub-state of a connected session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Heartbeat {
    /// Traffic seen since the last ping
    Idle,
    /// Ping sent, nothing received since
    AwaitingHeartbeat,
}

/// Session state of one device
///
/// ```text
/// Disconnected ──► Connecting ──► Connected{Idle ⇄ AwaitingHeartbeat}
///      ▲               │                     │
///      └───────────────┴─────────────────────┘
/// any ──► Stopped (removed, shut down, or out of attempts)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionState {
    /// No session; waiting to (re)connect
    Disconnected,
    /// Opening the channel and running the handshake
    Connecting {
        /// Transport being tried
        transport: TransportKind,
    },
    /// Handshake complete; commands flow
    Connected {
        /// Transport in use
        transport: TransportKind,
        /// Heartbeat sub-state
        heartbeat: Heartbeat,
    },
    /// Terminal; the session task has exited
    Stopped,
}

impl SessionState {
    /// Whether commands can be issued
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Whether the session task has exited
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Transport of the current or attempted session
    pub fn transport(&self) -> Option<TransportKind> {
        match self {
            Self::Connecting { transport } | Self::Connected { transport, .. } => Some(*transport),
            Self::Disconnected | Self::Stopped => None,
        }
    }

    /// State name without details
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting { .. } => "connecting",
            Self::Connected { .. } => "connected",
            Self::Stopped => "stopped",
        }
    }

    /// Same top-level state, ignoring transport and heartbeat details
    pub fn same_phase(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.transport() {
            Some(transport) => write!(f, "{} ({transport})", self.name()),
            None => f.write_str(self.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_ignores_heartbeat() {
        let idle = SessionState::Connected {
            transport: TransportKind::Local,
            heartbeat: Heartbeat::Idle,
        };
        let waiting = SessionState::Connected {
            transport: TransportKind::Local,
            heartbeat: Heartbeat::AwaitingHeartbeat,
        };
        assert!(idle.same_phase(&waiting));
        assert_ne!(idle, waiting);
        assert!(!idle.same_phase(&SessionState::Disconnected));
    }

    #[test]
    fn test_display_and_serialize() {
        let state = SessionState::Connecting {
            transport: TransportKind::Relayed,
        };
        assert_eq!(state.to_string(), "connecting (relayed)");
        assert_eq!(SessionState::Stopped.to_string(), "stopped");

        let json = serde_json::to_value(state).unwrap();
        assert_eq!(json["status"], "connecting");
        assert_eq!(json["transport"], "relayed");
    }
}
