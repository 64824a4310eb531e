//! JSON payloads carried inside frames.
//!
//! | Frame kind    | Payload          |
//! |---------------|------------------|
//! | `Hello`       | [`Hello`]        |
//! | `HelloAck`    | [`HelloAck`]     |
//! | `HelloReject` | [`HelloReject`]  |
//! | `Request`     | [`Request`]      |
//! | `Response`    | [`Response`]     |
//! | `Event`       | [`EventMessage`] |
//! | `Close`       | [`Close`]        |
//!
//! `Ping`/`Pong` carry an empty payload; `MapChunk` is binary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capability::NamedMode;
use crate::error::{Result, RobovacError};

/// Client handshake opener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Protocol version spoken by the client
    pub protocol_version: u8,
    /// Client identifier
    pub client_id: String,
    /// Client nonce (base64)
    pub client_nonce: String,
    /// Client ephemeral X25519 public key (base64)
    pub public_key: String,
}

/// Device handshake acceptance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloAck {
    /// Device identifier
    pub duid: String,
    /// Model designator
    pub model: String,
    /// Firmware version
    pub firmware: String,
    /// Device-reported capability flags
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub features: BTreeMap<String, bool>,
    /// Device-reported fan presets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fan_speeds: Option<Vec<NamedMode>>,
    /// Device-reported water presets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub water_levels: Option<Vec<NamedMode>>,
    /// Device-reported mop presets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mop_modes: Option<Vec<NamedMode>>,
    /// Device nonce (base64)
    pub device_nonce: String,
    /// Device ephemeral X25519 public key (base64)
    pub public_key: String,
}

/// Handshake rejection reason codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionCode {
    /// Protocol version not spoken by the device
    VersionMismatch,
    /// Client not authorised
    Unauthorized,
    /// Device already serving its maximum number of clients
    Busy,
    /// Unknown/other error
    Unknown,
}

/// Device handshake refusal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloReject {
    /// Reason code
    pub code: RejectionCode,
    /// Human-readable reason
    #[serde(default)]
    pub reason: String,
}

/// Command request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Request id, unique within the session
    pub id: u32,
    /// Wire method name
    pub method: String,
    /// Method parameters
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

/// Device-side error in a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error code
    pub code: i64,
    /// Error message
    #[serde(default)]
    pub message: String,
}

/// Command response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Id of the request being answered
    pub id: u32,
    /// Result on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    /// Successful response
    pub fn ok(id: u32, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Error response
    pub fn error(id: u32, code: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(ErrorBody {
                code,
                message: message.into(),
            }),
        }
    }

    /// Result value, or `DeviceRejected` if the device answered with an error
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(ErrorBody { code, message }) => Err(RobovacError::DeviceRejected { code, message }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Unsolicited device push
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Event name
    pub event: String,
    /// Event data
    #[serde(default)]
    pub data: Value,
}

/// Event names understood by the session
pub mod events {
    /// `data` is a status object
    pub const STATUS: &str = "status";
    /// `data` is a consumables object
    pub const CONSUMABLES: &str = "consumables";
    /// `data` is `{ "code": i64, "message": str }`
    pub const ERROR: &str = "error";
    /// `data` is `{ "segment_id": name, ... }` from `get_room_mapping`
    pub const ROOM_NAMES: &str = "room_names";
}

/// Query methods the session issues on its own after connecting
pub mod methods {
    /// Current status
    pub const GET_STATUS: &str = "get_status";
    /// Consumable counters
    pub const GET_CONSUMABLE: &str = "get_consumable";
    /// Segment id to name pairs
    pub const GET_ROOM_MAPPING: &str = "get_room_mapping";
    /// Ask for a map upload; the payload arrives as map chunks
    pub const GET_MAP: &str = "get_map_v1";
}

/// Orderly shutdown notice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Close {
    /// Why the sender is closing
    #[serde(default)]
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_omits_null_params() {
        let request = Request {
            id: 7,
            method: "get_status".into(),
            params: Value::Null,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"id": 7, "method": "get_status"})
        );
        let parsed: Request = serde_json::from_str(r#"{"id":7,"method":"get_status"}"#).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_response_error_becomes_device_rejected() {
        let response: Response =
            serde_json::from_str(r#"{"id":3,"error":{"code":-10007,"message":"invalid status"}}"#)
                .unwrap();
        match response.into_result() {
            Err(RobovacError::DeviceRejected { code, message }) => {
                assert_eq!(code, -10007);
                assert_eq!(message, "invalid status");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_response_ok_without_result_is_null() {
        let response: Response = serde_json::from_str(r#"{"id":3}"#).unwrap();
        assert_eq!(response.into_result().unwrap(), Value::Null);
        assert_eq!(
            Response::ok(1, json!(["ok"])).into_result().unwrap(),
            json!(["ok"])
        );
    }

    #[test]
    fn test_reject_code_wire_names() {
        let reject = HelloReject {
            code: RejectionCode::VersionMismatch,
            reason: "v2 only".into(),
        };
        let json = serde_json::to_value(&reject).unwrap();
        assert_eq!(json["code"], "VERSION_MISMATCH");
    }
}
