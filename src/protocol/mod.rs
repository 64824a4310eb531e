//! Device protocol: handshake and JSON message bodies.
//!
//! # Message Flow
//!
//! ```text
//! Client                               Device
//!    |                                    |
//!    |-------- Hello ------------------->|  HMAC (handshake key)
//!    |<------- HelloAck / HelloReject ---|
//!    |                                    |
//!    |======== Request {id} ============>|  AEAD (session key)
//!    |<======= Response {id} ============|
//!    |<======= Event / MapChunk =========|  unsolicited
//!    |                                    |
//!    |-------- Ping -------------------->|  every heartbeat interval
//!    |<------- Pong ---------------------|
//!    |                                    |
//!    |-------- Close ------------------->|
//! ```
//!
//! Requests are correlated with responses only by `id`. Any number may be
//! in flight at once and responses may arrive in any order.

pub mod handshake;
pub mod message;

pub use handshake::{ClientHandshake, DeviceHandshake};
pub use message::{
    events, methods, Close, ErrorBody, EventMessage, Hello, HelloAck, HelloReject, RejectionCode, Request, Response,
};

/// Protocol version spoken by this crate
pub const PROTOCOL_VERSION: u8 = 1;
