//! Session key agreement.
//!
//! ```text
//! Client                                   Device
//!   |--- Hello {nonce_c, pub_c} (HMAC) ----->|
//!   |<-- HelloAck {identity, nonce_d, pub_d} |  or HelloReject
//!   |                                        |
//!   |   shared  = X25519(eph_c, pub_d)       |
//!   |   session = HKDF(salt = shared, ikm = local_key,
//!   |                  info = duid | nonce_c | nonce_d)
//!   |                                        |
//!   |==== Request / Response / Event (AEAD) =|
//! ```
//!
//! Both handshake frames are authenticated with a key derived from the
//! local key, so a peer without it cannot complete the exchange.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;

use super::message::{Hello, HelloAck};
use super::PROTOCOL_VERSION;
use crate::codec::crypto::{session_key, CryptoError, KeyMaterial, KeyPair, PublicKey};
use crate::error::{Result, RobovacError};
use crate::model::{DeviceId, DeviceIdentity};

/// Nonce length in bytes
pub const NONCE_LEN: usize = 16;

fn random_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

fn decode_public_key(encoded: &str) -> Result<PublicKey> {
    let bytes = BASE64.decode(encoded)?;
    PublicKey::from_slice(&bytes).map_err(|e| RobovacError::Handshake(e.to_string()))
}

/// Client side of one handshake attempt
pub struct ClientHandshake {
    local_key: KeyMaterial,
    client_id: String,
    keypair: KeyPair,
    nonce: [u8; NONCE_LEN],
}

impl ClientHandshake {
    /// Fresh ephemeral key and nonce for one attempt
    pub fn new(local_key: KeyMaterial, client_id: impl Into<String>) -> Self {
        Self {
            local_key,
            client_id: client_id.into(),
            keypair: KeyPair::generate(),
            nonce: random_nonce(),
        }
    }

    /// Opening message
    pub fn hello(&self) -> Hello {
        Hello {
            protocol_version: PROTOCOL_VERSION,
            client_id: self.client_id.clone(),
            client_nonce: BASE64.encode(self.nonce),
            public_key: BASE64.encode(self.keypair.public_key().as_bytes()),
        }
    }

    /// Check the acknowledgement and derive the session key
    pub fn complete(self, ack: HelloAck, expected: &DeviceId) -> Result<(DeviceIdentity, KeyMaterial)> {
        if ack.duid != expected.as_str() {
            return Err(RobovacError::Handshake(format!(
                "Expected device {expected}, got {}",
                ack.duid
            )));
        }

        let device_nonce = BASE64.decode(&ack.device_nonce)?;
        if device_nonce.len() != NONCE_LEN {
            return Err(RobovacError::Handshake(format!(
                "Device nonce must be {NONCE_LEN} bytes, got {}",
                device_nonce.len()
            )));
        }
        let device_public = decode_public_key(&ack.public_key)?;

        let shared = self
            .keypair
            .diffie_hellman(&device_public)
            .map_err(CryptoError::from)?;
        let key = session_key(&self.local_key, &shared, &ack.duid, &self.nonce, &device_nonce)?;

        let identity = DeviceIdentity {
            duid: DeviceId::new(ack.duid),
            model: ack.model,
            firmware: ack.firmware,
            features: ack.features,
            fan_speeds: ack.fan_speeds,
            water_levels: ack.water_levels,
            mop_modes: ack.mop_modes,
        };
        Ok((identity, key))
    }
}

impl std::fmt::Debug for ClientHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandshake")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// Device side of the handshake, used by simulators and bridges
pub struct DeviceHandshake {
    local_key: KeyMaterial,
    identity: DeviceIdentity,
}

impl DeviceHandshake {
    /// Responder for one device identity
    pub fn new(local_key: KeyMaterial, identity: DeviceIdentity) -> Self {
        Self {
            local_key,
            identity,
        }
    }

    /// Identity announced in the acknowledgement
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Answer a Hello; returns the acknowledgement and the session key
    pub fn accept(&self, hello: &Hello) -> Result<(HelloAck, KeyMaterial)> {
        if hello.protocol_version != PROTOCOL_VERSION {
            return Err(RobovacError::Handshake(format!(
                "Unsupported protocol version {}",
                hello.protocol_version
            )));
        }
        let client_nonce = BASE64.decode(&hello.client_nonce)?;
        let client_public = decode_public_key(&hello.public_key)?;

        let keypair = KeyPair::generate();
        let nonce = random_nonce();
        let shared = keypair
            .diffie_hellman(&client_public)
            .map_err(CryptoError::from)?;
        let duid = self.identity.duid.as_str();
        let key = session_key(&self.local_key, &shared, duid, &client_nonce, &nonce)?;

        let ack = HelloAck {
            duid: duid.to_string(),
            model: self.identity.model.clone(),
            firmware: self.identity.firmware.clone(),
            features: self.identity.features.clone(),
            fan_speeds: self.identity.fan_speeds.clone(),
            water_levels: self.identity.water_levels.clone(),
            mop_modes: self.identity.mop_modes.clone(),
            device_nonce: BASE64.encode(nonce),
            public_key: BASE64.encode(keypair.public_key().as_bytes()),
        };
        Ok((ack, key))
    }
}

impl std::fmt::Debug for DeviceHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandshake")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}
