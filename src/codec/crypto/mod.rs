//! Cryptographic primitives for the robovac wire format.
//!
//! - **HMAC-SHA256**: authenticates handshake frames
//! - **ChaCha20-Poly1305 AEAD**: seals every frame after the handshake
//! - **HKDF-SHA256**: derives handshake and session keys from the local key
//! - **X25519**: ephemeral exchange so each session key is independent
//!
//! # Key Schedule
//!
//! ```text
//! local_key ──[HKDF, "robovac/v1/handshake"]──► handshake_key (HMAC)
//!
//! X25519(client_eph, device_eph) = shared
//! local_key ──[HKDF, salt = shared,
//!              "robovac/v1/session|{duid}|{client_nonce}|{device_nonce}"]──► session_key (AEAD)
//! ```
//!
//! Binding the local key into the session key means a peer that completes
//! the exchange without knowing the local key still cannot read frames.

mod aead;
mod error;
mod exchange;
mod hmac_auth;
mod keys;

pub use aead::{AeadCipher, AeadError};
pub use error::CryptoError;
pub use exchange::{KeyExchangeError, KeyPair, PublicKey};
pub use hmac_auth::{HmacAuth, HmacError};
pub use keys::{KeyError, KeyMaterial};

/// Nonce size for ChaCha20-Poly1305 (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size for ChaCha20-Poly1305 (128 bits)
pub const AEAD_TAG_SIZE: usize = 16;

/// HMAC-SHA256 tag size (256 bits)
pub const HMAC_TAG_SIZE: usize = 32;

/// Derived session/handshake key size (256 bits)
pub const SESSION_KEY_SIZE: usize = 32;

/// Minimum accepted local key length
pub const MIN_LOCAL_KEY_SIZE: usize = 16;

const HANDSHAKE_INFO: &[u8] = b"robovac/v1/handshake";

/// Derive the handshake authentication key from a device local key
pub fn handshake_key(local_key: &KeyMaterial) -> Result<KeyMaterial, CryptoError> {
    Ok(local_key.derive(HANDSHAKE_INFO, SESSION_KEY_SIZE)?)
}

/// Derive the per-session AEAD key.
///
/// `client_nonce` and `device_nonce` are the raw nonce bytes exchanged in the
/// handshake; both ends must pass them in the same order.
pub fn session_key(
    local_key: &KeyMaterial,
    shared_secret: &KeyMaterial,
    duid: &str,
    client_nonce: &[u8],
    device_nonce: &[u8],
) -> Result<KeyMaterial, CryptoError> {
    let mut info = Vec::with_capacity(32 + duid.len() + client_nonce.len() + device_nonce.len());
    info.extend_from_slice(b"robovac/v1/session|");
    info.extend_from_slice(duid.as_bytes());
    info.push(b'|');
    info.extend_from_slice(client_nonce);
    info.push(b'|');
    info.extend_from_slice(device_nonce);

    Ok(local_key.derive_with_salt(Some(shared_secret.as_bytes()), &info, SESSION_KEY_SIZE)?)
}
